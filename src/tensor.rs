use ndarray::{Array, Array2, ArrayBase, Data, Dimension, IntoDimension, NdFloat};

use crate::{Error, Result};

/// Floating-point element type the network computes in.
///
/// Precision is picked once, when a network is built (`MultiLayerConvNet::<f32>`
/// or `MultiLayerConvNet::<f64>`). Initial weights are always sampled in `f64`
/// and narrowed through [`Scalar::from_f64`].
pub trait Scalar: NdFloat {
    fn from_f64(value: f64) -> Self;
}

impl Scalar for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Scalar for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Collapses every axis after the batch axis: `(N, d1, ..., dk)` becomes
/// `(N, d1 * ... * dk)` in row-major order.
pub fn flatten_batch<A, S, D>(input: &ArrayBase<S, D>) -> Result<Array2<A>>
where
    A: Clone,
    S: Data<Elem = A>,
    D: Dimension,
{
    let shape = input.shape();
    if shape.is_empty() {
        return Err(Error::Layer(
            "Cannot flatten a zero-dimensional array".to_string(),
        ));
    }

    let batch_size = shape[0];
    let features: usize = shape[1..].iter().product();

    let flattened = input
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((batch_size, features))?;
    Ok(flattened)
}

/// Reshape an owned array in row-major order, copying first only when the
/// array is not already in standard layout (matrix products may come back
/// column-major).
pub fn reshape<A, D, E>(array: Array<A, D>, shape: E) -> Result<Array<A, E::Dim>>
where
    A: Clone,
    D: Dimension,
    E: IntoDimension,
{
    let array = if array.is_standard_layout() {
        array
    } else {
        array.as_standard_layout().into_owned()
    };
    Ok(array.into_shape_with_order(shape.into_dimension())?)
}

/// Sum of squared entries, accumulated in iteration order.
pub fn square_sum<A, S, D>(values: &ArrayBase<S, D>) -> A
where
    A: Scalar,
    S: Data<Elem = A>,
    D: Dimension,
{
    values.fold(A::zero(), |acc, &v| acc + v * v)
}
