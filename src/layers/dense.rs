use crate::{
    activations::Activation,
    tensor::{flatten_batch, reshape},
    Error, Result, Scalar,
};
use ndarray::{Array1, Array2, ArrayBase, ArrayD, ArrayView2, ArrayViewD, Axis, Data, Dimension, Ix2, IxDyn};

use super::{
    fused::{affine_relu_backward, affine_relu_forward, AffineReluCache},
    AffineParams,
};

#[derive(Debug, Clone)]
pub struct AffineCache<A> {
    input: Array2<A>,
    input_shape: Vec<usize>,
    weight: Array2<A>,
}

impl<A> AffineCache<A> {
    /// Shape of the input before it was flattened to `(N, D)`.
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }
}

/// `x.reshape(N, D) · weight + bias`, where `D` is the product of every
/// non-batch axis of `x`.
pub fn affine_forward<A, S, D>(
    input: &ArrayBase<S, D>,
    weight: &Array2<A>,
    bias: &Array1<A>,
) -> Result<(Array2<A>, AffineCache<A>)>
where
    A: Scalar,
    S: Data<Elem = A>,
    D: Dimension,
{
    let input_2d = flatten_batch(input)?;
    let output = affine_apply(&input_2d, weight, bias)?;

    let cache = AffineCache {
        input: input_2d,
        input_shape: input.shape().to_vec(),
        weight: weight.clone(),
    };

    Ok((output, cache))
}

/// [`affine_forward`] without copying the input or weights into a cache.
pub fn affine_infer<A, S, D>(
    input: &ArrayBase<S, D>,
    weight: &Array2<A>,
    bias: &Array1<A>,
) -> Result<Array2<A>>
where
    A: Scalar,
    S: Data<Elem = A>,
    D: Dimension,
{
    affine_apply(&flatten_batch(input)?, weight, bias)
}

fn affine_apply<A: Scalar>(input: &Array2<A>, weight: &Array2<A>, bias: &Array1<A>) -> Result<Array2<A>> {
    if input.ncols() != weight.nrows() {
        return Err(Error::ShapeMismatch {
            expected: vec![weight.nrows()],
            actual: vec![input.ncols()],
        });
    }

    if bias.len() != weight.ncols() {
        return Err(Error::Layer(format!(
            "Bias size {} doesn't match units {}",
            bias.len(),
            weight.ncols()
        )));
    }

    let mut output = input.dot(weight);
    output += bias;
    Ok(output)
}

/// Gradients of an affine layer: `(d_input, d_weight, d_bias)`, with
/// `d_input` restored to the original input shape.
pub fn affine_backward<A: Scalar>(
    grad_output: ArrayView2<'_, A>,
    cache: &AffineCache<A>,
) -> Result<(ArrayD<A>, Array2<A>, Array1<A>)> {
    let expected = [cache.input.nrows(), cache.weight.ncols()];
    if grad_output.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: grad_output.shape().to_vec(),
        });
    }

    let grad_input = reshape(
        grad_output.dot(&cache.weight.t()),
        IxDyn(&cache.input_shape),
    )?;
    let grad_weight = cache.input.t().dot(&grad_output);
    let grad_bias = grad_output.sum_axis(Axis(0));

    Ok((grad_input, grad_weight, grad_bias))
}

/// An affine layer, optionally followed by a ReLU.
#[derive(Debug, Clone)]
pub struct Affine {
    name: String,
    activation: Activation,
}

#[derive(Debug, Clone)]
pub enum AffineLayerCache<A> {
    Linear(AffineCache<A>),
    Relu(AffineReluCache<A>),
}

impl Affine {
    pub fn new(name: String, activation: Activation) -> Self {
        Self { name, activation }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl<A: Scalar> super::Layer<A> for Affine {
    type Params = AffineParams<A>;
    type Cache = AffineLayerCache<A>;

    fn forward(
        &self,
        input: ArrayViewD<'_, A>,
        params: &AffineParams<A>,
    ) -> Result<(ArrayD<A>, AffineLayerCache<A>)> {
        let (output, cache) = match self.activation {
            Activation::Linear => {
                let (output, cache) = affine_forward(&input, &params.weight, &params.bias)?;
                (output, AffineLayerCache::Linear(cache))
            }
            Activation::ReLU => {
                let (output, cache) = affine_relu_forward(&input, &params.weight, &params.bias)?;
                (output, AffineLayerCache::Relu(cache))
            }
        };

        Ok((output.into_dyn(), cache))
    }

    fn infer(&self, input: ArrayViewD<'_, A>, params: &AffineParams<A>) -> Result<ArrayD<A>> {
        let output = affine_infer(&input, &params.weight, &params.bias)?;
        let output = match self.activation {
            Activation::Linear => output,
            Activation::ReLU => output.mapv_into(|x| x.max(A::zero())),
        };

        Ok(output.into_dyn())
    }

    fn backward(
        &self,
        grad_output: ArrayViewD<'_, A>,
        cache: &AffineLayerCache<A>,
    ) -> Result<(ArrayD<A>, AffineParams<A>)> {
        let grad_output = grad_output.into_dimensionality::<Ix2>()?;

        let (grad_input, weight, bias) = match cache {
            AffineLayerCache::Linear(cache) => affine_backward(grad_output, cache)?,
            AffineLayerCache::Relu(cache) => affine_relu_backward(grad_output, cache)?,
        };

        Ok((grad_input, AffineParams { weight, bias }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
