use crate::{Error, Result, Scalar};
use ndarray::{Array, ArrayBase, Data, Dimension, Zip};
use serde::Deserialize;

/// Nonlinearity applied after every affine layer except the output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Activation {
    #[default]
    #[serde(rename = "linear", alias = "none")]
    Linear,
    #[serde(rename = "relu")]
    ReLU,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::ReLU => "relu",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReluCache<A, D: Dimension> {
    input: Array<A, D>,
}

pub fn relu_forward<A, S, D>(input: &ArrayBase<S, D>) -> (Array<A, D>, ReluCache<A, D>)
where
    A: Scalar,
    S: Data<Elem = A>,
    D: Dimension,
{
    let output = input.mapv(|x| x.max(A::zero()));
    let cache = ReluCache {
        input: input.to_owned(),
    };
    (output, cache)
}

pub fn relu_backward<A, S, D>(
    grad_output: &ArrayBase<S, D>,
    cache: &ReluCache<A, D>,
) -> Result<Array<A, D>>
where
    A: Scalar,
    S: Data<Elem = A>,
    D: Dimension,
{
    if grad_output.shape() != cache.input.shape() {
        return Err(Error::ShapeMismatch {
            expected: cache.input.shape().to_vec(),
            actual: grad_output.shape().to_vec(),
        });
    }

    let mut grad_input = grad_output.to_owned();
    Zip::from(&mut grad_input)
        .and(&cache.input)
        .for_each(|g, &x| {
            if x <= A::zero() {
                *g = A::zero();
            }
        });
    Ok(grad_input)
}
