//! Common layer sandwiches, evaluated as one unit with one cache.

use crate::{
    activations::{relu_backward, relu_forward, ReluCache},
    Result, Scalar,
};
use ndarray::{
    Array1, Array2, Array4, ArrayBase, ArrayD, ArrayView2, ArrayView4, ArrayViewD, Data,
    Dimension, Ix2, Ix4,
};

use super::{
    conv2d::{conv_backward, conv_forward, conv_infer, ConvCache},
    dense::{affine_backward, affine_forward, AffineCache},
    pooling::{max_pool_backward, max_pool_forward, max_pool_infer, PoolCache},
    ConvParam, ConvParams, PoolParam,
};

#[derive(Debug, Clone)]
pub struct ConvReluPoolCache<A> {
    conv: ConvCache<A>,
    relu: ReluCache<A, Ix4>,
    pool: PoolCache,
}

/// Convolution, ReLU, then max pooling.
pub fn conv_relu_pool_forward<A: Scalar>(
    input: ArrayView4<'_, A>,
    weight: &Array4<A>,
    bias: &Array1<A>,
    conv_param: &ConvParam,
    pool_param: &PoolParam,
) -> Result<(Array4<A>, ConvReluPoolCache<A>)> {
    let (conv_out, conv) = conv_forward(input, weight, bias, conv_param)?;
    let (relu_out, relu) = relu_forward(&conv_out);
    let (output, pool) = max_pool_forward(relu_out.view(), pool_param)?;

    Ok((output, ConvReluPoolCache { conv, relu, pool }))
}

/// [`conv_relu_pool_forward`] without the caches.
pub fn conv_relu_pool_infer<A: Scalar>(
    input: ArrayView4<'_, A>,
    weight: &Array4<A>,
    bias: &Array1<A>,
    conv_param: &ConvParam,
    pool_param: &PoolParam,
) -> Result<Array4<A>> {
    let activated = conv_infer(input, weight, bias, conv_param)?.mapv_into(|x| x.max(A::zero()));
    max_pool_infer(activated.view(), pool_param)
}

pub fn conv_relu_pool_backward<A: Scalar>(
    grad_output: ArrayView4<'_, A>,
    cache: &ConvReluPoolCache<A>,
) -> Result<(Array4<A>, Array4<A>, Array1<A>)> {
    let grad_relu = max_pool_backward(grad_output, &cache.pool)?;
    let grad_conv = relu_backward(&grad_relu, &cache.relu)?;
    conv_backward(grad_conv.view(), &cache.conv)
}

#[derive(Debug, Clone)]
pub struct AffineReluCache<A> {
    affine: AffineCache<A>,
    relu: ReluCache<A, Ix2>,
}

/// Affine transform followed by a ReLU.
pub fn affine_relu_forward<A, S, D>(
    input: &ArrayBase<S, D>,
    weight: &Array2<A>,
    bias: &Array1<A>,
) -> Result<(Array2<A>, AffineReluCache<A>)>
where
    A: Scalar,
    S: Data<Elem = A>,
    D: Dimension,
{
    let (affine_out, affine) = affine_forward(input, weight, bias)?;
    let (output, relu) = relu_forward(&affine_out);

    Ok((output, AffineReluCache { affine, relu }))
}

pub fn affine_relu_backward<A: Scalar>(
    grad_output: ArrayView2<'_, A>,
    cache: &AffineReluCache<A>,
) -> Result<(ArrayD<A>, Array2<A>, Array1<A>)> {
    let grad_affine = relu_backward(&grad_output, &cache.relu)?;
    affine_backward(grad_affine.view(), &cache.affine)
}

/// A conv-relu-pool block with fixed convolution and pooling hyperparameters.
#[derive(Debug, Clone)]
pub struct ConvReluPool {
    name: String,
    conv_param: ConvParam,
    pool_param: PoolParam,
}

impl ConvReluPool {
    pub fn new(name: String, conv_param: ConvParam, pool_param: PoolParam) -> Self {
        Self {
            name,
            conv_param,
            pool_param,
        }
    }

}

impl<A: Scalar> super::Layer<A> for ConvReluPool {
    type Params = ConvParams<A>;
    type Cache = ConvReluPoolCache<A>;

    fn forward(
        &self,
        input: ArrayViewD<'_, A>,
        params: &ConvParams<A>,
    ) -> Result<(ArrayD<A>, ConvReluPoolCache<A>)> {
        let input = input.into_dimensionality::<Ix4>()?;
        let (output, cache) = conv_relu_pool_forward(
            input,
            &params.weight,
            &params.bias,
            &self.conv_param,
            &self.pool_param,
        )?;

        Ok((output.into_dyn(), cache))
    }

    fn infer(&self, input: ArrayViewD<'_, A>, params: &ConvParams<A>) -> Result<ArrayD<A>> {
        let output = conv_relu_pool_infer(
            input.into_dimensionality::<Ix4>()?,
            &params.weight,
            &params.bias,
            &self.conv_param,
            &self.pool_param,
        )?;

        Ok(output.into_dyn())
    }

    fn backward(
        &self,
        grad_output: ArrayViewD<'_, A>,
        cache: &ConvReluPoolCache<A>,
    ) -> Result<(ArrayD<A>, ConvParams<A>)> {
        let grad_output = grad_output.into_dimensionality::<Ix4>()?;
        let (grad_input, weight, bias) = conv_relu_pool_backward(grad_output, cache)?;

        Ok((grad_input.into_dyn(), ConvParams { weight, bias }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
