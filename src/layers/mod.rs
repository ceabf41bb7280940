pub mod conv2d;
pub mod dense;
pub mod fused;
pub mod pooling;

use ndarray::{Array1, Array2, Array4, ArrayD, ArrayViewD, ArrayViewMutD};

use crate::{tensor::square_sum, Result, Scalar};

/// One differentiable stage of a network.
///
/// `forward` returns the stage output together with whatever it needs to
/// differentiate later; `infer` returns the same output and keeps nothing.
/// `backward` consumes the upstream gradient and a `forward` cache and returns
/// the gradient for the stage input plus one gradient per parameter, packed in
/// the same record type as the parameters themselves.
pub trait Layer<A: Scalar>: std::fmt::Debug + Send + Sync {
    type Params;
    type Cache;

    fn forward(
        &self,
        input: ArrayViewD<'_, A>,
        params: &Self::Params,
    ) -> Result<(ArrayD<A>, Self::Cache)>;

    fn infer(&self, input: ArrayViewD<'_, A>, params: &Self::Params) -> Result<ArrayD<A>>;

    fn backward(
        &self,
        grad_output: ArrayViewD<'_, A>,
        cache: &Self::Cache,
    ) -> Result<(ArrayD<A>, Self::Params)>;

    fn name(&self) -> &str;
}

/// Convolution hyperparameters shared by every conv-relu-pool block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParam {
    pub stride: usize,
    pub pad: usize,
}

impl ConvParam {
    /// Stride 1 with `(filter_size - 1) / 2` zero padding, which keeps the
    /// spatial size unchanged for odd filter sizes.
    pub fn same(filter_size: usize) -> Self {
        Self {
            stride: 1,
            pad: filter_size.saturating_sub(1) / 2,
        }
    }
}

/// Max-pooling hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParam {
    pub pool_height: usize,
    pub pool_width: usize,
    pub stride: usize,
}

impl Default for PoolParam {
    fn default() -> Self {
        Self {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        }
    }
}

/// Weight `(filters, depth, filter_h, filter_w)` and bias `(filters)` of one
/// convolution. Also used for their gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams<A> {
    pub weight: Array4<A>,
    pub bias: Array1<A>,
}

/// Weight `(fan_in, fan_out)` and bias `(fan_out)` of one affine layer. Also
/// used for their gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineParams<A> {
    pub weight: Array2<A>,
    pub bias: Array1<A>,
}

/// Parameter records that carry an L2-penalised weight. Biases are never
/// penalised.
pub trait Weighted<A: Scalar> {
    fn weight_view(&self) -> ArrayViewD<'_, A>;

    fn weight_view_mut(&mut self) -> ArrayViewMutD<'_, A>;

    fn weight_square_sum(&self) -> A {
        square_sum(&self.weight_view())
    }
}

impl<A: Scalar> Weighted<A> for ConvParams<A> {
    fn weight_view(&self) -> ArrayViewD<'_, A> {
        self.weight.view().into_dyn()
    }

    fn weight_view_mut(&mut self) -> ArrayViewMutD<'_, A> {
        self.weight.view_mut().into_dyn()
    }
}

impl<A: Scalar> Weighted<A> for AffineParams<A> {
    fn weight_view(&self) -> ArrayViewD<'_, A> {
        self.weight.view().into_dyn()
    }

    fn weight_view_mut(&mut self) -> ArrayViewMutD<'_, A> {
        self.weight.view_mut().into_dyn()
    }
}

pub use conv2d::{conv_backward, conv_forward, conv_infer, conv_output_size, ConvCache};
pub use dense::{
    affine_backward, affine_forward, affine_infer, Affine, AffineCache, AffineLayerCache,
};
pub use fused::{
    affine_relu_backward, affine_relu_forward, conv_relu_pool_backward, conv_relu_pool_forward,
    conv_relu_pool_infer, AffineReluCache, ConvReluPool, ConvReluPoolCache,
};
pub use pooling::{max_pool_backward, max_pool_forward, max_pool_infer, pool_output_size, PoolCache};
