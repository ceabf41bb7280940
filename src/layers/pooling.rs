use crate::{Error, Result, Scalar};
use ndarray::{Array4, ArrayView4};

use super::PoolParam;

/// Location of the winning element of every pooling window, stored as a flat
/// `h * width + w` offset into its `(n, c)` plane.
#[derive(Debug, Clone)]
pub struct PoolCache {
    input_shape: (usize, usize, usize, usize),
    argmax: Array4<usize>,
}

/// Spatial output size of a pooling window along one axis.
///
/// Pooling never pads, so the window has to fit and the stride has to tile
/// the input exactly; anything else is rejected rather than silently cropped.
pub fn pool_output_size(input: usize, window: usize, stride: usize) -> Result<usize> {
    if window == 0 || stride == 0 {
        return Err(Error::Layer(format!(
            "Pooling needs a positive window and stride, got window {} stride {}",
            window, stride
        )));
    }

    if input < window {
        return Err(Error::Layer(format!(
            "Pooling window {} does not fit input {}",
            window, input
        )));
    }

    if (input - window) % stride != 0 {
        return Err(Error::Layer(format!(
            "Pooling stride {} does not tile input {} (window {})",
            stride, input, window
        )));
    }

    Ok((input - window) / stride + 1)
}

pub fn max_pool_forward<A: Scalar>(
    input: ArrayView4<'_, A>,
    param: &PoolParam,
) -> Result<(Array4<A>, PoolCache)> {
    let mut argmax = Array4::zeros(pooled_dim(input, param)?);
    let output = scan_windows(input, param, |index, offset| argmax[index] = offset)?;

    let cache = PoolCache {
        input_shape: input.dim(),
        argmax,
    };

    Ok((output, cache))
}

/// Max pooling without recording where each maximum came from.
pub fn max_pool_infer<A: Scalar>(input: ArrayView4<'_, A>, param: &PoolParam) -> Result<Array4<A>> {
    scan_windows(input, param, |_, _| {})
}

fn pooled_dim<A>(input: ArrayView4<'_, A>, param: &PoolParam) -> Result<(usize, usize, usize, usize)> {
    let (batch_size, channels, height, width) = input.dim();
    Ok((
        batch_size,
        channels,
        pool_output_size(height, param.pool_height, param.stride)?,
        pool_output_size(width, param.pool_width, param.stride)?,
    ))
}

/// Takes the maximum of every window and reports its flat in-plane offset to
/// `record`.
fn scan_windows<A, F>(input: ArrayView4<'_, A>, param: &PoolParam, mut record: F) -> Result<Array4<A>>
where
    A: Scalar,
    F: FnMut([usize; 4], usize),
{
    let out_dim = pooled_dim(input, param)?;
    let (batch_size, channels, out_height, out_width) = out_dim;
    let width = input.dim().3;

    let mut output = Array4::zeros(out_dim);

    for b in 0..batch_size {
        for c in 0..channels {
            for oh in 0..out_height {
                for ow in 0..out_width {
                    let h_start = oh * param.stride;
                    let w_start = ow * param.stride;

                    let mut max_val = A::neg_infinity();
                    let mut max_idx = h_start * width + w_start;
                    for h in h_start..h_start + param.pool_height {
                        for w in w_start..w_start + param.pool_width {
                            let val = input[[b, c, h, w]];
                            if val > max_val {
                                max_val = val;
                                max_idx = h * width + w;
                            }
                        }
                    }

                    output[[b, c, oh, ow]] = max_val;
                    record([b, c, oh, ow], max_idx);
                }
            }
        }
    }

    Ok(output)
}

/// Routes each upstream gradient to the element that won its window; ties go
/// to the first maximum in row-major order.
pub fn max_pool_backward<A: Scalar>(
    grad_output: ArrayView4<'_, A>,
    cache: &PoolCache,
) -> Result<Array4<A>> {
    if grad_output.shape() != cache.argmax.shape() {
        return Err(Error::ShapeMismatch {
            expected: cache.argmax.shape().to_vec(),
            actual: grad_output.shape().to_vec(),
        });
    }

    let width = cache.input_shape.3;
    let mut grad_input = Array4::zeros(cache.input_shape);

    for ((b, c, oh, ow), &idx) in cache.argmax.indexed_iter() {
        grad_input[[b, c, idx / width, idx % width]] += grad_output[[b, c, oh, ow]];
    }

    Ok(grad_input)
}
