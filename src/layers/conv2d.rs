use crate::{
    conv2d_impl::{col2im, im2col, Window},
    tensor::reshape,
    Error, Result, Scalar,
};
use ndarray::{Array1, Array2, Array4, ArrayView4, Axis};

use super::ConvParam;

/// What [`conv_backward`] needs from the forward pass: the patch matrix, the
/// flattened weights and the input geometry.
#[derive(Debug, Clone)]
pub struct ConvCache<A> {
    cols: Array2<A>,
    weight: Array2<A>,
    input_shape: (usize, usize, usize, usize),
    window: Window,
}

/// Spatial output size of a convolution along one axis:
/// `1 + (input + 2 * pad - kernel) / stride`.
///
/// Fails if the kernel does not fit the padded input or the stride does not
/// tile it exactly.
pub fn conv_output_size(input: usize, kernel: usize, param: &ConvParam) -> Result<usize> {
    if kernel == 0 || param.stride == 0 {
        return Err(Error::Layer(format!(
            "Convolution needs a positive kernel and stride, got kernel {} stride {}",
            kernel, param.stride
        )));
    }

    let padded = param
        .pad
        .checked_mul(2)
        .and_then(|pad| pad.checked_add(input))
        .ok_or_else(|| {
            Error::Layer(format!(
                "Padding {} on input {} overflows the index range",
                param.pad, input
            ))
        })?;
    if padded < kernel {
        return Err(Error::Layer(format!(
            "Kernel {} does not fit input {} with padding {}",
            kernel, input, param.pad
        )));
    }

    if (padded - kernel) % param.stride != 0 {
        return Err(Error::Layer(format!(
            "Stride {} does not tile input {} (kernel {}, padding {})",
            param.stride, input, kernel, param.pad
        )));
    }

    Ok(1 + (padded - kernel) / param.stride)
}

/// Convolve an `(N, C, H, W)` batch with `(F, C, HH, WW)` filters.
///
/// Returns `(N, F, H', W')` activations.
pub fn conv_forward<A: Scalar>(
    input: ArrayView4<'_, A>,
    weight: &Array4<A>,
    bias: &Array1<A>,
    param: &ConvParam,
) -> Result<(Array4<A>, ConvCache<A>)> {
    let (output, cols, weight_2d, window) = convolve(input, weight, bias, param)?;

    let cache = ConvCache {
        cols,
        weight: weight_2d,
        input_shape: input.dim(),
        window,
    };

    Ok((output, cache))
}

/// [`conv_forward`] without keeping anything for a backward pass.
pub fn conv_infer<A: Scalar>(
    input: ArrayView4<'_, A>,
    weight: &Array4<A>,
    bias: &Array1<A>,
    param: &ConvParam,
) -> Result<Array4<A>> {
    convolve(input, weight, bias, param).map(|(output, ..)| output)
}

fn convolve<A: Scalar>(
    input: ArrayView4<'_, A>,
    weight: &Array4<A>,
    bias: &Array1<A>,
    param: &ConvParam,
) -> Result<(Array4<A>, Array2<A>, Array2<A>, Window)> {
    let (batch_size, channels, height, width) = input.dim();
    let (filters, weight_channels, kernel_h, kernel_w) = weight.dim();

    if channels != weight_channels {
        return Err(Error::ShapeMismatch {
            expected: vec![weight_channels],
            actual: vec![channels],
        });
    }

    if bias.len() != filters {
        return Err(Error::ShapeMismatch {
            expected: vec![filters],
            actual: vec![bias.len()],
        });
    }

    let window = Window {
        kernel_h,
        kernel_w,
        stride: param.stride,
        pad: param.pad,
        out_h: conv_output_size(height, kernel_h, param)?,
        out_w: conv_output_size(width, kernel_w, param)?,
    };

    let cols = im2col(input, &window);
    let weight_2d = reshape(weight.to_owned(), (filters, channels * kernel_h * kernel_w))?;

    let mut output = cols.dot(&weight_2d.t());
    output += bias;

    let output = reshape(output, (batch_size, window.out_h, window.out_w, filters))?
        .permuted_axes([0, 3, 1, 2])
        .as_standard_layout()
        .into_owned();

    Ok((output, cols, weight_2d, window))
}

/// Gradients of a convolution: `(d_input, d_weight, d_bias)`.
pub fn conv_backward<A: Scalar>(
    grad_output: ArrayView4<'_, A>,
    cache: &ConvCache<A>,
) -> Result<(Array4<A>, Array4<A>, Array1<A>)> {
    let (batch_size, channels, _, _) = cache.input_shape;
    let filters = cache.weight.nrows();
    let Window {
        kernel_h,
        kernel_w,
        out_h,
        out_w,
        ..
    } = cache.window;

    let expected = [batch_size, filters, out_h, out_w];
    if grad_output.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: grad_output.shape().to_vec(),
        });
    }

    let grad_2d = reshape(
        grad_output.permuted_axes([0, 2, 3, 1]).to_owned(),
        (batch_size * out_h * out_w, filters),
    )?;

    let grad_bias = grad_2d.sum_axis(Axis(0));
    let grad_weight = reshape(
        grad_2d.t().dot(&cache.cols),
        (filters, channels, kernel_h, kernel_w),
    )?;

    let grad_cols = grad_2d.dot(&cache.weight);
    let grad_input = col2im(grad_cols.view(), cache.input_shape, &cache.window);

    Ok((grad_input, grad_weight, grad_bias))
}
