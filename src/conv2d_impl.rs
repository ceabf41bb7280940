use ndarray::{Array2, Array4, ArrayView2, ArrayView4};

use crate::Scalar;

/// Geometry of one sweep of a convolution window over an NCHW input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride: usize,
    pub pad: usize,
    pub out_h: usize,
    pub out_w: usize,
}

/// Transform a 4D NCHW input into a 2D patch matrix for GEMM convolution.
///
/// Row `n * out_h * out_w + oh * out_w + ow` holds the receptive field of that
/// output position, laid out channel-major so it lines up with a
/// `(filters, C * kernel_h * kernel_w)` reshape of the weights. Padded
/// positions stay zero.
pub(crate) fn im2col<A: Scalar>(input: ArrayView4<'_, A>, window: &Window) -> Array2<A> {
    let (batch, channels, height, width) = input.dim();
    let col_h = batch * window.out_h * window.out_w;
    let col_w = channels * window.kernel_h * window.kernel_w;

    let mut col_matrix = Array2::zeros((col_h, col_w));

    for b in 0..batch {
        for oh in 0..window.out_h {
            for ow in 0..window.out_w {
                let row_idx = b * (window.out_h * window.out_w) + oh * window.out_w + ow;

                for c in 0..channels {
                    for kh in 0..window.kernel_h {
                        let ih = (oh * window.stride + kh).wrapping_sub(window.pad);
                        if ih >= height {
                            continue;
                        }
                        for kw in 0..window.kernel_w {
                            let iw = (ow * window.stride + kw).wrapping_sub(window.pad);
                            if iw < width {
                                let col_idx = (c * window.kernel_h + kh) * window.kernel_w + kw;
                                col_matrix[[row_idx, col_idx]] = input[[b, c, ih, iw]];
                            }
                        }
                    }
                }
            }
        }
    }

    col_matrix
}

/// Scatter-add a patch matrix back onto an NCHW array of `shape`.
///
/// Inverse bookkeeping of [`im2col`]: overlapping receptive fields accumulate,
/// and entries that fell into the padding are dropped.
pub(crate) fn col2im<A: Scalar>(
    cols: ArrayView2<'_, A>,
    shape: (usize, usize, usize, usize),
    window: &Window,
) -> Array4<A> {
    let (batch, channels, height, width) = shape;
    let mut output = Array4::zeros(shape);

    for b in 0..batch {
        for oh in 0..window.out_h {
            for ow in 0..window.out_w {
                let row_idx = b * (window.out_h * window.out_w) + oh * window.out_w + ow;

                for c in 0..channels {
                    for kh in 0..window.kernel_h {
                        let ih = (oh * window.stride + kh).wrapping_sub(window.pad);
                        if ih >= height {
                            continue;
                        }
                        for kw in 0..window.kernel_w {
                            let iw = (ow * window.stride + kw).wrapping_sub(window.pad);
                            if iw < width {
                                let col_idx = (c * window.kernel_h + kh) * window.kernel_w + kw;
                                output[[b, c, ih, iw]] += cols[[row_idx, col_idx]];
                            }
                        }
                    }
                }
            }
        }
    }

    output
}
