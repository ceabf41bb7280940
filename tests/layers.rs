mod common;

use approx::assert_abs_diff_eq;
use common::{assert_gradient_close, numeric_gradient, randn, rng};
use ndarray::{array, Array1, Array4, ArrayD, Ix1, Ix2, Ix4};
use pocket_convnet::{
    activations::{relu_backward, relu_forward, Activation},
    layers::{
        affine_backward, affine_forward, affine_infer, affine_relu_backward, affine_relu_forward,
        conv_backward, conv_forward, conv_infer, conv_relu_pool_backward, conv_relu_pool_forward,
        conv_relu_pool_infer, max_pool_backward, max_pool_forward, Affine, AffineParams, ConvParam,
        ConvParams, ConvReluPool, Layer, PoolParam,
    },
    loss::softmax_loss,
    Error,
};

/// `sum(out * dout)`, whose gradient with respect to any input of `out` is
/// exactly what a backward pass given `dout` returns.
fn projected<D: ndarray::Dimension>(out: &ndarray::Array<f64, D>, dout: &ndarray::Array<f64, D>) -> f64 {
    (out * dout).sum()
}

fn naive_conv(x: &Array4<f64>, w: &Array4<f64>, b: &Array1<f64>, param: &ConvParam) -> Array4<f64> {
    let (n, c, h, wd) = x.dim();
    let (f, _, kh, kw) = w.dim();
    let out_h = 1 + (h + 2 * param.pad - kh) / param.stride;
    let out_w = 1 + (wd + 2 * param.pad - kw) / param.stride;
    let mut out = Array4::zeros((n, f, out_h, out_w));

    for ni in 0..n {
        for fi in 0..f {
            for i in 0..out_h {
                for j in 0..out_w {
                    let mut acc = b[fi];
                    for ci in 0..c {
                        for di in 0..kh {
                            for dj in 0..kw {
                                let row = (i * param.stride + di) as isize - param.pad as isize;
                                let col = (j * param.stride + dj) as isize - param.pad as isize;
                                if row < 0 || col < 0 || row >= h as isize || col >= wd as isize {
                                    continue;
                                }
                                acc += x[[ni, ci, row as usize, col as usize]] * w[[fi, ci, di, dj]];
                            }
                        }
                    }
                    out[[ni, fi, i, j]] = acc;
                }
            }
        }
    }

    out
}

#[test]
fn test_affine_forward_flattens_trailing_axes() {
    let mut r = rng(1);
    let x = randn((4, 3, 2), &mut r);
    let w = randn((6, 5), &mut r);
    let b = randn(5, &mut r);

    let (out, cache) = affine_forward(&x, &w, &b).unwrap();
    assert_eq!(affine_infer(&x, &w, &b).unwrap(), out);

    let flat = x.clone().into_shape_with_order((4, 6)).unwrap();
    let expected = flat.dot(&w) + &b;
    assert_abs_diff_eq!(out, expected, epsilon = 1e-12);
    assert_eq!(cache.input_shape(), &[4, 3, 2]);
}

#[test]
fn test_affine_backward_matches_numeric_gradient() {
    let mut r = rng(2);
    let x: ArrayD<f64> = randn((3, 2, 2), &mut r).into_dyn();
    let w = randn((4, 5), &mut r);
    let b = randn(5, &mut r);
    let dout = randn((3, 5), &mut r);

    let (_, cache) = affine_forward(&x, &w, &b).unwrap();
    let (dx, dw, db) = affine_backward(dout.view(), &cache).unwrap();
    assert_eq!(dx.shape(), &[3, 2, 2]);

    let num_dx = numeric_gradient(|x| projected(&affine_forward(x, &w, &b).unwrap().0, &dout), &x, 1e-5);
    let num_dw = numeric_gradient(
        |w| {
            let w = w.clone().into_dimensionality::<Ix2>().unwrap();
            projected(&affine_forward(&x, &w, &b).unwrap().0, &dout)
        },
        &w.clone().into_dyn(),
        1e-5,
    );
    let num_db = numeric_gradient(
        |b| {
            let b = b.clone().into_dimensionality::<Ix1>().unwrap();
            projected(&affine_forward(&x, &w, &b).unwrap().0, &dout)
        },
        &b.clone().into_dyn(),
        1e-5,
    );

    assert_gradient_close("dx", dx.view(), &num_dx);
    assert_gradient_close("dw", dw.into_dyn().view(), &num_dw);
    assert_gradient_close("db", db.into_dyn().view(), &num_db);
}

#[test]
fn test_affine_rejects_mismatched_weight() {
    let x = Array4::<f64>::zeros((2, 1, 2, 2));
    let w = ndarray::Array2::zeros((5, 3));
    let b = Array1::zeros(3);

    assert!(matches!(
        affine_forward(&x, &w, &b),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_relu_forward_and_backward() {
    let x = array![[-1.0, 0.5], [2.0, -0.25]];
    let (out, cache) = relu_forward(&x);
    assert_eq!(out, array![[0.0, 0.5], [2.0, 0.0]]);

    let dout = array![[10.0, 20.0], [30.0, 40.0]];
    let dx = relu_backward(&dout, &cache).unwrap();
    assert_eq!(dx, array![[0.0, 20.0], [30.0, 0.0]]);
}

#[test]
fn test_conv_forward_matches_direct_convolution() {
    let mut r = rng(3);
    let x = randn((2, 3, 5, 5), &mut r);
    let w = randn((4, 3, 3, 3), &mut r);
    let b = randn(4, &mut r);
    let param = ConvParam { stride: 2, pad: 1 };

    let (out, _) = conv_forward(x.view(), &w, &b, &param).unwrap();

    assert_eq!(out.dim(), (2, 4, 3, 3));
    assert_eq!(conv_infer(x.view(), &w, &b, &param).unwrap(), out);
    assert_abs_diff_eq!(out, naive_conv(&x, &w, &b, &param), epsilon = 1e-10);
}

#[test]
fn test_conv_forward_same_padding_keeps_spatial_size() {
    let mut r = rng(4);
    let x = randn((1, 2, 6, 6), &mut r);
    let w = randn((3, 2, 5, 5), &mut r);
    let b = Array1::zeros(3);
    let param = ConvParam::same(5);

    let (out, _) = conv_forward(x.view(), &w, &b, &param).unwrap();

    assert_eq!(out.dim(), (1, 3, 6, 6));
    assert_abs_diff_eq!(out, naive_conv(&x, &w, &b, &param), epsilon = 1e-10);
}

#[test]
fn test_conv_backward_matches_numeric_gradient() {
    let mut r = rng(5);
    let x = randn((2, 2, 5, 5), &mut r);
    let w = randn((3, 2, 3, 3), &mut r);
    let b = randn(3, &mut r);
    let dout = randn((2, 3, 5, 5), &mut r);
    let param = ConvParam { stride: 1, pad: 1 };

    let (_, cache) = conv_forward(x.view(), &w, &b, &param).unwrap();
    let (dx, dw, db) = conv_backward(dout.view(), &cache).unwrap();

    let num_dx = numeric_gradient(
        |x| {
            let x = x.view().into_dimensionality::<Ix4>().unwrap();
            projected(&conv_forward(x, &w, &b, &param).unwrap().0, &dout)
        },
        &x.clone().into_dyn(),
        1e-5,
    );
    let num_dw = numeric_gradient(
        |w| {
            let w = w.clone().into_dimensionality::<Ix4>().unwrap();
            projected(&conv_forward(x.view(), &w, &b, &param).unwrap().0, &dout)
        },
        &w.clone().into_dyn(),
        1e-5,
    );
    let num_db = numeric_gradient(
        |b| {
            let b = b.clone().into_dimensionality::<Ix1>().unwrap();
            projected(&conv_forward(x.view(), &w, &b, &param).unwrap().0, &dout)
        },
        &b.clone().into_dyn(),
        1e-5,
    );

    assert_gradient_close("dx", dx.into_dyn().view(), &num_dx);
    assert_gradient_close("dw", dw.into_dyn().view(), &num_dw);
    assert_gradient_close("db", db.into_dyn().view(), &num_db);
}

#[test]
fn test_conv_rejects_channel_mismatch() {
    let x = Array4::<f64>::zeros((1, 3, 4, 4));
    let w = Array4::zeros((2, 2, 3, 3));
    let b = Array1::zeros(2);

    assert!(conv_forward(x.view(), &w, &b, &ConvParam::same(3)).is_err());
}

#[test]
fn test_max_pool_forward_picks_window_maxima() {
    let x = array![[
        [
            [1.0, 2.0, 5.0, 6.0],
            [3.0, 4.0, 7.0, 8.0],
            [9.0, 10.0, 13.0, 14.0],
            [11.0, 12.0, 15.0, 16.0],
        ],
        [
            [-1.0, -2.0, 0.0, 0.0],
            [-3.0, -4.0, 0.0, 1.0],
            [2.0, 2.0, 0.0, 0.0],
            [2.0, 2.0, 0.0, 0.0],
        ],
    ]];

    let (out, _) = max_pool_forward(x.view(), &PoolParam::default()).unwrap();

    assert_eq!(
        out,
        array![[[[4.0, 8.0], [12.0, 16.0]], [[-1.0, 1.0], [2.0, 0.0]]]]
    );
}

#[test]
fn test_max_pool_backward_routes_to_first_maximum_on_ties() {
    let x = array![[[[2.0, 2.0], [2.0, 2.0]]]];
    let (_, cache) = max_pool_forward(x.view(), &PoolParam::default()).unwrap();

    let dx = max_pool_backward(array![[[[5.0]]]].view(), &cache).unwrap();

    assert_eq!(dx, array![[[[5.0, 0.0], [0.0, 0.0]]]]);
}

#[test]
fn test_max_pool_backward_matches_numeric_gradient() {
    let mut r = rng(6);
    let x = randn((2, 3, 4, 6), &mut r);
    let dout = randn((2, 3, 2, 3), &mut r);
    let param = PoolParam::default();

    let (_, cache) = max_pool_forward(x.view(), &param).unwrap();
    let dx = max_pool_backward(dout.view(), &cache).unwrap();

    let num_dx = numeric_gradient(
        |x| {
            let x = x.view().into_dimensionality::<Ix4>().unwrap();
            projected(&max_pool_forward(x, &param).unwrap().0, &dout)
        },
        &x.clone().into_dyn(),
        1e-6,
    );

    assert_gradient_close("dx", dx.into_dyn().view(), &num_dx);
}

#[test]
fn test_max_pool_rejects_untiled_input() {
    let x = Array4::<f64>::zeros((1, 1, 5, 4));
    assert!(max_pool_forward(x.view(), &PoolParam::default()).is_err());
}

#[test]
fn test_conv_relu_pool_matches_numeric_gradient() {
    let mut r = rng(7);
    let x = randn((2, 3, 4, 4), &mut r);
    let w = randn((3, 3, 3, 3), &mut r);
    let b = randn(3, &mut r);
    let dout = randn((2, 3, 2, 2), &mut r);
    let conv = ConvParam::same(3);
    let pool = PoolParam::default();

    let (out, cache) = conv_relu_pool_forward(x.view(), &w, &b, &conv, &pool).unwrap();
    assert_eq!(out.dim(), (2, 3, 2, 2));
    assert!(out.iter().all(|&v| v >= 0.0));
    assert_eq!(conv_relu_pool_infer(x.view(), &w, &b, &conv, &pool).unwrap(), out);

    let (dx, dw, db) = conv_relu_pool_backward(dout.view(), &cache).unwrap();

    let num_dx = numeric_gradient(
        |x| {
            let x = x.view().into_dimensionality::<Ix4>().unwrap();
            projected(&conv_relu_pool_forward(x, &w, &b, &conv, &pool).unwrap().0, &dout)
        },
        &x.clone().into_dyn(),
        1e-6,
    );
    let num_dw = numeric_gradient(
        |w| {
            let w = w.clone().into_dimensionality::<Ix4>().unwrap();
            projected(&conv_relu_pool_forward(x.view(), &w, &b, &conv, &pool).unwrap().0, &dout)
        },
        &w.clone().into_dyn(),
        1e-6,
    );
    let num_db = numeric_gradient(
        |b| {
            let b = b.clone().into_dimensionality::<Ix1>().unwrap();
            projected(&conv_relu_pool_forward(x.view(), &w, &b, &conv, &pool).unwrap().0, &dout)
        },
        &b.clone().into_dyn(),
        1e-6,
    );

    assert_gradient_close("dx", dx.into_dyn().view(), &num_dx);
    assert_gradient_close("dw", dw.into_dyn().view(), &num_dw);
    assert_gradient_close("db", db.into_dyn().view(), &num_db);
}

#[test]
fn test_affine_relu_matches_numeric_gradient() {
    let mut r = rng(8);
    let x = randn((4, 6), &mut r).into_dyn();
    let w = randn((6, 5), &mut r);
    let b = randn(5, &mut r);
    let dout = randn((4, 5), &mut r);

    let (_, cache) = affine_relu_forward(&x, &w, &b).unwrap();
    let (dx, dw, _) = affine_relu_backward(dout.view(), &cache).unwrap();

    let num_dx = numeric_gradient(
        |x| projected(&affine_relu_forward(x, &w, &b).unwrap().0, &dout),
        &x,
        1e-6,
    );
    let num_dw = numeric_gradient(
        |w| {
            let w = w.clone().into_dimensionality::<Ix2>().unwrap();
            projected(&affine_relu_forward(&x, &w, &b).unwrap().0, &dout)
        },
        &w.clone().into_dyn(),
        1e-6,
    );

    assert_gradient_close("dx", dx.view(), &num_dx);
    assert_gradient_close("dw", dw.into_dyn().view(), &num_dw);
}

#[test]
fn test_layer_trait_round_trip_through_dynamic_views() {
    let mut r = rng(9);
    let block = ConvReluPool::new("block".to_string(), ConvParam::same(3), PoolParam::default());
    let params = ConvParams {
        weight: randn((4, 2, 3, 3), &mut r),
        bias: Array1::zeros(4),
    };
    let x = randn((3, 2, 6, 6), &mut r).into_dyn();

    let (out, cache) = block.forward(x.view(), &params).unwrap();
    assert_eq!(out.shape(), &[3, 4, 3, 3]);
    assert_eq!(block.infer(x.view(), &params).unwrap(), out);
    assert_eq!(Layer::<f64>::name(&block), "block");

    let (dx, grads) = block.backward(out.view(), &cache).unwrap();
    assert_eq!(dx.shape(), x.shape());
    assert_eq!(grads.weight.dim(), params.weight.dim());
    assert_eq!(grads.bias.len(), 4);

    let dense = Affine::new("dense".to_string(), Activation::Linear);
    let dense_params = AffineParams {
        weight: randn((36, 2), &mut r),
        bias: Array1::zeros(2),
    };
    let (scores, _) = dense.forward(out.view(), &dense_params).unwrap();
    assert_eq!(scores.shape(), &[3, 2]);
}

#[test]
fn test_softmax_loss_of_uniform_scores_is_log_num_classes() {
    let scores = ndarray::Array2::<f64>::zeros((4, 7));
    let (loss, grad) = softmax_loss(scores.view(), &[0, 3, 6, 2]).unwrap();

    assert_abs_diff_eq!(loss, 7f64.ln(), epsilon = 1e-12);
    for row in grad.rows() {
        assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_softmax_loss_stays_finite_for_huge_scores() {
    let scores = array![[1e8, -1e8, 0.0], [-5e7, 2e8, 1e8]];
    let (loss, grad): (f64, _) = softmax_loss(scores.view(), &[0, 0]).unwrap();

    assert!(loss.is_finite());
    assert!(grad.iter().all(|v| v.is_finite()));
    assert_abs_diff_eq!(loss, 2.5e8 / 2.0, epsilon = 1.0);
}

#[test]
fn test_softmax_loss_matches_numeric_gradient() {
    let mut r = rng(10);
    let scores = randn((5, 4), &mut r);
    let labels = [1, 0, 3, 3, 2];

    let (_, grad) = softmax_loss(scores.view(), &labels).unwrap();
    let numeric = numeric_gradient(
        |s| {
            let s = s.view().into_dimensionality::<Ix2>().unwrap();
            softmax_loss(s, &labels).unwrap().0
        },
        &scores.into_dyn(),
        1e-5,
    );

    assert_gradient_close("dscores", grad.into_dyn().view(), &numeric);
}

#[test]
fn test_softmax_loss_rejects_bad_labels() {
    let scores = ndarray::Array2::<f64>::zeros((2, 3));

    assert!(matches!(
        softmax_loss(scores.view(), &[0, 3]),
        Err(Error::InvalidLabel { label: 3, num_classes: 3 })
    ));
    assert!(matches!(
        softmax_loss(scores.view(), &[0]),
        Err(Error::ShapeMismatch { .. })
    ));
}
