#![allow(dead_code)]

use ndarray::{Array, ArrayD, ArrayViewD, Dimension, ShapeBuilder};
use pocket_convnet::{Model, MultiLayerConvNet, ParamId};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Array of standard normal samples.
pub fn randn<Sh, D>(shape: Sh, rng: &mut StdRng) -> Array<f64, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || StandardNormal.sample(&mut *rng))
}

/// Centered finite differences of `f` at `x`, one entry at a time.
pub fn numeric_gradient<F>(mut f: F, x: &ArrayD<f64>, h: f64) -> ArrayD<f64>
where
    F: FnMut(&ArrayD<f64>) -> f64,
{
    let mut probe = x.clone();
    let mut grad = ArrayD::zeros(x.raw_dim());

    for (idx, g) in grad.indexed_iter_mut() {
        let orig = probe[idx.slice()];

        probe[idx.slice()] = orig + h;
        let plus = f(&probe);
        probe[idx.slice()] = orig - h;
        let minus = f(&probe);
        probe[idx.slice()] = orig;

        *g = (plus - minus) / (2.0 * h);
    }

    grad
}

pub fn total_loss(net: &MultiLayerConvNet<f64>, input: &ndarray::Array4<f64>, labels: &[usize]) -> f64 {
    net.loss(input, Some(labels))
        .unwrap()
        .loss()
        .expect("labels were given")
}

/// Finite-difference gradient of the network loss with respect to one
/// parameter tensor. Leaves the parameters as it found them.
pub fn network_numeric_gradient(
    net: &mut MultiLayerConvNet<f64>,
    input: &ndarray::Array4<f64>,
    labels: &[usize],
    id: ParamId,
    h: f64,
) -> ArrayD<f64> {
    let original = net.params().get(id).unwrap().to_owned();

    let grad = numeric_gradient(
        |probe| {
            net.params_mut().get_mut(id).unwrap().assign(probe);
            total_loss(net, input, labels)
        },
        &original,
        h,
    );

    net.params_mut().get_mut(id).unwrap().assign(&original);
    grad
}

/// Every entry must agree to a relative tolerance of 1e-5, with an absolute
/// floor of 1e-8 for entries that are (nearly) zero.
pub fn assert_gradient_close(name: &str, analytic: ArrayViewD<'_, f64>, numeric: &ArrayD<f64>) {
    assert_eq!(analytic.shape(), numeric.shape(), "{}: shape", name);

    for (i, (&a, &n)) in analytic.iter().zip(numeric.iter()).enumerate() {
        let tolerance = 1e-5 * a.abs().max(n.abs()) + 1e-8;
        assert!(
            (a - n).abs() <= tolerance,
            "{}[{}]: analytic {} vs numeric {}",
            name,
            i,
            a,
            n
        );
    }
}
