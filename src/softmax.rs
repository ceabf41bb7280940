//! Loss and gradient of a linear softmax classifier, `scores = x · W`.
//!
//! Both functions take a `(D, C)` weight matrix, an `(N, D)` batch of feature
//! rows, one label per row and an L2 regularization strength, and return the
//! mean cross-entropy loss plus `0.5 * reg * sum(W²)` together with the
//! gradient with respect to `W`. The loop version exists as a readable
//! reference for the matrix version; the two agree to floating-point
//! tolerance.

use crate::{loss::validate_labels, tensor::square_sum, Error, Result, Scalar};
use ndarray::{Array2, Axis};
use tracing::warn;

fn check_inputs<A: Scalar>(weight: &Array2<A>, features: &Array2<A>, labels: &[usize]) -> Result<()> {
    if features.ncols() != weight.nrows() {
        return Err(Error::ShapeMismatch {
            expected: vec![weight.nrows()],
            actual: vec![features.ncols()],
        });
    }

    if features.nrows() == 0 {
        return Err(Error::Layer(
            "Softmax loss needs at least one example".to_string(),
        ));
    }

    validate_labels(labels, features.nrows(), weight.ncols())
}

/// Softmax loss computed one example and one class at a time.
///
/// Same full gradient as [`softmax_loss_vectorized`].
pub fn softmax_loss_naive<A: Scalar>(
    weight: &Array2<A>,
    features: &Array2<A>,
    labels: &[usize],
    reg: A,
) -> Result<(A, Array2<A>)> {
    check_inputs(weight, features, labels)?;

    let (num_train, dim) = features.dim();
    let num_classes = weight.ncols();

    let mut loss = A::zero();
    let mut grad = Array2::zeros(weight.raw_dim());
    let mut scores = vec![A::zero(); num_classes];

    for (i, &label) in labels.iter().enumerate() {
        let row = features.row(i);

        for (j, score) in scores.iter_mut().enumerate() {
            *score = A::zero();
            for d in 0..dim {
                *score += row[d] * weight[[d, j]];
            }
        }

        // shift by the row maximum so exp() cannot overflow
        let max = scores.iter().fold(A::neg_infinity(), |m, &s| m.max(s));
        let mut sum = A::zero();
        for score in scores.iter_mut() {
            *score -= max;
            sum += score.exp();
        }
        let log_sum = sum.ln();

        loss += log_sum - scores[label];

        for (j, &score) in scores.iter().enumerate() {
            let mut coeff = (score - log_sum).exp();
            if j == label {
                coeff -= A::one();
            }
            for d in 0..dim {
                grad[[d, j]] += row[d] * coeff;
            }
        }
    }

    let n = A::from_f64(num_train as f64);
    let half = A::from_f64(0.5);

    loss = loss / n + half * reg * square_sum(weight);
    grad /= n;
    grad.scaled_add(reg, weight);

    if !loss.is_finite() {
        warn!(loss = %loss, "naive softmax loss is not finite");
    }

    Ok((loss, grad))
}

/// Softmax loss computed with whole-matrix operations.
///
/// The gradient is the full softmax gradient: example `x` with label `y` adds
/// `x * (p_y - 1)` to column `y` and `x * p_j` to every other column `j`.
/// Implementations that only update the true-class column report different
/// numbers.
pub fn softmax_loss_vectorized<A: Scalar>(
    weight: &Array2<A>,
    features: &Array2<A>,
    labels: &[usize],
    reg: A,
) -> Result<(A, Array2<A>)> {
    check_inputs(weight, features, labels)?;

    let n = A::from_f64(features.nrows() as f64);
    let half = A::from_f64(0.5);

    let mut scores = features.dot(weight);
    let row_max = scores.fold_axis(Axis(1), A::neg_infinity(), |&m, &v| m.max(v));
    scores -= &row_max.insert_axis(Axis(1));

    let log_norm = scores
        .mapv(|v| v.exp())
        .sum_axis(Axis(1))
        .mapv(|v| v.ln());

    let correct = labels
        .iter()
        .enumerate()
        .fold(A::zero(), |acc, (i, &label)| acc + scores[[i, label]]);

    let loss = (log_norm.sum() - correct) / n + half * reg * square_sum(weight);

    let mut coeff = (scores - &log_norm.insert_axis(Axis(1))).mapv(|v| v.exp());
    for (i, &label) in labels.iter().enumerate() {
        coeff[[i, label]] -= A::one();
    }

    let mut grad = features.t().dot(&coeff);
    grad /= n;
    grad.scaled_add(reg, weight);

    if !loss.is_finite() {
        warn!(loss = %loss, "vectorized softmax loss is not finite");
    }

    Ok((loss, grad))
}
