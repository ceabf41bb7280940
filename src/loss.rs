use crate::{Error, Result, Scalar};
use ndarray::{Array2, ArrayView2};
use tracing::warn;

/// Check one label per row, each inside `[0, num_classes)`.
pub fn validate_labels(labels: &[usize], batch_size: usize, num_classes: usize) -> Result<()> {
    if labels.len() != batch_size {
        return Err(Error::ShapeMismatch {
            expected: vec![batch_size],
            actual: vec![labels.len()],
        });
    }

    if let Some(&label) = labels.iter().find(|&&label| label >= num_classes) {
        return Err(Error::InvalidLabel { label, num_classes });
    }

    Ok(())
}

/// Softmax cross-entropy over a batch of class scores.
///
/// Returns the mean loss and its gradient with respect to `scores`. Every row
/// is shifted by its maximum before exponentiation and the loss is taken as
/// `log(sum(exp(shifted))) - shifted[label]`, so scores in the 1e8 range still
/// give a finite loss and gradient.
pub fn softmax_loss<A: Scalar>(scores: ArrayView2<'_, A>, labels: &[usize]) -> Result<(A, Array2<A>)> {
    let (batch_size, num_classes) = scores.dim();
    validate_labels(labels, batch_size, num_classes)?;

    if batch_size == 0 {
        return Err(Error::Layer(
            "Softmax loss needs at least one example".to_string(),
        ));
    }

    let mut grad = scores.to_owned();
    let mut loss = A::zero();

    for (mut row, &label) in grad.rows_mut().into_iter().zip(labels) {
        let max = row.fold(A::neg_infinity(), |m, &v| m.max(v));
        row.mapv_inplace(|v| v - max);

        let log_norm = row.fold(A::zero(), |acc, &v| acc + v.exp()).ln();
        loss += log_norm - row[label];

        row.mapv_inplace(|v| (v - log_norm).exp());
        row[label] -= A::one();
    }

    let n = A::from_f64(batch_size as f64);
    loss /= n;
    grad /= n;

    if !loss.is_finite() {
        warn!(loss = %loss, "softmax loss is not finite; scores contain NaN or infinity");
    }

    Ok((loss, grad))
}
