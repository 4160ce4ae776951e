//! Scalar objectives and their gradients w.r.t. model outputs.
use crate::error::AttackError;
use crate::AttackFloat;
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis, Zip};
use ndarray_stats::QuantileExt;

pub fn log_softmax(logits: ArrayView2<AttackFloat>) -> Array2<AttackFloat> {
    let mut out = logits.to_owned();
    out.rows_mut().into_iter().for_each(|mut row| {
        let max = row.fold(AttackFloat::NEG_INFINITY, |acc, &v| acc.max(v));
        let log_sum = row.mapv(|v| (v - max).exp()).sum().ln() + max;
        row -= log_sum;
    });
    out
}

pub fn softmax(logits: ArrayView2<AttackFloat>) -> Array2<AttackFloat> {
    log_softmax(logits).mapv_into(AttackFloat::exp)
}

/// Mean softmax cross-entropy of every row against the same `label`.
///
/// Returns the loss and its gradient w.r.t. the logits, `(softmax - onehot) / batch`.
///
/// # Errors
/// If `label` is not a valid column of `logits`
pub fn cross_entropy(
    logits: ArrayView2<AttackFloat>,
    label: usize,
) -> Result<(AttackFloat, Array2<AttackFloat>), AttackError> {
    let (batch, num_classes) = logits.dim();
    if label >= num_classes {
        return Err(AttackError::LabelOutOfRange { label, num_classes });
    }
    let log_probs = log_softmax(logits);
    let loss = -log_probs.column(label).sum() / batch as AttackFloat;
    let mut grad = log_probs.mapv_into(AttackFloat::exp);
    grad.column_mut(label).mapv_inplace(|p| p - 1.);
    grad /= batch as AttackFloat;
    Ok((loss, grad))
}

/// Projection of the new feature displacement onto the reference displacement,
/// averaged over the batch. The gradient w.r.t. `new_mid` is constant.
pub fn ila_projection_loss(
    old_attack_mid: ArrayViewD<AttackFloat>,
    new_mid: ArrayViewD<AttackFloat>,
    original_mid: ArrayViewD<AttackFloat>,
) -> (AttackFloat, ArrayD<AttackFloat>) {
    debug_assert_eq!(old_attack_mid.shape(), new_mid.shape());
    debug_assert_eq!(original_mid.shape(), new_mid.shape());
    let n = new_mid.len_of(Axis(0)) as AttackFloat;
    let reference = &old_attack_mid - &original_mid;
    let displacement = &new_mid - &original_mid;
    let loss = Zip::from(&reference)
        .and(&displacement)
        .fold(0., |acc, &x, &y| acc + x * y)
        / n;
    (loss, reference / n)
}

/// Index of the largest entry of `row` with `excluded` masked out.
pub fn runner_up(row: ArrayView1<AttackFloat>, excluded: usize) -> Option<usize> {
    if row.len() < 2 {
        return None;
    }
    let mut masked = row.to_owned();
    masked[excluded] = AttackFloat::NEG_INFINITY;
    masked.argmax().ok()
}
