//! Spatial pooling between the convolutional trunk and the classifier head
use crate::dnn::layer::Layer;
use crate::error::AttackError;
use crate::AttackFloat;
use ndarray::{ArrayD, Axis, Ix2, Ix4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(N, C, H, W) -> (N, C)` spatial mean
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GlobalAvgPool {}

impl GlobalAvgPool {
    pub const fn new() -> Self {
        Self {}
    }
}

impl Layer for GlobalAvgPool {
    fn forward(&self, input: &ArrayD<AttackFloat>) -> Result<ArrayD<AttackFloat>, AttackError> {
        let input = input.view().into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = input.dim();
        let pooled = input
            .mean_axis(Axis(3))
            .and_then(|rows| rows.mean_axis(Axis(2)))
            .ok_or_else(|| AttackError::shape_mismatch(&[n, c, 1, 1], &[n, c, h, w]))?;
        Ok(pooled.into_dyn())
    }

    fn backward(
        &self,
        input: &ArrayD<AttackFloat>,
        grad_output: &ArrayD<AttackFloat>,
    ) -> Result<ArrayD<AttackFloat>, AttackError> {
        let (n, c, h, w) = input.view().into_dimensionality::<Ix4>()?.dim();
        let grad = grad_output.view().into_dimensionality::<Ix2>()?;
        let spread = grad
            .insert_axis(Axis(2))
            .insert_axis(Axis(3))
            .broadcast((n, c, h, w))
            .ok_or_else(|| AttackError::shape_mismatch(&[n, c], grad_output.shape()))?
            .mapv(|g| g / (h * w) as AttackFloat);
        Ok(spread.into_dyn())
    }
}

impl fmt::Display for GlobalAvgPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GlobalAvgPool")
    }
}
