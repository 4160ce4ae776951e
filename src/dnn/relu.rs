use crate::dnn::layer::Layer;
use crate::error::AttackError;
use crate::AttackFloat;
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReLU {}

impl ReLU {
    pub const fn new() -> Self {
        Self {}
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "ReLU")
    }
}

impl Layer for ReLU {
    fn forward(
        &self,
        input: &ArrayD<AttackFloat>,
    ) -> std::result::Result<ArrayD<AttackFloat>, AttackError> {
        Ok(input.mapv(|x| if x.lt(&0.) { 0. } else { x }))
    }

    fn backward(
        &self,
        input: &ArrayD<AttackFloat>,
        grad_output: &ArrayD<AttackFloat>,
    ) -> std::result::Result<ArrayD<AttackFloat>, AttackError> {
        if input.shape() != grad_output.shape() {
            return Err(AttackError::shape_mismatch(
                input.shape(),
                grad_output.shape(),
            ));
        }
        Ok(Zip::from(input)
            .and(grad_output)
            .map_collect(|&x, &g| if x > 0. { g } else { 0. }))
    }

    /// Passes the gradient through unmasked
    fn linear_backward(
        &self,
        _input: &ArrayD<AttackFloat>,
        grad_output: &ArrayD<AttackFloat>,
    ) -> std::result::Result<ArrayD<AttackFloat>, AttackError> {
        Ok(grad_output.clone())
    }

    fn is_activation(&self) -> bool {
        true
    }
}
