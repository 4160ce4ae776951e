use crate::dnn::layer::Layer;
use crate::error::AttackError;
use crate::AttackFloat;
use ndarray::{Array1, Array2, ArrayD, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `y = x W^T + b` on `(batch, in)` inputs
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Dense {
    weight: Array2<AttackFloat>, // (out, in)
    bias: Array1<AttackFloat>,   // (out)
}

impl Dense {
    /// # Panics
    pub fn new(weight: Array2<AttackFloat>, bias: Array1<AttackFloat>) -> Self {
        assert_eq!(weight.nrows(), bias.len());
        Self { weight, bias }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.nrows()
    }
}

impl Layer for Dense {
    fn forward(&self, input: &ArrayD<AttackFloat>) -> Result<ArrayD<AttackFloat>, AttackError> {
        let input = input.view().into_dimensionality::<Ix2>()?;
        if input.ncols() != self.input_dim() {
            return Err(AttackError::shape_mismatch(
                &[input.nrows(), self.input_dim()],
                input.shape(),
            ));
        }
        Ok((input.dot(&self.weight.t()) + &self.bias).into_dyn())
    }

    fn backward(
        &self,
        _input: &ArrayD<AttackFloat>,
        grad_output: &ArrayD<AttackFloat>,
    ) -> Result<ArrayD<AttackFloat>, AttackError> {
        let grad = grad_output.view().into_dimensionality::<Ix2>()?;
        Ok(grad.dot(&self.weight).into_dyn())
    }
}

impl fmt::Display for Dense {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dense {}", self.output_dim())
    }
}
