use crate::dnn::{Conv, Dense, GlobalAvgPool, ReLU};
use crate::error::AttackError;
use crate::AttackFloat;
use enum_dispatch::enum_dispatch;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

/// Layers are stateless: identical inputs give identical outputs, and the
/// backward passes only need the input that was fed forward.
#[enum_dispatch]
pub trait Layer: Debug {
    /// # Errors
    /// If the input does not have the rank/shape the layer expects
    fn forward(&self, input: &ArrayD<AttackFloat>) -> Result<ArrayD<AttackFloat>, AttackError>;

    /// Vector-Jacobian product at `input`.
    ///
    /// # Errors
    fn backward(
        &self,
        input: &ArrayD<AttackFloat>,
        grad_output: &ArrayD<AttackFloat>,
    ) -> Result<ArrayD<AttackFloat>, AttackError>;

    /// Backward pass with the activation treated as the identity. Only differs
    /// from [`Layer::backward`] in activation layers.
    ///
    /// # Errors
    fn linear_backward(
        &self,
        input: &ArrayD<AttackFloat>,
        grad_output: &ArrayD<AttackFloat>,
    ) -> Result<ArrayD<AttackFloat>, AttackError> {
        self.backward(input, grad_output)
    }

    fn is_activation(&self) -> bool {
        // This should be implemented in activation layers to return true
        false
    }
}

#[enum_dispatch(Layer)]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum PhysicalLayer {
    Conv,
    Dense,
    ReLU,
    GlobalAvgPool,
}

impl fmt::Display for PhysicalLayer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Conv(l) => write!(f, "{}", l),
            Self::Dense(l) => write!(f, "{}", l),
            Self::ReLU(l) => write!(f, "{}", l),
            Self::GlobalAvgPool(l) => write!(f, "{}", l),
        }
    }
}
