//! The gradient provider the attacks are run against.
use crate::error::AttackError;
use crate::AttackFloat;
use ndarray::{Array2, Array4, ArrayD, ArrayView2, ArrayView4, ArrayViewD};

/// A differentiable image classifier.
///
/// Images are NCHW batches in `[0, 1]`, logits are `(batch, classes)`. The
/// attacks only ever need vector-Jacobian products, so a model supplies the
/// gradient w.r.t. its input for a given upstream gradient on its outputs.
///
/// The linearized backward pass and the intermediate feature hooks are
/// optional; a model that does not provide them reports
/// [`AttackError::UnsupportedCapability`].
pub trait Classifier {
    fn num_classes(&self) -> usize;

    /// # Errors
    fn forward(&self, images: ArrayView4<AttackFloat>) -> Result<Array2<AttackFloat>, AttackError>;

    /// # Errors
    fn input_gradient(
        &self,
        images: ArrayView4<AttackFloat>,
        grad_logits: ArrayView2<AttackFloat>,
    ) -> Result<Array4<AttackFloat>, AttackError>;

    /// Like [`Classifier::input_gradient`], but every activation from `layer`
    /// onwards passes the gradient through as if it were linear.
    ///
    /// # Errors
    fn linearized_input_gradient(
        &self,
        _images: ArrayView4<AttackFloat>,
        _grad_logits: ArrayView2<AttackFloat>,
        _layer: usize,
    ) -> Result<Array4<AttackFloat>, AttackError> {
        Err(AttackError::UnsupportedCapability {
            capability: "linearized backprop",
        })
    }

    /// Output of the layer at index `layer`.
    ///
    /// # Errors
    fn features(
        &self,
        _images: ArrayView4<AttackFloat>,
        _layer: usize,
    ) -> Result<ArrayD<AttackFloat>, AttackError> {
        Err(AttackError::UnsupportedCapability {
            capability: "intermediate features",
        })
    }

    /// Gradient w.r.t. the input of a scalar whose gradient w.r.t.
    /// `features(images, layer)` is `grad_features`.
    ///
    /// # Errors
    fn feature_input_gradient(
        &self,
        _images: ArrayView4<AttackFloat>,
        _grad_features: ArrayViewD<AttackFloat>,
        _layer: usize,
    ) -> Result<Array4<AttackFloat>, AttackError> {
        Err(AttackError::UnsupportedCapability {
            capability: "intermediate features",
        })
    }
}
