use crate::classifier::Classifier;
use crate::dnn::layer::{Layer, PhysicalLayer};
use crate::dnn::{Conv, Dense, GlobalAvgPool, ReLU};
use crate::error::AttackError;
use crate::AttackFloat;
use log::trace;
use ndarray::{Array1, Array2, Array4, ArrayD, ArrayView2, ArrayView4, ArrayViewD, Ix2, Ix4};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential network usable as a [`Classifier`], including the linearized
/// backward pass and intermediate feature hooks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DNN {
    layers: Vec<PhysicalLayer>,
    num_classes: usize,
}

impl DNN {
    pub fn new(layers: Vec<PhysicalLayer>, num_classes: usize) -> Self {
        Self {
            layers,
            num_classes,
        }
    }

    /// `logits = W * mean_pool(image) + b`, linear in the input image
    pub fn mean_pool_linear(weight: Array2<AttackFloat>, bias: Array1<AttackFloat>) -> Self {
        let num_classes = weight.nrows();
        Self::new(
            vec![
                GlobalAvgPool::new().into(),
                Dense::new(weight, bias).into(),
            ],
            num_classes,
        )
    }

    /// Two 3x3 conv/ReLU blocks, global pooling and a dense head with
    /// normally distributed weights.
    ///
    /// # Panics
    pub fn random_cnn<R: Rng>(
        channels_in: usize,
        hidden: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Self {
        let conv_scale = (2. / (9 * channels_in) as AttackFloat).sqrt();
        let hidden_scale = (2. / (9 * hidden) as AttackFloat).sqrt();
        let dense_scale = (1. / hidden as AttackFloat).sqrt();
        let conv1 = Conv::new(
            Array4::random_using(
                (hidden, channels_in, 3, 3),
                Normal::new(0., conv_scale).unwrap(),
                rng,
            ),
            Array1::zeros(hidden),
            (1, 1),
            (1, 1),
        );
        let conv2 = Conv::new(
            Array4::random_using(
                (hidden, hidden, 3, 3),
                Normal::new(0., hidden_scale).unwrap(),
                rng,
            ),
            Array1::zeros(hidden),
            (1, 1),
            (1, 1),
        );
        let head = Dense::new(
            Array2::random_using(
                (num_classes, hidden),
                Normal::new(0., dense_scale).unwrap(),
                rng,
            ),
            Array1::random_using(num_classes, Normal::new(0., 0.1).unwrap(), rng),
        );
        Self::new(
            vec![
                conv1.into(),
                ReLU::new().into(),
                conv2.into(),
                ReLU::new().into(),
                GlobalAvgPool::new().into(),
                head.into(),
            ],
            num_classes,
        )
    }

    fn check_layer_idx(&self, layer: usize, field: &'static str) -> Result<(), AttackError> {
        if layer >= self.layers.len() {
            return Err(AttackError::invalid(
                field,
                format!("layer {} out of range for {} layers", layer, self.layers.len()),
            ));
        }
        Ok(())
    }

    /// # Returns
    /// `activations[i]` is the input of layer `i`, the last entry is the output
    /// of layer `end - 1`.
    fn forward_trace(
        &self,
        images: ArrayView4<AttackFloat>,
        end: usize,
    ) -> Result<Vec<ArrayD<AttackFloat>>, AttackError> {
        let mut activations = Vec::with_capacity(end + 1);
        activations.push(images.to_owned().into_dyn());
        for layer in &self.layers[..end] {
            let next = layer.forward(activations.last().unwrap())?;
            activations.push(next);
        }
        Ok(activations)
    }

    /// Runs the backward pass over the layers that produced `activations`.
    /// Activation layers at an index `>= linear_from` skip their gating.
    fn backward_trace(
        &self,
        activations: &[ArrayD<AttackFloat>],
        grad_output: ArrayD<AttackFloat>,
        linear_from: Option<usize>,
    ) -> Result<Array4<AttackFloat>, AttackError> {
        let end = activations.len() - 1;
        let mut grad = grad_output;
        for idx in (0..end).rev() {
            let layer = &self.layers[idx];
            grad = match linear_from {
                Some(from) if idx >= from && layer.is_activation() => {
                    trace!("linearized backward through layer {} ({})", idx, layer);
                    layer.linear_backward(&activations[idx], &grad)?
                }
                _ => layer.backward(&activations[idx], &grad)?,
            };
        }
        Ok(grad.into_dimensionality::<Ix4>()?)
    }

    fn logits(&self, output: ArrayD<AttackFloat>) -> Result<Array2<AttackFloat>, AttackError> {
        let logits = output.into_dimensionality::<Ix2>()?;
        if logits.ncols() != self.num_classes {
            return Err(AttackError::shape_mismatch(
                &[logits.nrows(), self.num_classes],
                logits.shape(),
            ));
        }
        Ok(logits)
    }
}

impl Classifier for DNN {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, images: ArrayView4<AttackFloat>) -> Result<Array2<AttackFloat>, AttackError> {
        let mut activations = self.forward_trace(images, self.layers.len())?;
        self.logits(activations.pop().unwrap())
    }

    fn input_gradient(
        &self,
        images: ArrayView4<AttackFloat>,
        grad_logits: ArrayView2<AttackFloat>,
    ) -> Result<Array4<AttackFloat>, AttackError> {
        let activations = self.forward_trace(images, self.layers.len())?;
        self.backward_trace(&activations, grad_logits.to_owned().into_dyn(), None)
    }

    fn linearized_input_gradient(
        &self,
        images: ArrayView4<AttackFloat>,
        grad_logits: ArrayView2<AttackFloat>,
        layer: usize,
    ) -> Result<Array4<AttackFloat>, AttackError> {
        self.check_layer_idx(layer, "linbp_layer")?;
        let activations = self.forward_trace(images, self.layers.len())?;
        self.backward_trace(&activations, grad_logits.to_owned().into_dyn(), Some(layer))
    }

    fn features(
        &self,
        images: ArrayView4<AttackFloat>,
        layer: usize,
    ) -> Result<ArrayD<AttackFloat>, AttackError> {
        self.check_layer_idx(layer, "ila_layer")?;
        let mut activations = self.forward_trace(images, layer + 1)?;
        Ok(activations.pop().unwrap())
    }

    fn feature_input_gradient(
        &self,
        images: ArrayView4<AttackFloat>,
        grad_features: ArrayViewD<AttackFloat>,
        layer: usize,
    ) -> Result<Array4<AttackFloat>, AttackError> {
        self.check_layer_idx(layer, "ila_layer")?;
        let activations = self.forward_trace(images, layer + 1)?;
        let features = activations.last().unwrap();
        if features.shape() != grad_features.shape() {
            return Err(AttackError::shape_mismatch(
                features.shape(),
                grad_features.shape(),
            ));
        }
        self.backward_trace(&activations, grad_features.to_owned(), None)
    }
}

impl fmt::Display for DNN {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let layers: Vec<String> = self.layers.iter().map(|x| format!("{}", x)).collect();
        write!(f, "{} => {} classes", layers.join(" => "), self.num_classes)
    }
}
