#![allow(dead_code)]
use ndarray::{arr1, arr2, Array2, Array4, ArrayView2, ArrayView4};
use perturb_rs::loss::cross_entropy;
use perturb_rs::{AttackConfig, AttackError, Classifier, DNN};
use rand::SeedableRng;
use rand_pcg::Pcg64;

pub fn gray_image(size: usize) -> Array4<f64> {
    Array4::from_elem((1, 3, size, size), 0.5)
}

/// Two-class logits linear in the channel means.
pub fn linear_stub() -> DNN {
    DNN::mean_pool_linear(
        arr2(&[[1., 0.5, -1.], [-1., 0.25, 1.5]]),
        arr1(&[0., 0.]),
    )
}

pub fn small_cnn(seed: u64, num_classes: usize) -> DNN {
    let mut rng = Pcg64::seed_from_u64(seed);
    DNN::random_cnn(3, 6, num_classes, &mut rng)
}

pub fn loss_of<C: Classifier>(model: &C, image: ArrayView4<f64>, label: usize) -> f64 {
    cross_entropy(model.forward(image).unwrap().view(), label)
        .unwrap()
        .0
}

/// The end-to-end scenario: 5 L∞ sign steps of 0.01 inside a 0.03 ball.
pub fn scenario_config(targeted: bool) -> AttackConfig {
    AttackConfig {
        epsilon: 0.03,
        num_steps: 5,
        step_size: 0.01,
        targeted,
        image_width: 32,
        momentum: 0.,
        lam: 0.,
        prob: 0.,
        ti_size: 1,
        rand_init: false,
        ..AttackConfig::default()
    }
}

/// Wraps a model but only exposes the plain forward and backward passes.
pub struct ForwardOnly<C>(pub C);

impl<C: Classifier> Classifier for ForwardOnly<C> {
    fn num_classes(&self) -> usize {
        self.0.num_classes()
    }

    fn forward(&self, images: ArrayView4<f64>) -> Result<Array2<f64>, AttackError> {
        self.0.forward(images)
    }

    fn input_gradient(
        &self,
        images: ArrayView4<f64>,
        grad_logits: ArrayView2<f64>,
    ) -> Result<Array4<f64>, AttackError> {
        self.0.input_gradient(images, grad_logits)
    }
}
