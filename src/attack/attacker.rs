use super::state::AttackState;
use super::trajectory::{AttackOutcome, LossRecord, StepLosses, Trajectory};
use crate::classifier::Classifier;
use crate::config::{AttackConfig, AttackMethod, ExecutionContext};
use crate::diversity::InputDiversity;
use crate::error::AttackError;
use crate::interaction::{InteractionLoss, InteractionSampler};
use crate::loss::{cross_entropy, ila_projection_loss};
use crate::norms::{batch_linf, batch_pnorm, rand_init_delta, PNorm};
use crate::smoothing::SmoothingKernel;
use crate::AttackFloat;
use log::{debug, info};
use ndarray::{Array4, ArrayView4, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// How the primary loss is differentiated w.r.t. the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradientPath {
    Direct,
    /// Activations from `layer` onwards are treated as identities on the way back
    Linearized { layer: usize },
}

/// Projected iterative attack with momentum, input diversity,
/// translation-invariant smoothing, variance reduction and interaction reduction.
///
/// Built once from an [`AttackConfig`]; every call to [`ProjectionAttacker::perturb`]
/// starts from a fresh [`AttackState`].
#[derive(Clone, Debug)]
pub struct ProjectionAttacker {
    config: AttackConfig,
    method: AttackMethod,
    context: ExecutionContext,
    kernel: Option<SmoothingKernel>,
    diversity: InputDiversity,
    sampler: InteractionSampler,
    noise: Option<Normal<AttackFloat>>,
    rng: StdRng,
}

impl ProjectionAttacker {
    /// # Errors
    /// If the configuration does not validate
    pub fn new(config: AttackConfig, context: ExecutionContext) -> Result<Self, AttackError> {
        config.validate()?;
        let kernel = if config.ti_size > 1 {
            Some(SmoothingKernel::new(config.ti_size))
        } else {
            None
        };
        let noise = if config.m >= 1 {
            Some(
                Normal::new(0., config.sigma / 255.)
                    .map_err(|e| AttackError::invalid("sigma", e.to_string()))?,
            )
        } else {
            None
        };
        let diversity = InputDiversity::new(config.image_width, config.image_resize, config.prob);
        let sampler = InteractionSampler::new(
            config.sample_grid_num,
            config.grid_scale,
            config.image_width,
            config.sample_times,
        );
        info!("Attacker on {:?}: {}", context.device, config);
        Ok(Self {
            method: config.method(),
            rng: StdRng::seed_from_u64(context.seed),
            config,
            context,
            kernel,
            diversity,
            sampler,
            noise,
        })
    }

    pub const fn config(&self) -> &AttackConfig {
        &self.config
    }

    pub const fn method(&self) -> AttackMethod {
        self.method
    }

    pub const fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub const fn kernel(&self) -> Option<&SmoothingKernel> {
        self.kernel.as_ref()
    }

    /// Zero perturbation, or a random point in the ball when random starts are
    /// requested and the interaction term is off.
    pub fn init_state(&mut self, image: ArrayView4<AttackFloat>) -> AttackState {
        if self.config.rand_init && self.config.lam == 0. {
            let delta = rand_init_delta(image, self.config.ord, self.config.epsilon, &mut self.rng);
            AttackState::with_delta(delta)
        } else {
            AttackState::zeros(image)
        }
    }

    /// Runs `num_steps` iterations along the direct gradient.
    ///
    /// # Errors
    /// On shape or label contract violations, or model failures
    pub fn perturb<M: Classifier + ?Sized>(
        &mut self,
        model: &M,
        image: ArrayView4<AttackFloat>,
        label: usize,
    ) -> Result<AttackOutcome, AttackError> {
        check_inputs(model, image, label)?;
        let mut state = self.init_state(image);
        let outcome = self.iterate(model, image, label, &mut state, GradientPath::Direct)?;
        info!("Attack finished: {}", outcome);
        Ok(outcome)
    }

    /// Like [`ProjectionAttacker::perturb`], but follows the linearized backward pass
    /// when the method asks for it, then refines at an intermediate layer when
    /// the method asks for that. The refinement trajectory replaces the main one.
    ///
    /// # Errors
    /// [`AttackError::UnsupportedCapability`] if the model lacks a hook the method needs
    pub fn perturb_with_alternate_gradient_path<M: Classifier + ?Sized>(
        &mut self,
        model: &M,
        image: ArrayView4<AttackFloat>,
        label: usize,
    ) -> Result<AttackOutcome, AttackError> {
        check_inputs(model, image, label)?;
        let path = if self.method.linearized_backprop {
            GradientPath::Linearized {
                layer: self.config.linbp_layer,
            }
        } else {
            GradientPath::Direct
        };
        let mut state = self.init_state(image);
        let mut outcome = self.iterate(model, image, label, &mut state, path)?;
        if self.method.ila_refine {
            let attack_image = state.adversarial(image);
            outcome.trajectory = self.ila_refine(model, image, attack_image.view())?;
        }
        info!("Attack finished: {}", outcome);
        Ok(outcome)
    }

    fn iterate<M: Classifier + ?Sized>(
        &mut self,
        model: &M,
        image: ArrayView4<AttackFloat>,
        label: usize,
        state: &mut AttackState,
        path: GradientPath,
    ) -> Result<AttackOutcome, AttackError> {
        let mut trajectory = Trajectory::with_capacity(self.config.num_steps);
        let mut loss_record = LossRecord::new();
        for _ in 0..self.config.num_steps {
            let losses = self.step(model, image, label, state, path)?;
            loss_record.push(&losses);
            trajectory.push(state.adversarial(image));
        }
        Ok(AttackOutcome {
            trajectory,
            loss_record,
        })
    }

    /// One iteration: transform, differentiate, smooth, accumulate, step, project.
    ///
    /// Returns the losses evaluated before the update.
    ///
    /// # Errors
    /// Propagates model failures
    pub fn step<M: Classifier + ?Sized>(
        &mut self,
        model: &M,
        image: ArrayView4<AttackFloat>,
        label: usize,
        state: &mut AttackState,
        path: GradientPath,
    ) -> Result<StepLosses, AttackError> {
        let adversarial = state.adversarial(image);
        let diversified = self.diversity.transform(adversarial.view(), &mut self.rng);
        let (mut primary, transformed_grad) =
            self.primary_loss(model, diversified.image(), label, path)?;
        let mut raw = diversified.backward(transformed_grad.view());
        if self.config.targeted {
            primary = -primary;
            raw.mapv_inplace(|g| -g);
        }

        let (interaction, total) = if self.config.interaction_enabled() {
            let (value, grad) = self.interaction(model, image, state.delta(), label)?;
            // subtracting from zero keeps an empty interaction at +0 in the record
            if self.config.lam.is_infinite() {
                raw = -grad;
                (0. - value, 0. - value)
            } else {
                raw.scaled_add(-self.config.lam, &grad);
                let weighted = 0. - self.config.lam * value;
                (weighted, primary + weighted)
            }
        } else {
            (0., primary)
        };

        if let Some(kernel) = &self.kernel {
            raw = kernel.apply(raw.view());
        }
        state.accumulate_gradient(raw.view(), self.config.momentum);
        state.take_step(
            image,
            self.config.step_size,
            self.config.epsilon,
            self.config.ord,
        );
        debug!(
            "step {}: loss1 {:.5} loss2 {:.5} loss {:.5} |delta|_inf {:.4} |delta|_2 {:.4}",
            state.step_index(),
            primary,
            interaction,
            total,
            batch_linf(state.delta())[0],
            batch_pnorm(state.delta(), PNorm::L2)[0]
        );
        Ok(StepLosses {
            primary,
            interaction,
            total,
        })
    }

    /// Cross-entropy on the transformed input, averaged over noisy replicas when
    /// variance reduction is on, with its gradient w.r.t. the transformed input.
    fn primary_loss<M: Classifier + ?Sized>(
        &mut self,
        model: &M,
        transformed: ArrayView4<AttackFloat>,
        label: usize,
        path: GradientPath,
    ) -> Result<(AttackFloat, Array4<AttackFloat>), AttackError> {
        let input = self.noisy_replicas(transformed);
        let logits = model.forward(input.view())?;
        let (loss, grad_logits) = cross_entropy(logits.view(), label)?;
        let grad = match path {
            GradientPath::Direct => model.input_gradient(input.view(), grad_logits.view())?,
            GradientPath::Linearized { layer } => {
                model.linearized_input_gradient(input.view(), grad_logits.view(), layer)?
            }
        };
        Ok((loss, grad.sum_axis(Axis(0)).insert_axis(Axis(0))))
    }

    /// `m` copies of `transformed` with independent `N(0, sigma / 255)` pixel noise,
    /// or `transformed` itself when variance reduction is off.
    fn noisy_replicas(&mut self, transformed: ArrayView4<AttackFloat>) -> Array4<AttackFloat> {
        match self.noise {
            Some(noise) => {
                let (_, c, h, w) = transformed.dim();
                Array4::random_using((self.config.m, c, h, w), noise, &mut self.rng) + transformed
            }
            None => transformed.to_owned(),
        }
    }

    /// Interaction between regions of `delta` against the runner-up class of
    /// `image + delta`, with its gradient w.r.t. `delta`.
    fn interaction<M: Classifier + ?Sized>(
        &mut self,
        model: &M,
        image: ArrayView4<AttackFloat>,
        delta: ArrayView4<AttackFloat>,
        label: usize,
    ) -> Result<(AttackFloat, Array4<AttackFloat>), AttackError> {
        let logits = model.forward((&image + &delta).view())?;
        let loss = match InteractionLoss::against_runner_up(logits.row(0), label) {
            Some(loss) => loss,
            None => return Ok((0., Array4::zeros(delta.raw_dim()))),
        };
        let masked = self.sampler.sample(delta, &mut self.rng);
        loss.evaluate(model, image, delta, &masked)
    }

    /// Restarts from `image` and pushes the features at `ila_layer` along the
    /// displacement `attack_image` achieved, for `ila_niters` plain steps.
    fn ila_refine<M: Classifier + ?Sized>(
        &self,
        model: &M,
        image: ArrayView4<AttackFloat>,
        attack_image: ArrayView4<AttackFloat>,
    ) -> Result<Trajectory, AttackError> {
        let layer = self.config.ila_layer;
        let original_mid = model.features(image, layer)?;
        let attack_mid = model.features(attack_image, layer)?;
        let mut state = AttackState::zeros(image);
        let mut trajectory = Trajectory::with_capacity(self.config.ila_niters);
        for _ in 0..self.config.ila_niters {
            let adversarial = state.adversarial(image);
            let mid = model.features(adversarial.view(), layer)?;
            let (loss, grad_mid) =
                ila_projection_loss(attack_mid.view(), mid.view(), original_mid.view());
            let grad = model.feature_input_gradient(adversarial.view(), grad_mid.view(), layer)?;
            state.take_raw_step(
                grad.view(),
                image,
                self.config.step_size,
                self.config.epsilon,
                self.config.ord,
            );
            debug!("ila step {}: projection {:.5}", state.step_index(), loss);
            trajectory.push(state.adversarial(image));
        }
        Ok(trajectory)
    }
}

fn check_inputs<M: Classifier + ?Sized>(
    model: &M,
    image: ArrayView4<AttackFloat>,
    label: usize,
) -> Result<(), AttackError> {
    if image.len_of(Axis(0)) != 1 {
        let mut expected = image.shape().to_vec();
        expected[0] = 1;
        return Err(AttackError::shape_mismatch(&expected, image.shape()));
    }
    let num_classes = model.num_classes();
    if label >= num_classes {
        return Err(AttackError::LabelOutOfRange { label, num_classes });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::trajectory::{INTERACTION_LOSS, PRIMARY_LOSS, TOTAL_LOSS};
    use crate::config::NormOrder;
    use crate::dnn::DNN;
    use crate::norms::normalize_by_pnorm;
    use approx::assert_abs_diff_eq;
    use more_asserts::assert_le;
    use ndarray::{arr1, arr2};

    fn test_image() -> Array4<AttackFloat> {
        Array4::from_shape_fn((1, 3, 8, 8), |(_, c, y, x)| {
            0.2 + 0.6 * ((c * 7 + y * 5 + x * 3) % 13) as AttackFloat / 13.
        })
    }

    fn small_config() -> AttackConfig {
        AttackConfig {
            epsilon: 0.05,
            num_steps: 4,
            step_size: 0.01,
            image_width: 8,
            image_resize: 10,
            grid_scale: 4,
            sample_times: 4,
            sample_grid_num: 3,
            lam: 0.,
            rand_init: false,
            ..AttackConfig::default()
        }
    }

    fn linear_model() -> DNN {
        DNN::mean_pool_linear(
            arr2(&[[1., -0.5, 0.2], [-0.3, 1., 0.4], [0.1, 0.2, -1.]]),
            arr1(&[0.1, 0., -0.1]),
        )
    }

    #[test]
    fn test_trajectory_length_and_shape() {
        let image = test_image();
        let mut attacker =
            ProjectionAttacker::new(small_config(), ExecutionContext::cpu(0)).unwrap();
        let outcome = attacker.perturb(&linear_model(), image.view(), 1).unwrap();
        assert_eq!(outcome.trajectory.len(), 4);
        assert_eq!(outcome.loss_record.len(), 4);
        assert!(outcome.trajectory.iter().all(|adv| adv.shape() == image.shape()));
        assert_eq!(
            outcome.loss_record.get(INTERACTION_LOSS),
            Some(&[0., 0., 0., 0.][..])
        );
    }

    #[test]
    fn test_zero_steps() {
        let config = AttackConfig {
            num_steps: 0,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
        let outcome = attacker
            .perturb(&linear_model(), test_image().view(), 0)
            .unwrap();
        assert!(outcome.trajectory.is_empty());
        assert!(outcome.loss_record.is_empty());
    }

    #[test]
    fn test_every_configuration_stays_feasible() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = DNN::random_cnn(3, 4, 3, &mut rng);
        let image = test_image();
        for ord in [NormOrder::Inf, NormOrder::L2] {
            let config = AttackConfig {
                ord,
                momentum: 0.9,
                ti_size: 3,
                lam: 0.5,
                m: 2,
                prob: 0.7,
                ..small_config()
            };
            let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(5)).unwrap();
            let outcome = attacker.perturb(&model, image.view(), 2).unwrap();
            assert_eq!(outcome.trajectory.len(), 4);
            for adversarial in outcome.trajectory.iter() {
                let delta = &adversarial - &image;
                assert!(adversarial.iter().all(|v| (0. ..=1.).contains(v)));
                match ord {
                    NormOrder::Inf => assert_le!(batch_linf(delta.view())[0], 0.05 + 1e-12),
                    NormOrder::L2 => {
                        assert_le!(batch_pnorm(delta.view(), PNorm::L2)[0], 0.05 + 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn test_infinite_lam_drops_primary_loss() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = DNN::random_cnn(3, 4, 3, &mut rng);
        let config = AttackConfig {
            lam: AttackFloat::INFINITY,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(2)).unwrap();
        let outcome = attacker.perturb(&model, test_image().view(), 0).unwrap();
        let record = outcome.loss_record;
        let primary = record.get(PRIMARY_LOSS).unwrap();
        assert_eq!(record.get(TOTAL_LOSS), record.get(INTERACTION_LOSS));
        assert!(primary.iter().all(|l| *l > 0.));
    }

    #[test]
    fn test_finite_lam_combines_losses() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = DNN::random_cnn(3, 4, 3, &mut rng);
        let config = AttackConfig {
            lam: 2.,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(2)).unwrap();
        let record = attacker
            .perturb(&model, test_image().view(), 0)
            .unwrap()
            .loss_record;
        let primary = record.get(PRIMARY_LOSS).unwrap();
        let interaction = record.get(INTERACTION_LOSS).unwrap();
        let total = record.get(TOTAL_LOSS).unwrap();
        // no perturbation yet, so nothing to interact
        assert_abs_diff_eq!(interaction[0], 0., epsilon = 1e-12);
        for i in 0..total.len() {
            assert_abs_diff_eq!(total[i], primary[i] + interaction[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let config = AttackConfig {
            rand_init: true,
            prob: 0.5,
            m: 3,
            ..small_config()
        };
        let run = || {
            let mut attacker =
                ProjectionAttacker::new(config.clone(), ExecutionContext::cpu(11)).unwrap();
            attacker
                .perturb(&linear_model(), test_image().view(), 2)
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_rand_init_only_without_interaction() {
        let image = test_image();
        let config = AttackConfig {
            rand_init: true,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
        assert!(attacker.init_state(image.view()).delta().iter().any(|d| *d != 0.));

        let config = AttackConfig {
            rand_init: true,
            lam: 1.,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
        assert!(attacker.init_state(image.view()).delta().iter().all(|d| *d == 0.));
    }

    #[test]
    fn test_input_contract() {
        let mut attacker =
            ProjectionAttacker::new(small_config(), ExecutionContext::cpu(0)).unwrap();
        let batch = Array4::from_elem((2, 3, 8, 8), 0.5);
        assert!(matches!(
            attacker.perturb(&linear_model(), batch.view(), 0),
            Err(AttackError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            attacker.perturb(&linear_model(), test_image().view(), 3),
            Err(AttackError::LabelOutOfRange {
                label: 3,
                num_classes: 3
            })
        ));
    }

    #[test]
    fn test_linearized_path_runs_on_dnn() {
        let mut rng = StdRng::seed_from_u64(8);
        let model = DNN::random_cnn(3, 4, 3, &mut rng);
        let config = AttackConfig {
            attack_method: "linbp_ila".to_string(),
            linbp_layer: 2,
            ila_layer: 2,
            ila_niters: 6,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
        assert!(attacker.method().linearized_backprop && attacker.method().ila_refine);
        let outcome = attacker
            .perturb_with_alternate_gradient_path(&model, test_image().view(), 1)
            .unwrap();
        assert_eq!(outcome.trajectory.len(), 6);
        assert_eq!(outcome.loss_record.len(), 4);
    }

    #[test]
    fn test_noiseless_replicas_match_single_input() {
        let mut rng = StdRng::seed_from_u64(6);
        let model = DNN::random_cnn(3, 4, 3, &mut rng);
        let image = test_image();
        let run = |m: usize| {
            let config = AttackConfig {
                m,
                sigma: 0.,
                ..small_config()
            };
            let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(4)).unwrap();
            attacker.perturb(&model, image.view(), 1).unwrap()
        };
        let plain = run(0);
        let replicated = run(3);
        let plain_loss = plain.loss_record.get(PRIMARY_LOSS).unwrap();
        let replicated_loss = replicated.loss_record.get(PRIMARY_LOSS).unwrap();
        assert_eq!(plain_loss.len(), replicated_loss.len());
        for (a, b) in plain_loss.iter().zip(replicated_loss.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        for (a, b) in plain.trajectory.iter().zip(replicated.trajectory.iter()) {
            assert!(a.abs_diff_eq(&b, 1e-12));
        }
    }

    #[test]
    fn test_replica_noise_scale() {
        let config = AttackConfig {
            m: 8,
            sigma: 15.,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(21)).unwrap();
        let clean = Array4::<AttackFloat>::zeros((1, 3, 16, 16));
        let noise = attacker.noisy_replicas(clean.view());
        assert_eq!(noise.shape(), &[8, 3, 16, 16]);
        assert_abs_diff_eq!(noise.mean().unwrap(), 0., epsilon = 5e-3);
        assert_abs_diff_eq!(noise.std(0.), 15. / 255., epsilon = 3e-3);

        let mut attacker =
            ProjectionAttacker::new(small_config(), ExecutionContext::cpu(21)).unwrap();
        assert_eq!(attacker.noisy_replicas(clean.view()), clean);
    }

    #[test]
    fn test_smoothing_precedes_normalization() {
        let mut rng = StdRng::seed_from_u64(12);
        let model = DNN::random_cnn(3, 4, 3, &mut rng);
        let image = test_image();
        let config = AttackConfig {
            ti_size: 3,
            momentum: 0.,
            ..small_config()
        };
        let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
        let mut state = attacker.init_state(image.view());

        let logits = model.forward(image.view()).unwrap();
        let (_, grad_logits) = cross_entropy(logits.view(), 2).unwrap();
        let raw = model.input_gradient(image.view(), grad_logits.view()).unwrap();
        let smoothed = SmoothingKernel::new(3).apply(raw.view());
        let expected = normalize_by_pnorm(smoothed.view(), PNorm::L1);

        attacker
            .step(&model, image.view(), 2, &mut state, GradientPath::Direct)
            .unwrap();
        assert!(state.grad().abs_diff_eq(&expected, 1e-15));
        assert_abs_diff_eq!(batch_pnorm(state.grad(), PNorm::L1)[0], 1., epsilon = 1e-9);
    }

    #[test]
    fn test_empty_interaction_records_positive_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = DNN::random_cnn(3, 4, 3, &mut rng);
        for lam in [1., AttackFloat::INFINITY] {
            let config = AttackConfig {
                lam,
                sample_times: 0,
                ..small_config()
            };
            let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0)).unwrap();
            let record = attacker
                .perturb(&model, test_image().view(), 0)
                .unwrap()
                .loss_record;
            let interaction = record.get(INTERACTION_LOSS).unwrap();
            assert_eq!(interaction.len(), 4);
            assert!(interaction.iter().all(|l| *l == 0. && l.is_sign_positive()));
            let json = serde_json::to_string(&record).unwrap();
            assert!(!json.contains("-0.0"));
        }
    }
}
