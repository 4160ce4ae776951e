use crate::config::NormOrder;
use crate::norms::{normalize_by_pnorm, project, sign, PNorm};
use crate::AttackFloat;
use ndarray::{Array4, ArrayView4};

/// Mutable optimizer state carried across iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct AttackState {
    delta: Array4<AttackFloat>,
    grad: Array4<AttackFloat>,
    step_index: usize,
}

impl AttackState {
    pub fn zeros(image: ArrayView4<AttackFloat>) -> Self {
        Self::with_delta(Array4::zeros(image.raw_dim()))
    }

    pub fn with_delta(delta: Array4<AttackFloat>) -> Self {
        let grad = Array4::zeros(delta.raw_dim());
        Self {
            delta,
            grad,
            step_index: 0,
        }
    }

    pub fn delta(&self) -> ArrayView4<AttackFloat> {
        self.delta.view()
    }

    /// Momentum accumulator
    pub fn grad(&self) -> ArrayView4<AttackFloat> {
        self.grad.view()
    }

    pub const fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn adversarial(&self, image: ArrayView4<AttackFloat>) -> Array4<AttackFloat> {
        &image + &self.delta
    }

    /// `grad = momentum * grad + raw / ||raw||_1`
    pub fn accumulate_gradient(&mut self, raw: ArrayView4<AttackFloat>, momentum: AttackFloat) {
        let normalized = normalize_by_pnorm(raw, PNorm::L1);
        self.grad.mapv_inplace(|g| g * momentum);
        self.grad += &normalized;
    }

    /// Moves along the momentum accumulator and projects back onto the feasible set.
    pub fn take_step(
        &mut self,
        image: ArrayView4<AttackFloat>,
        step_size: AttackFloat,
        epsilon: AttackFloat,
        order: NormOrder,
    ) {
        self.delta = advance(
            &self.delta,
            self.grad.view(),
            image,
            step_size,
            epsilon,
            order,
        );
        self.step_index += 1;
    }

    /// Plain ascent step along `direction`, bypassing the momentum accumulator.
    pub fn take_raw_step(
        &mut self,
        direction: ArrayView4<AttackFloat>,
        image: ArrayView4<AttackFloat>,
        step_size: AttackFloat,
        epsilon: AttackFloat,
        order: NormOrder,
    ) {
        self.delta = advance(&self.delta, direction, image, step_size, epsilon, order);
        self.step_index += 1;
    }
}

/// Sign step under L∞, unit L2 direction under L2, then [`project`].
fn advance(
    delta: &Array4<AttackFloat>,
    direction: ArrayView4<AttackFloat>,
    image: ArrayView4<AttackFloat>,
    step_size: AttackFloat,
    epsilon: AttackFloat,
    order: NormOrder,
) -> Array4<AttackFloat> {
    let update = match order {
        NormOrder::Inf => sign(direction),
        NormOrder::L2 => normalize_by_pnorm(direction, PNorm::L2),
    };
    project(delta + &(update * step_size), image, epsilon, order)
}
