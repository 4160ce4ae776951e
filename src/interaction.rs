//! Monte-Carlo estimate of pairwise interactions between perturbation regions.
//!
//! The image is split into a `grid_scale x grid_scale` grid. Every draw marks
//! `grid_num` cells (with replacement); the perturbation restricted to the marked
//! cells is the "only add one" variant and the perturbation everywhere else is the
//! "leave one out" variant.
use crate::classifier::Classifier;
use crate::error::AttackError;
use crate::loss::runner_up;
use crate::AttackFloat;
use log::trace;
use ndarray::{s, Array2, Array4, ArrayView1, ArrayView4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InteractionSampler {
    grid_num: usize,
    grid_scale: usize,
    image_width: usize,
    sample_times: usize,
}

/// Masked copies of a perturbation, one batch entry per draw.
#[derive(Clone, Debug)]
pub struct MaskedDeltas {
    mask: Array4<AttackFloat>, // (sample_times, C, H, W), 1 on sampled cells
    only_add_one: Array4<AttackFloat>,
    leave_one_out: Array4<AttackFloat>,
}

impl MaskedDeltas {
    pub fn mask(&self) -> ArrayView4<AttackFloat> {
        self.mask.view()
    }

    pub fn only_add_one(&self) -> ArrayView4<AttackFloat> {
        self.only_add_one.view()
    }

    pub fn leave_one_out(&self) -> ArrayView4<AttackFloat> {
        self.leave_one_out.view()
    }

    pub fn sample_times(&self) -> usize {
        self.mask.len_of(Axis(0))
    }
}

impl InteractionSampler {
    pub const fn new(
        grid_num: usize,
        grid_scale: usize,
        image_width: usize,
        sample_times: usize,
    ) -> Self {
        Self {
            grid_num,
            grid_scale,
            image_width,
            sample_times,
        }
    }

    pub const fn grid_size(&self) -> usize {
        self.image_width / self.grid_scale
    }

    /// Binary masks of shape `(sample_times, channels, height, width)`.
    pub fn sample_masks<R: Rng>(
        &self,
        channels: usize,
        height: usize,
        width: usize,
        rng: &mut R,
    ) -> Array4<AttackFloat> {
        let mut mask = Array4::<AttackFloat>::zeros((self.sample_times, channels, height, width));
        let grid_size = self.grid_size();
        let num_cells = self.grid_scale * self.grid_scale;
        if grid_size == 0 || num_cells == 0 {
            return mask;
        }
        for (draw, mut draw_mask) in mask.outer_iter_mut().enumerate() {
            for _ in 0..self.grid_num {
                let id = rng.gen_range(0..num_cells);
                let (row, col) = (id / self.grid_scale, id % self.grid_scale);
                let y_0 = (row * grid_size).min(height);
                let x_0 = (col * grid_size).min(width);
                let y_1 = ((row + 1) * grid_size).min(height);
                let x_1 = ((col + 1) * grid_size).min(width);
                trace!("interaction draw {} cell ({}, {})", draw, row, col);
                draw_mask.slice_mut(s![.., y_0..y_1, x_0..x_1]).fill(1.);
            }
        }
        mask
    }

    /// # Panics
    /// If `delta` is not a single image
    pub fn sample<R: Rng>(&self, delta: ArrayView4<AttackFloat>, rng: &mut R) -> MaskedDeltas {
        let (n, c, h, w) = delta.dim();
        assert_eq!(n, 1, "interaction sampling expects a single perturbation");
        let mask = self.sample_masks(c, h, w, rng);
        let only_add_one = &mask * &delta;
        let leave_one_out = mask.mapv(|m| 1. - m) * &delta;
        MaskedDeltas {
            mask,
            only_add_one,
            leave_one_out,
        }
    }
}

/// Average pairwise interaction of the log-probability gap between a competing
/// class and the true label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InteractionLoss {
    target: usize,
    label: usize,
}

impl InteractionLoss {
    pub const fn new(target: usize, label: usize) -> Self {
        Self { target, label }
    }

    /// Uses the strongest class other than `label` in `logits` as the competitor.
    pub fn against_runner_up(logits: ArrayView1<AttackFloat>, label: usize) -> Option<Self> {
        runner_up(logits, label).map(|target| Self::new(target, label))
    }

    pub const fn target(&self) -> usize {
        self.target
    }

    fn score_gradient(&self, batch: usize, num_classes: usize, scale: AttackFloat) -> Array2<AttackFloat> {
        let mut grad = Array2::zeros((batch, num_classes));
        grad.column_mut(self.target).fill(scale);
        grad.column_mut(self.label).fill(-scale);
        grad
    }

    fn scores(&self, logits: &Array2<AttackFloat>) -> Vec<AttackFloat> {
        logits
            .rows()
            .into_iter()
            .map(|row| row[self.target] - row[self.label])
            .collect()
    }

    /// `mean_i[s(x + d) - s(x + d * (1 - m_i)) - s(x + d * m_i) + s(x)]` with
    /// `s = logit[target] - logit[label]`, and its gradient w.r.t. `d`.
    ///
    /// No draws gives an interaction of zero.
    ///
    /// # Errors
    /// Propagates model failures.
    pub fn evaluate<M: Classifier + ?Sized>(
        &self,
        model: &M,
        image: ArrayView4<AttackFloat>,
        delta: ArrayView4<AttackFloat>,
        masked: &MaskedDeltas,
    ) -> Result<(AttackFloat, Array4<AttackFloat>), AttackError> {
        let times = masked.sample_times();
        if times == 0 {
            return Ok((0., Array4::zeros(delta.raw_dim())));
        }
        let num_classes = model.num_classes();
        let weight = 1. / times as AttackFloat;

        let full_input = &image + &delta;
        let leave_input = &masked.leave_one_out + &image;
        let add_input = &masked.only_add_one + &image;

        let full = self.scores(&model.forward(full_input.view())?)[0];
        let zero = self.scores(&model.forward(image)?)[0];
        let leave = self.scores(&model.forward(leave_input.view())?);
        let add = self.scores(&model.forward(add_input.view())?);
        let interaction = leave
            .iter()
            .zip(add.iter())
            .map(|(l, a)| full - l - a + zero)
            .sum::<AttackFloat>()
            * weight;

        let grad_full =
            model.input_gradient(full_input.view(), self.score_gradient(1, num_classes, 1.).view())?;
        let grad_leave = model.input_gradient(
            leave_input.view(),
            self.score_gradient(times, num_classes, weight).view(),
        )?;
        let grad_add = model.input_gradient(
            add_input.view(),
            self.score_gradient(times, num_classes, weight).view(),
        )?;
        let leave_mask = masked.mask.mapv(|m| 1. - m);
        let through_masks = (grad_leave * leave_mask + grad_add * &masked.mask).sum_axis(Axis(0));
        let grad = grad_full - through_masks.insert_axis(Axis(0));
        Ok((interaction, grad))
    }
}
