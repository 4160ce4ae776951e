//! Norm utilities: gradient normalisation, epsilon-ball projection and random starts.
//!
//! All tensors are NCHW and norms are taken per batch entry.
use crate::config::NormOrder;
use crate::AttackFloat;
use ndarray::{Array1, Array4, ArrayView4, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

pub const CLIP_MIN: AttackFloat = 0.;
pub const CLIP_MAX: AttackFloat = 1.;
/// Floor applied to norms before dividing by them
pub const SMALL_CONSTANT: AttackFloat = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PNorm {
    L1,
    L2,
}

pub fn batch_pnorm(x: ArrayView4<AttackFloat>, p: PNorm) -> Array1<AttackFloat> {
    x.outer_iter()
        .map(|sample| match p {
            PNorm::L1 => sample.iter().map(|v| v.abs()).sum(),
            PNorm::L2 => sample.iter().map(|v| v * v).sum::<AttackFloat>().sqrt(),
        })
        .collect()
}

pub fn batch_linf(x: ArrayView4<AttackFloat>) -> Array1<AttackFloat> {
    x.outer_iter()
        .map(|sample| sample.iter().fold(0., |acc: AttackFloat, v| acc.max(v.abs())))
        .collect()
}

/// Divides every batch entry by its p-norm, floored at [`SMALL_CONSTANT`].
pub fn normalize_by_pnorm(x: ArrayView4<AttackFloat>, p: PNorm) -> Array4<AttackFloat> {
    let norms = batch_pnorm(x, p);
    let mut out = x.to_owned();
    out.outer_iter_mut()
        .zip(norms.iter())
        .for_each(|(mut sample, &norm)| sample /= norm.max(SMALL_CONSTANT));
    out
}

/// Scales each batch entry by `min(1, eps / ||x||_2)`. Zero entries are left as they are.
pub fn clamp_by_l2(mut x: Array4<AttackFloat>, epsilon: AttackFloat) -> Array4<AttackFloat> {
    let norms = batch_pnorm(x.view(), PNorm::L2);
    x.outer_iter_mut()
        .zip(norms.iter())
        .filter(|(_, norm)| **norm > 0.)
        .for_each(|(mut sample, &norm)| sample *= (epsilon / norm).min(1.));
    x
}

/// Projects `delta` into the epsilon ball of the given order.
pub fn project_norm_ball(
    delta: Array4<AttackFloat>,
    epsilon: AttackFloat,
    order: NormOrder,
) -> Array4<AttackFloat> {
    match order {
        NormOrder::Inf => delta.mapv_into(|d| d.clamp(-epsilon, epsilon)),
        NormOrder::L2 => clamp_by_l2(delta, epsilon),
    }
}

/// Recomputes `delta` as `clamp(image + delta, 0, 1) - image`.
pub fn clamp_to_pixel_range(
    mut delta: Array4<AttackFloat>,
    image: ArrayView4<AttackFloat>,
) -> Array4<AttackFloat> {
    debug_assert_eq!(delta.shape(), image.shape());
    Zip::from(&mut delta)
        .and(image)
        .for_each(|d, &x| *d = (x + *d).clamp(CLIP_MIN, CLIP_MAX) - x);
    delta
}

/// Norm-ball projection followed by the pixel-range clamp.
///
/// The second clamp only ever shrinks entries of `delta`, so the L∞ bound survives it.
/// Under L2 the norm is enforced before the clamp; a bound overshoot of floating
/// point size after the clamp is accepted.
pub fn project(
    delta: Array4<AttackFloat>,
    image: ArrayView4<AttackFloat>,
    epsilon: AttackFloat,
    order: NormOrder,
) -> Array4<AttackFloat> {
    clamp_to_pixel_range(project_norm_ball(delta, epsilon, order), image)
}

pub fn sign(x: ArrayView4<AttackFloat>) -> Array4<AttackFloat> {
    x.mapv(|v| {
        if v > 0. {
            1.
        } else if v < 0. {
            -1.
        } else {
            0.
        }
    })
}

/// Random starting point inside the epsilon ball, already clamped to the pixel range.
///
/// L∞ draws every entry uniformly from `[-eps, eps]`. L2 draws a uniform image in the
/// pixel range, takes its offset from `image` and scales it into the ball.
pub fn rand_init_delta<R: Rng>(
    image: ArrayView4<AttackFloat>,
    order: NormOrder,
    epsilon: AttackFloat,
    rng: &mut R,
) -> Array4<AttackFloat> {
    let dim = image.raw_dim();
    let delta = match order {
        NormOrder::Inf => Array4::random_using(dim, Uniform::new_inclusive(-epsilon, epsilon), rng),
        NormOrder::L2 => {
            let uniform = Array4::random_using(dim, Uniform::new(CLIP_MIN, CLIP_MAX), rng);
            clamp_by_l2(uniform - &image, epsilon)
        }
    };
    clamp_to_pixel_range(delta, image)
}
