//! Stochastic resize-and-pad input transform (input diversity).
//!
//! The transform is redrawn on every call. A [`Diversified`] output remembers
//! the resize/pad it applied so gradients can be routed back to the source image.
use crate::AttackFloat;
use itertools::Itertools;
use log::trace;
use ndarray::{s, Array4, ArrayView4};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResizePad {
    source: (usize, usize), // (H, W) before the transform
    resized: usize,
    pad_left: usize,
    pad_top: usize,
    pad_right: usize,
    pad_bottom: usize,
}

impl ResizePad {
    pub const fn output_size(&self) -> (usize, usize) {
        (
            self.pad_top + self.resized + self.pad_bottom,
            self.pad_left + self.resized + self.pad_right,
        )
    }

    /// Returns `(left, top, right, bottom)`
    pub const fn padding(&self) -> (usize, usize, usize, usize) {
        (self.pad_left, self.pad_top, self.pad_right, self.pad_bottom)
    }

    pub const fn resized(&self) -> usize {
        self.resized
    }

    pub fn apply(&self, image: ArrayView4<AttackFloat>) -> Array4<AttackFloat> {
        debug_assert_eq!((image.shape()[2], image.shape()[3]), self.source);
        let rescaled = resize_nearest(image, self.resized, self.resized);
        pad(
            rescaled.view(),
            self.pad_left,
            self.pad_top,
            self.pad_right,
            self.pad_bottom,
        )
    }

    /// Vector-Jacobian product of [`ResizePad::apply`]: crops the padding and
    /// accumulates each resized pixel onto the source pixel it was copied from.
    pub fn backward(&self, grad: ArrayView4<AttackFloat>) -> Array4<AttackFloat> {
        let (n, c, _, _) = grad.dim();
        let (h_in, w_in) = self.source;
        let cropped = grad.slice(s![
            ..,
            ..,
            self.pad_top..self.pad_top + self.resized,
            self.pad_left..self.pad_left + self.resized
        ]);
        let mut grad_in = Array4::<AttackFloat>::zeros((n, c, h_in, w_in));
        for (y, x) in (0..self.resized).cartesian_product(0..self.resized) {
            let y_src = nearest_source(y, h_in, self.resized);
            let x_src = nearest_source(x, w_in, self.resized);
            let mut target = grad_in.slice_mut(s![.., .., y_src, x_src]);
            target += &cropped.slice(s![.., .., y, x]);
        }
        grad_in
    }
}

/// A transformed image together with the plan that produced it, `None` if the
/// source was passed through untouched.
#[derive(Clone, Debug)]
pub struct Diversified {
    image: Array4<AttackFloat>,
    plan: Option<ResizePad>,
}

impl Diversified {
    pub fn identity(image: Array4<AttackFloat>) -> Self {
        Self { image, plan: None }
    }

    pub fn image(&self) -> ArrayView4<AttackFloat> {
        self.image.view()
    }

    pub const fn plan(&self) -> Option<&ResizePad> {
        self.plan.as_ref()
    }

    pub const fn is_identity(&self) -> bool {
        self.plan.is_none()
    }

    /// Maps a gradient w.r.t. the transformed image back onto the source image.
    pub fn backward(&self, grad: ArrayView4<AttackFloat>) -> Array4<AttackFloat> {
        match self.plan {
            Some(ref plan) => plan.backward(grad),
            None => grad.to_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct InputDiversity {
    base_width: usize,
    resize_width: usize,
    probability: AttackFloat,
}

impl InputDiversity {
    pub const fn new(base_width: usize, resize_width: usize, probability: AttackFloat) -> Self {
        Self {
            base_width,
            resize_width,
            probability,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.probability > 0.
    }

    /// Draws a square size in `[base_width, resize_width]`, resizes to it, pads
    /// randomly up to `resize_width`, and keeps the result with the configured
    /// probability. Otherwise the input is returned unchanged.
    pub fn transform<R: Rng>(&self, image: ArrayView4<AttackFloat>, rng: &mut R) -> Diversified {
        if !self.is_enabled() {
            return Diversified::identity(image.to_owned());
        }
        let resized = rng.gen_range(self.base_width..=self.resize_width);
        let h_rem = self.resize_width - resized;
        let w_rem = self.resize_width - resized;
        let pad_top = rng.gen_range(0..=h_rem);
        let pad_left = rng.gen_range(0..=w_rem);
        let plan = ResizePad {
            source: (image.shape()[2], image.shape()[3]),
            resized,
            pad_left,
            pad_top,
            pad_right: w_rem - pad_left,
            pad_bottom: h_rem - pad_top,
        };
        let keep: AttackFloat = rng.gen();
        trace!("input diversity plan {:?}, draw {:.3}", plan, keep);
        if keep < self.probability {
            Diversified {
                image: plan.apply(image),
                plan: Some(plan),
            }
        } else {
            Diversified::identity(image.to_owned())
        }
    }
}

const fn nearest_source(dst: usize, in_size: usize, out_size: usize) -> usize {
    let src = dst * in_size / out_size;
    if src >= in_size {
        in_size - 1
    } else {
        src
    }
}

pub fn resize_nearest(
    image: ArrayView4<AttackFloat>,
    out_h: usize,
    out_w: usize,
) -> Array4<AttackFloat> {
    let (n, c, h_in, w_in) = image.dim();
    let mut output = Array4::<AttackFloat>::zeros((n, c, out_h, out_w));
    for (y, x) in (0..out_h).cartesian_product(0..out_w) {
        let y_src = nearest_source(y, h_in, out_h);
        let x_src = nearest_source(x, w_in, out_w);
        output
            .slice_mut(s![.., .., y, x])
            .assign(&image.slice(s![.., .., y_src, x_src]));
    }
    output
}

/// Zero-pads the spatial axes.
pub fn pad(
    image: ArrayView4<AttackFloat>,
    left: usize,
    top: usize,
    right: usize,
    bottom: usize,
) -> Array4<AttackFloat> {
    let (n, c, h, w) = image.dim();
    let mut output = Array4::<AttackFloat>::zeros((n, c, top + h + bottom, left + w + right));
    output
        .slice_mut(s![.., .., top..top + h, left..left + w])
        .assign(&image);
    output
}
