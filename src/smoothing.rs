//! Fixed Gaussian depthwise filter for translation-invariant gradients.
use crate::AttackFloat;
use itertools::Itertools;
use ndarray::{s, Array1, Array2, Array4, ArrayView2, ArrayView4};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_NSIG: AttackFloat = 3.;

/// Odd-sized 2D Gaussian kernel, normalised to sum to one and applied to every
/// channel independently with zero "same" padding.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SmoothingKernel {
    kernel: Array2<AttackFloat>, // (k, k)
}

impl SmoothingKernel {
    pub fn new(size: usize) -> Self {
        Self::gaussian(size, DEFAULT_NSIG)
    }

    /// Samples the standard normal density on `size` evenly spaced points in
    /// `[-nsig, nsig]` and takes the outer product.
    ///
    /// # Panics
    /// If `size` is even or zero
    pub fn gaussian(size: usize, nsig: AttackFloat) -> Self {
        assert!(size % 2 == 1, "kernel size must be odd, got {}", size);
        let pdf = Array1::linspace(-nsig, nsig, size).mapv(|x| (-0.5 * x * x).exp());
        let column = pdf.view().insert_axis(ndarray::Axis(1));
        let row = pdf.view().insert_axis(ndarray::Axis(0));
        let raw = column.dot(&row);
        let total = raw.sum();
        Self { kernel: raw / total }
    }

    pub fn size(&self) -> usize {
        self.kernel.nrows()
    }

    pub fn kernel(&self) -> ArrayView2<AttackFloat> {
        self.kernel.view()
    }

    pub fn apply(&self, data: ArrayView4<AttackFloat>) -> Array4<AttackFloat> {
        let (n, c, h, w) = data.dim();
        let k = self.size();
        let pad = k / 2;
        let mut output = Array4::<AttackFloat>::zeros((n, c, h, w));

        for (b, ch) in (0..n).cartesian_product(0..c) {
            let plane = data.slice(s![b, ch, .., ..]);
            let mut out_plane = output.slice_mut(s![b, ch, .., ..]);
            for (y_out, x_out) in (0..h).cartesian_product(0..w) {
                let mut acc = 0.;
                for k_y in 0..k {
                    if y_out + k_y < pad || y_out + k_y >= h + pad {
                        continue;
                    }
                    let y_in = y_out + k_y - pad;
                    for k_x in 0..k {
                        if x_out + k_x < pad || x_out + k_x >= w + pad {
                            continue;
                        }
                        let x_in = x_out + k_x - pad;
                        acc += plane[[y_in, x_in]] * self.kernel[[k_y, k_x]];
                    }
                }
                out_plane[[y_out, x_out]] = acc;
            }
        }
        output
    }
}

impl fmt::Display for SmoothingKernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Gaussian {}x{}", self.size(), self.size())
    }
}
