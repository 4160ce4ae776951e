//! 2D convolution on NCHW batches
use crate::dnn::layer::Layer;
use crate::error::AttackError;
use crate::AttackFloat;
use itertools::Itertools;
use ndarray::{Array1, Array4, ArrayD, ArrayView4, Ix4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

/// Weights are of the shape: (`channels_out`, `channels_in`, `kernel_h`, `kernel_w`)
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Conv {
    kernel: Array4<AttackFloat>, // (C_out, C_in, K_h, K_w)
    bias: Array1<AttackFloat>,   // (C_out)
    strides: (usize, usize),     // (y, x)
    padding: (usize, usize),     // (y, x), zero padding on both sides
}

impl Conv {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(
        kernel: Array4<AttackFloat>,
        bias: Array1<AttackFloat>,
        strides: (usize, usize),
        padding: (usize, usize),
    ) -> Self {
        assert_eq!(kernel.shape()[0], bias.len());
        assert!(strides.0 > 0 && strides.1 > 0);
        Self {
            kernel,
            bias,
            strides,
            padding,
        }
    }

    pub fn channels_in(&self) -> usize {
        self.kernel.shape()[1]
    }

    pub fn channels_out(&self) -> usize {
        self.kernel.shape()[0]
    }

    /// Spatial output size for an `h_in` x `w_in` input
    pub fn output_hw(&self, h_in: usize, w_in: usize) -> (usize, usize) {
        let k_h = self.kernel.shape()[2];
        let k_w = self.kernel.shape()[3];
        let h_out = (h_in + 2 * self.padding.0 - k_h) / self.strides.0 + 1;
        let w_out = (w_in + 2 * self.padding.1 - k_w) / self.strides.1 + 1;
        (h_out, w_out)
    }

    fn check_input(&self, data: &ArrayView4<AttackFloat>) -> Result<(), AttackError> {
        let (n, c_in, h_in, w_in) = data.dim();
        if c_in != self.channels_in()
            || h_in + 2 * self.padding.0 < self.kernel.shape()[2]
            || w_in + 2 * self.padding.1 < self.kernel.shape()[3]
        {
            return Err(AttackError::shape_mismatch(
                &[n, self.channels_in(), self.kernel.shape()[2], self.kernel.shape()[3]],
                data.shape(),
            ));
        }
        Ok(())
    }

    /// Visits every (output position, input position, kernel tap) triple that
    /// lands inside the unpadded input.
    fn for_each_tap(
        &self,
        h_in: usize,
        w_in: usize,
        mut visit: impl FnMut((usize, usize), (usize, usize), (usize, usize)),
    ) {
        let (h_out, w_out) = self.output_hw(h_in, w_in);
        let k_h = self.kernel.shape()[2];
        let k_w = self.kernel.shape()[3];
        for (y_out, x_out) in (0..h_out).cartesian_product(0..w_out) {
            let y_0 = y_out * self.strides.0;
            let x_0 = x_out * self.strides.1;
            for k_y in 0..k_h {
                if y_0 + k_y < self.padding.0 || y_0 + k_y >= h_in + self.padding.0 {
                    // Assumption that padding value is 0, so continue;
                    continue;
                }
                let y_in = y_0 + k_y - self.padding.0;
                for k_x in 0..k_w {
                    if x_0 + k_x < self.padding.1 || x_0 + k_x >= w_in + self.padding.1 {
                        continue;
                    }
                    let x_in = x_0 + k_x - self.padding.1;
                    visit((y_out, x_out), (y_in, x_in), (k_y, k_x));
                }
            }
        }
    }

    /// # Errors
    pub fn convolve(&self, data: ArrayView4<AttackFloat>) -> Result<Array4<AttackFloat>, AttackError> {
        self.check_input(&data)?;
        let (n, c_in, h_in, w_in) = data.dim();
        let c_out = self.channels_out();
        let (h_out, w_out) = self.output_hw(h_in, w_in);

        let mut output = Array4::<AttackFloat>::zeros((n, c_out, h_out, w_out));
        for (b, f_out) in (0..n).cartesian_product(0..c_out) {
            output
                .slice_mut(ndarray::s![b, f_out, .., ..])
                .fill(self.bias[f_out]);
        }
        self.for_each_tap(h_in, w_in, |(y_out, x_out), (y_in, x_in), (k_y, k_x)| {
            for (b, f_out, f_in) in itertools::iproduct!(0..n, 0..c_out, 0..c_in) {
                output[[b, f_out, y_out, x_out]] +=
                    data[[b, f_in, y_in, x_in]] * self.kernel[[f_out, f_in, k_y, k_x]];
            }
        });
        Ok(output)
    }

    /// Gradient w.r.t. the input of [`Conv::convolve`]
    ///
    /// # Errors
    pub fn convolve_transpose(
        &self,
        grad_output: ArrayView4<AttackFloat>,
        h_in: usize,
        w_in: usize,
    ) -> Result<Array4<AttackFloat>, AttackError> {
        let (n, c_out, h_out, w_out) = grad_output.dim();
        if c_out != self.channels_out() || (h_out, w_out) != self.output_hw(h_in, w_in) {
            let (h_exp, w_exp) = self.output_hw(h_in, w_in);
            return Err(AttackError::shape_mismatch(
                &[n, self.channels_out(), h_exp, w_exp],
                grad_output.shape(),
            ));
        }
        let c_in = self.channels_in();
        let mut grad_input = Array4::<AttackFloat>::zeros((n, c_in, h_in, w_in));
        self.for_each_tap(h_in, w_in, |(y_out, x_out), (y_in, x_in), (k_y, k_x)| {
            for (b, f_out, f_in) in itertools::iproduct!(0..n, 0..c_out, 0..c_in) {
                grad_input[[b, f_in, y_in, x_in]] +=
                    grad_output[[b, f_out, y_out, x_out]] * self.kernel[[f_out, f_in, k_y, k_x]];
            }
        });
        Ok(grad_input)
    }
}

impl Layer for Conv {
    fn forward(&self, input: &ArrayD<AttackFloat>) -> Result<ArrayD<AttackFloat>, AttackError> {
        let data = input.view().into_dimensionality::<Ix4>()?;
        Ok(self.convolve(data)?.into_dyn())
    }

    fn backward(
        &self,
        input: &ArrayD<AttackFloat>,
        grad_output: &ArrayD<AttackFloat>,
    ) -> Result<ArrayD<AttackFloat>, AttackError> {
        let data = input.view().into_dimensionality::<Ix4>()?;
        let grad = grad_output.view().into_dimensionality::<Ix4>()?;
        let (_, _, h_in, w_in) = data.dim();
        Ok(self.convolve_transpose(grad, h_in, w_in)?.into_dyn())
    }
}

impl fmt::Display for Conv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Conv {}x{}, {} -> {}",
            self.kernel.shape()[2],
            self.kernel.shape()[3],
            self.channels_in(),
            self.channels_out()
        )
    }
}
