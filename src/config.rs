//! Attack configuration, fixed at construction.
use crate::error::AttackError;
use crate::AttackFloat;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Norm used both for the perturbation budget and for the step direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum NormOrder {
    Inf,
    L2,
}

impl FromStr for NormOrder {
    type Err = AttackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inf" | "linf" | "l_inf" | "infinity" => Ok(Self::Inf),
            "2" | "l2" | "l_2" => Ok(Self::L2),
            other => Err(AttackError::UnsupportedNorm {
                order: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for NormOrder {
    type Error = AttackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NormOrder> for String {
    fn from(order: NormOrder) -> Self {
        order.to_string()
    }
}

impl fmt::Display for NormOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Inf => write!(f, "inf"),
            Self::L2 => write!(f, "2"),
        }
    }
}

/// Flags derived from the free-form attack method name.
///
/// A name containing `linbp` selects the linearized backward pass, a name
/// containing `ila` appends the intermediate-layer refinement phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttackMethod {
    pub linearized_backprop: bool,
    pub ila_refine: bool,
}

impl From<&str> for AttackMethod {
    fn from(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        Self {
            linearized_backprop: name.contains("linbp"),
            ila_refine: name.contains("ila"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Device {
    Cpu,
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

/// Where and with which seed an attack runs. Passed to the attacker explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionContext {
    pub device: Device,
    pub seed: u64,
}

impl ExecutionContext {
    pub const fn cpu(seed: u64) -> Self {
        Self {
            device: Device::Cpu,
            seed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AttackConfig {
    pub attack_method: String,
    pub epsilon: AttackFloat,
    pub num_steps: usize,
    pub step_size: AttackFloat,
    pub ord: NormOrder,
    pub targeted: bool,
    /// Spatial width of the clean image, also the lower bound of the diversity resize
    pub image_width: usize,
    pub momentum: AttackFloat,
    /// Side of the translation-invariance kernel, 1 disables smoothing
    pub ti_size: usize,
    #[serde(with = "lam_serde")]
    pub lam: AttackFloat,
    pub grid_scale: usize,
    pub sample_times: usize,
    pub sample_grid_num: usize,
    /// Number of noisy replicas for variance reduction, 0 disables it
    pub m: usize,
    /// Noise standard deviation in 8-bit pixel units
    pub sigma: AttackFloat,
    pub image_resize: usize,
    pub prob: AttackFloat,
    pub rand_init: bool,
    pub linbp_layer: usize,
    pub ila_layer: usize,
    pub ila_niters: usize,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            attack_method: "pgd".to_string(),
            epsilon: 16. / 255.,
            num_steps: 10,
            step_size: 2. / 255.,
            ord: NormOrder::Inf,
            targeted: false,
            image_width: 224,
            momentum: 0.,
            ti_size: 1,
            lam: 1.,
            grid_scale: 8,
            sample_times: 32,
            sample_grid_num: 32,
            m: 0,
            sigma: 15.,
            image_resize: 255,
            prob: 0.,
            rand_init: true,
            linbp_layer: 0,
            ila_layer: 0,
            ila_niters: 0,
        }
    }
}

impl AttackConfig {
    pub fn method(&self) -> AttackMethod {
        AttackMethod::from(self.attack_method.as_str())
    }

    pub fn interaction_enabled(&self) -> bool {
        self.lam > 0.
    }

    /// # Errors
    /// Returns the first field that fails validation.
    pub fn validate(&self) -> Result<(), AttackError> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.) {
            return Err(AttackError::invalid("epsilon", "must be finite and > 0"));
        }
        if !(self.step_size.is_finite() && self.step_size >= 0.) {
            return Err(AttackError::invalid("step_size", "must be finite and >= 0"));
        }
        if !self.momentum.is_finite() {
            return Err(AttackError::invalid("momentum", "must be finite"));
        }
        if self.ti_size == 0 || self.ti_size % 2 == 0 {
            return Err(AttackError::invalid(
                "ti_size",
                format!("kernel size must be odd, got {}", self.ti_size),
            ));
        }
        if self.lam.is_nan() || self.lam < 0. {
            return Err(AttackError::invalid("lam", "must be >= 0 or inf"));
        }
        if !(0. ..=1.).contains(&self.prob) {
            return Err(AttackError::invalid("prob", "must lie in [0, 1]"));
        }
        if !(self.sigma.is_finite() && self.sigma >= 0.) {
            return Err(AttackError::invalid("sigma", "must be finite and >= 0"));
        }
        if self.image_width == 0 {
            return Err(AttackError::invalid("image_width", "must be > 0"));
        }
        if self.prob > 0. && self.image_resize < self.image_width {
            return Err(AttackError::invalid(
                "image_resize",
                format!(
                    "{} is smaller than image_width {}",
                    self.image_resize, self.image_width
                ),
            ));
        }
        if self.interaction_enabled()
            && (self.grid_scale == 0 || self.grid_scale > self.image_width)
        {
            return Err(AttackError::invalid(
                "grid_scale",
                format!("must lie in [1, {}]", self.image_width),
            ));
        }
        Ok(())
    }

    /// # Errors
    pub fn from_json_str(json: &str) -> Result<Self, AttackError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, AttackError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}

impl fmt::Display for AttackConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} (ord {}, eps {:.4}, steps {}, step {:.4}, momentum {}, ti {}, lam {}, m {}, prob {})",
            self.attack_method,
            self.ord,
            self.epsilon,
            self.num_steps,
            self.step_size,
            self.momentum,
            self.ti_size,
            self.lam,
            self.m,
            self.prob
        )
    }
}

/// JSON has no infinity literal, so an infinite `lam` travels as `"inf"`.
mod lam_serde {
    use crate::AttackFloat;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(AttackFloat),
        Text(String),
    }

    pub fn serialize<S: Serializer>(lam: &AttackFloat, s: S) -> Result<S::Ok, S::Error> {
        if lam.is_infinite() {
            s.serialize_str("inf")
        } else {
            s.serialize_f64(*lam)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<AttackFloat, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(x) => Ok(x),
            Repr::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "inf" | "infinity" => Ok(AttackFloat::INFINITY),
                other => other.parse().map_err(D::Error::custom),
            },
        }
    }
}
