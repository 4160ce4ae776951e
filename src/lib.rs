#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::module_name_repetitions)]
//! Gradient-based transferable adversarial examples against image classifiers.
//!
//! The [`attack::ProjectionAttacker`] runs a projected iterative attack that can
//! combine momentum, input diversity, translation-invariant smoothing,
//! variance-reduced sampling, interaction reduction, linearized backprop and an
//! intermediate-layer refinement phase.
extern crate ndarray;
extern crate ndarray_rand;
extern crate ndarray_stats;
extern crate rand;

pub mod attack;
pub mod classifier;
pub mod config;
pub mod diversity;
pub mod dnn;
pub mod error;
pub mod interaction;
pub mod loss;
pub mod norms;
pub mod smoothing;
mod test_util;

pub use attack::{AttackOutcome, AttackState, LossRecord, ProjectionAttacker, Trajectory};
pub use config::{AttackConfig, AttackMethod, Device, ExecutionContext, NormOrder};
pub use error::AttackError;
pub use classifier::Classifier;
pub use dnn::DNN;

pub type AttackFloat = f64;
