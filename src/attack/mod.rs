pub mod attacker;
pub mod state;
pub mod trajectory;

pub use attacker::{GradientPath, ProjectionAttacker};
pub use state::AttackState;
pub use trajectory::{AttackOutcome, LossRecord, StepLosses, Trajectory};
