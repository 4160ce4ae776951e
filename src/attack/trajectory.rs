//! What an attack run hands back to the caller.
use crate::error::AttackError;
use crate::AttackFloat;
use ndarray::{concatenate, Array4, ArrayView4, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const PRIMARY_LOSS: &str = "loss1";
pub const INTERACTION_LOSS: &str = "loss2";
pub const TOTAL_LOSS: &str = "loss";

/// Ordered per-step adversarial images, one `(1, C, H, W)` entry per iteration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    steps: Vec<Array4<AttackFloat>>,
}

impl Trajectory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            steps: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, adversarial: Array4<AttackFloat>) {
        self.steps.push(adversarial);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<ArrayView4<AttackFloat>> {
        self.steps.last().map(Array4::view)
    }

    pub fn get(&self, idx: usize) -> Option<ArrayView4<AttackFloat>> {
        self.steps.get(idx).map(Array4::view)
    }

    pub fn iter(&self) -> impl Iterator<Item = ArrayView4<'_, AttackFloat>> + '_ {
        self.steps.iter().map(Array4::view)
    }

    /// All steps along the batch axis, `(N, C, H, W)`.
    ///
    /// # Errors
    /// If the trajectory is empty
    pub fn stacked(&self) -> Result<Array4<AttackFloat>, AttackError> {
        let views: Vec<_> = self.iter().collect();
        Ok(concatenate(Axis(0), &views)?)
    }
}

/// Loss components of a single iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepLosses {
    pub primary: AttackFloat,
    pub interaction: AttackFloat,
    pub total: AttackFloat,
}

/// Loss component name to its per-iteration values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossRecord(BTreeMap<String, Vec<AttackFloat>>);

impl Default for LossRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl LossRecord {
    pub fn new() -> Self {
        Self(
            [PRIMARY_LOSS, INTERACTION_LOSS, TOTAL_LOSS]
                .iter()
                .map(|key| ((*key).to_string(), vec![]))
                .collect(),
        )
    }

    pub fn push(&mut self, losses: &StepLosses) {
        for (key, value) in [
            (PRIMARY_LOSS, losses.primary),
            (INTERACTION_LOSS, losses.interaction),
            (TOTAL_LOSS, losses.total),
        ] {
            self.0.entry(key.to_string()).or_default().push(value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&[AttackFloat]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Number of recorded iterations
    pub fn len(&self) -> usize {
        self.0.get(TOTAL_LOSS).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AttackFloat])> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub trajectory: Trajectory,
    pub loss_record: LossRecord,
}

impl fmt::Display for AttackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} steps", self.trajectory.len())?;
        if let Some(last) = self.loss_record.get(TOTAL_LOSS).and_then(<[_]>::last) {
            write!(f, ", final loss {:.5}", last)?;
        }
        Ok(())
    }
}
