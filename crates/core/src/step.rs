//! Step bounds of a wizard.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// The valid step numbers `1..=total` of a wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct StepRange {
    total: u32,
}

impl StepRange {
    /// Create a range with `total` steps. Zero steps is rejected.
    pub fn new(total: u32) -> Result<Self> {
        if total == 0 {
            return Err(CoreError::InvalidStepCount(total));
        }
        Ok(Self { total })
    }

    /// Compile-time known step counts; `total` must be non-zero.
    pub(crate) const fn fixed(total: u32) -> Self {
        Self { total }
    }

    /// First step (always 1).
    pub fn first(&self) -> u32 {
        1
    }

    /// Last step.
    pub fn last(&self) -> u32 {
        self.total
    }

    /// Number of steps.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Whether `step` is a valid step number.
    pub fn contains(&self, step: u32) -> bool {
        (1..=self.total).contains(&step)
    }

    /// Force `step` into the range.
    pub fn clamp(&self, step: u32) -> u32 {
        step.clamp(1, self.total)
    }

    /// Step after `step`, saturating at the last step.
    pub fn next(&self, step: u32) -> u32 {
        self.clamp(step.saturating_add(1))
    }

    /// Step before `step`, saturating at the first step.
    pub fn prev(&self, step: u32) -> u32 {
        self.clamp(step.saturating_sub(1))
    }
}

impl Default for StepRange {
    fn default() -> Self {
        Self { total: 1 }
    }
}

impl TryFrom<u32> for StepRange {
    type Error = CoreError;

    fn try_from(total: u32) -> Result<Self> {
        Self::new(total)
    }
}

impl From<StepRange> for u32 {
    fn from(range: StepRange) -> u32 {
        range.total
    }
}
