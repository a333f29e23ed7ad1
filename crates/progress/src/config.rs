//! Controller configuration.

use std::time::Duration;

use formkeep_core::{FormDefinition, StepRange};

/// Configuration for a progress controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Steps of the wizard being driven
    pub total_steps: StepRange,
    /// Upper bound on each store call (None = wait forever)
    pub store_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            total_steps: StepRange::default(),
            store_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ControllerConfig {
    /// Configuration for a wizard with the given step range.
    pub fn new(total_steps: StepRange) -> Self {
        Self {
            total_steps,
            ..Default::default()
        }
    }

    /// Configuration taken from a catalog entry.
    pub fn for_form(definition: &FormDefinition) -> Self {
        Self::new(definition.total_steps)
    }

    /// Set the store timeout.
    pub fn with_store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }
}
