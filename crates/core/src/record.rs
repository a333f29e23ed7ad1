//! The persisted progress record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::form_data::FormData;
use crate::id::{FormType, ProgressKey, UserId};
use crate::Time;

/// A user's in-progress (or finished) answers for one wizard.
///
/// There is at most one record per `(user_id, form_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormProgress {
    /// Owning user
    pub user_id: UserId,

    /// Wizard this record belongs to
    pub form_type: FormType,

    /// Step the user resumes on (1-based)
    pub current_step: u32,

    /// Answers accumulated so far
    #[serde(default)]
    pub data: FormData,

    /// Set once the final submission succeeded
    #[serde(default)]
    pub is_completed: bool,

    /// Last persisted mutation, assigned by the store
    pub updated_at: Time,
}

impl FormProgress {
    /// A fresh record on step 1 with no answers.
    pub fn new(user_id: UserId, form_type: FormType) -> Self {
        Self {
            user_id,
            form_type,
            current_step: 1,
            data: FormData::new(),
            is_completed: false,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Composite key of this record.
    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.user_id.clone(), self.form_type.clone())
    }

    /// Typed view of the accumulated answers.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.data.to_typed()
    }
}
