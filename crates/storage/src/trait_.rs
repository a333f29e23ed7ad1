//! Progress store trait abstraction.

use async_trait::async_trait;
use formkeep_core::{FormProgress, FormType, UserId};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Backend cannot serve requests right now
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Durable store of form progress, one record per `(user, form type)`.
///
/// A missing record is a normal state for first-time users and is reported
/// as `Ok(None)`, never as an error.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Load the record for a user and wizard.
    async fn load(&self, user_id: &UserId, form_type: &FormType) -> Result<Option<FormProgress>>;

    /// Create or replace the record keyed by its user and form type.
    ///
    /// The store assigns `updated_at` and returns the record as written.
    /// No merging happens here; the last write wins. The write is durable
    /// when this returns.
    async fn upsert(&self, record: &FormProgress) -> Result<FormProgress>;

    /// Remove a record. Removing a missing record succeeds.
    async fn delete(&self, user_id: &UserId, form_type: &FormType) -> Result<()>;

    /// All records owned by a user, most recently updated first.
    async fn list(&self, user_id: &UserId) -> Result<Vec<FormProgress>>;
}

