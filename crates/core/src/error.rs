//! Errors raised by the data model.

/// Result alias for model operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while building or converting model values.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A wizard must have at least one step
    #[error("invalid step count: {0} (a form needs at least one step)")]
    InvalidStepCount(u32),

    /// Form type missing from the catalog
    #[error("unknown form type: {0}")]
    UnknownForm(String),

    /// Value did not serialize to a JSON object
    #[error("form data must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
