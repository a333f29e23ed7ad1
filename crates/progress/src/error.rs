//! Errors surfaced to the UI layer.
//!
//! Storage failures reach callers as a short human-readable cause only.
//! Backend detail is logged by the controller and never surfaced here.

/// Failure of a controller operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    /// Saved progress could not be read
    #[error("could not load saved progress: {0}")]
    Load(String),

    /// A step could not be saved; the answers are kept for retry
    #[error("could not save progress: {0}")]
    Save(String),

    /// The final submission failed; the form stays resumable
    #[error("could not submit the form: {0}")]
    Complete(String),

    /// Saved progress could not be deleted
    #[error("could not reset progress: {0}")]
    Reset(String),

    /// Another write is still in flight
    #[error("a save is already in progress")]
    Busy,

    /// Progress has not been loaded yet
    #[error("progress is still loading")]
    NotReady,

    /// The form was already submitted; reset it to edit again
    #[error("the form has already been submitted")]
    Completed,
}

impl ProgressError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProgressError::Save(_)
                | ProgressError::Complete(_)
                | ProgressError::Reset(_)
                | ProgressError::Busy
        )
    }
}
