//! formkeep core data models.
//!
//! This crate defines the records that back resumable multi-step forms:
//! who owns a record, which wizard it belongs to, the step the user is on
//! and the answers collected so far.

#![warn(missing_docs)]

// Identities
mod id;

// Records
mod form_data;
mod record;
mod step;

// Wizard definitions
mod form;

mod error;

// Re-exports
pub use id::{FormType, ProgressKey, UserId};
pub use form_data::FormData;
pub use record::FormProgress;
pub use step::StepRange;
pub use form::{FormCatalog, FormDefinition};
pub use error::{CoreError, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
