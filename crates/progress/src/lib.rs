//! Resumable wizard progress (controller layer)
//!
//! Step navigation, answer merging and save/complete/reset on top of a
//! [`formkeep_storage::ProgressStore`].

#![warn(missing_docs)]

pub mod controller;
pub mod config;
pub mod error;
pub mod identity;
pub mod notify;

pub use controller::{ControllerState, LoadOutcome, ProgressController, ProgressView};
pub use config::ControllerConfig;
pub use error::ProgressError;
pub use identity::{IdentitySource, IdentityWatch};
pub use notify::{Notice, NoticeLevel, Notifier, TracingNotifier};
