//! Storage abstraction and implementations for formkeep.
//!
//! This crate provides the `ProgressStore` trait with in-memory, JSON file
//! and (behind the `sqlite` feature) SQLite implementations.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
#[cfg(feature = "json")]
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{ProgressStore, StorageError, Result};
pub use memory::MemoryStorage;
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
