//! Stowage core types, traits, configuration, and errors.
//!
//! This crate provides the building blocks shared by every storage backend:
//! the [`StorageBackend`] trait, the listing types and streams, the bounded
//! [`WorkerQueue`], the traversal-and-apply engine, and the unified error
//! type.

pub mod config;
pub mod engine;
pub mod error;
pub mod path;
pub mod queue;
pub mod storage;
pub mod stream;
pub mod types;

pub use config::StorageConfig;
pub use engine::apply_recursive;
pub use error::StorageError;
pub use queue::WorkerQueue;
pub use storage::StorageBackend;
pub use stream::{match_all, match_filename, ListSender, ListStream, PathFilter};
pub use types::{ListEntry, ListResult};

/// Convenience Result type using [`StorageError`].
pub type Result<T> = std::result::Result<T, StorageError>;
