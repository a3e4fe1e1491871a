//! Ordered-log backends.
//!
//! A backend is a set of named, append-only streams. Each entry carries an
//! id chosen by the caller that must be strictly greater than the stream's
//! last id. Whole streams expire after a time-to-live, and entries are read
//! back with an ascending id-range scan.
//!
//! Every command is atomic on its own; nothing here spans several commands.

use std::{future::Future, time::Duration};

use crate::{keys::EntryId, types::Record};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{DEFAULT_SWEEP_INTERVAL, MemoryBackend};
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// Error types for backend commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Entry id {id} is not greater than the last entry of {key}")]
    IdNotIncreasing { key: String, id: EntryId },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected backend reply: {0}")]
    Protocol(String),
}

/// An ordered, expiring, multi-stream append log.
///
/// Futures returned here are cancel-safe in the sense that dropping one
/// abandons the command; whether the backend already applied it is not
/// reported.
pub trait LogBackend: Send + Sync + 'static {
    /// Append `fields` at `id` to the stream `key`, creating it if needed.
    fn append(
        &self,
        key: &str,
        id: EntryId,
        fields: &[(&str, &str)],
    ) -> impl Future<Output = Result<EntryId, BackendError>> + Send;

    /// Set the time-to-live of the whole stream `key`, measured from now.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// All entries of `key` with an id `>= start`, in ascending id order.
    ///
    /// A missing stream yields an empty list.
    fn range(
        &self,
        key: &str,
        start: EntryId,
    ) -> impl Future<Output = Result<Vec<Record>, BackendError>> + Send;

    /// Round-trip check against the backend.
    fn ping(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Release the connection. Commands issued afterwards fail with
    /// [`BackendError::Unavailable`]; ones already in flight may still finish.
    fn close(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}
