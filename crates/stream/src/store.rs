//! Per-(user, session) message logs.
//!
//! [`LogStore`] maps messages onto backend streams: one stream per
//! (user, session) pair, one entry per message at an id derived from its
//! timestamp, and a sliding expiry refreshed on every append. Whether a log
//! exists is never cached here; the backend alone decides.

use std::{fmt, sync::Arc, time::Duration};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    backend::{BackendError, LogBackend},
    keys::{self, EntryId},
    types::{DEFAULT_LOG_TTL, MESSAGE_FIELD, Message},
};

/// Store operation, carried by errors for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Append,
    Expire,
    Query,
    Ping,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Append => "append",
            Operation::Expire => "expire",
            Operation::Query => "query",
            Operation::Ping => "ping",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable during {operation} on {key}: {source}")]
    Unavailable {
        operation: Operation,
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("Entry {id} collides with an existing entry of {key}")]
    DuplicateEntry { key: String, id: EntryId },
}

impl StoreError {
    fn unavailable(operation: Operation, key: &str, source: BackendError) -> Self {
        StoreError::Unavailable {
            operation,
            key: key.to_string(),
            source,
        }
    }
}

/// Message log store over an injected backend.
///
/// Shared between request tasks behind an `Arc`; it holds no state of its
/// own beyond the backend handle and the TTL.
pub struct LogStore<B> {
    backend: B,
    ttl: Duration,
}

impl<B: LogBackend> LogStore<B> {
    /// Create a store with the default one hour expiry.
    pub fn new(backend: B) -> Arc<Self> {
        Self::with_ttl(backend, DEFAULT_LOG_TTL)
    }

    /// Create a store whose logs expire `ttl` after their latest append.
    pub fn with_ttl(backend: B, ttl: Duration) -> Arc<Self> {
        Arc::new(Self { backend, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Append a message to its log and push the log's expiry out by the TTL.
    ///
    /// # Returns
    /// The entry id the backend stored the message at.
    ///
    /// # Errors
    /// [`StoreError::DuplicateEntry`] when the log already holds an entry at
    /// or after the message's timestamp (two appends in one millisecond). The
    /// expiry is left untouched in that case.
    pub async fn append(&self, message: &Message) -> Result<EntryId, StoreError> {
        let key = message.log_key();
        let id = message.entry_id();

        let assigned = self
            .backend
            .append(&key, id, &[(MESSAGE_FIELD, message.text.as_str())])
            .await
            .map_err(|e| match e {
                BackendError::IdNotIncreasing { key, id } => {
                    StoreError::DuplicateEntry { key, id }
                }
                other => StoreError::unavailable(Operation::Append, &key, other),
            })?;

        self.backend
            .expire(&key, self.ttl)
            .await
            .map_err(|e| StoreError::unavailable(Operation::Expire, &key, e))?;

        debug!(key = %key, id = %assigned, "Appended message");
        Ok(assigned)
    }

    /// All messages of a log appended at or after `timestamp`, oldest first.
    ///
    /// A log that never existed or has expired yields an empty list. Records
    /// without a readable message body are skipped.
    pub async fn query_since(
        &self,
        user_id: &Uuid,
        session_id: &Uuid,
        timestamp: u64,
    ) -> Result<Vec<String>, StoreError> {
        let key = keys::log_key(user_id, session_id);
        let lower = keys::lower_bound_entry_id(timestamp);

        let records = self
            .backend
            .range(&key, lower)
            .await
            .map_err(|e| StoreError::unavailable(Operation::Query, &key, e))?;

        let mut messages = Vec::with_capacity(records.len());
        for record in &records {
            match record.message() {
                Some(text) => messages.push(text.to_string()),
                None => warn!(key = %key, id = %record.id, "Skipping record without a readable message"),
            }
        }
        Ok(messages)
    }

    /// Check the backend is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.backend
            .ping()
            .await
            .map_err(|e| StoreError::unavailable(Operation::Ping, "-", e))
    }

    /// Close the backend connection.
    ///
    /// Works through a shared handle, so it can run while requests still hold
    /// the store; their later commands fail as unavailable.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.backend
            .close()
            .await
            .map_err(|e| StoreError::unavailable(Operation::Close, "-", e))
    }
}
