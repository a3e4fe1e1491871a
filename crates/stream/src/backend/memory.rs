//! In-memory backend.
//!
//! Thread-safe in-process streams with the same id and expiry rules as
//! Redis streams: ids must grow strictly, `0-0` is refused, and a stream past
//! its deadline is gone as a whole. A stream named by a command is checked
//! for expiry right away, and writes sweep out every other expired stream at
//! most once per sweep interval.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{BackendError, LogBackend};
use crate::{keys::EntryId, types::Record};

/// How often writes sweep expired streams out of the map.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A single stream held in memory.
#[derive(Debug, Clone, Default)]
struct MemoryStream {
    /// Records in ascending id order
    records: Vec<Record>,
    /// Absolute expiry; `None` means the stream never expires
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryStream {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    fn last_id(&self) -> Option<EntryId> {
        self.records.last().map(|r| r.id)
    }
}

#[derive(Debug, Default)]
struct Streams {
    by_key: HashMap<String, MemoryStream>,
    last_sweep: Option<DateTime<Utc>>,
    closed: bool,
}

impl Streams {
    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Unavailable("memory backend closed".to_string()));
        }
        Ok(())
    }

    /// Remove `key` if its deadline has passed. Returns whether it is live.
    fn evict_if_expired(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        match self.by_key.get(key) {
            Some(stream) if stream.is_expired(now) => {
                self.by_key.remove(key);
                debug!(key = %key, "Expired stream");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Drop every expired stream. Returns how many were removed.
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.by_key.len();
        self.by_key.retain(|_, stream| !stream.is_expired(now));
        self.last_sweep = Some(now);

        let swept = before - self.by_key.len();
        if swept > 0 {
            debug!(swept, "Swept expired streams");
        }
        swept
    }

    fn sweep_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        self.last_sweep.is_none_or(|last| {
            (now - last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= interval)
        })
    }
}

/// In-memory ordered-log backend.
///
/// Cloning shares the underlying streams.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    streams: Arc<RwLock<Streams>>,
    sweep_interval: Duration,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend whose writes sweep expired streams every `interval`.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        Self {
            streams: Arc::default(),
            sweep_interval: interval,
        }
    }

    /// Check if a stream exists (and is not expired).
    pub fn has(&self, key: &str) -> bool {
        let streams = self.streams.read();
        streams
            .by_key
            .get(key)
            .is_some_and(|stream| !stream.is_expired(Utc::now()))
    }

    /// Number of live records in `key`.
    pub fn len(&self, key: &str) -> usize {
        let streams = self.streams.read();
        match streams.by_key.get(key) {
            Some(stream) if !stream.is_expired(Utc::now()) => stream.records.len(),
            _ => 0,
        }
    }

    /// Number of streams held, including expired ones not yet swept.
    pub fn stream_count(&self) -> usize {
        self.streams.read().by_key.len()
    }

    /// Drop every expired stream now. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.streams.write().sweep(Utc::now())
    }

    /// Insert a record verbatim, bypassing the id rules.
    ///
    /// Lets tests plant records a well-behaved writer would never produce.
    pub fn insert_raw(&self, key: &str, record: Record) {
        let mut streams = self.streams.write();
        let stream = streams.by_key.entry(key.to_string()).or_default();
        let position = stream.records.partition_point(|r| r.id <= record.id);
        stream.records.insert(position, record);
    }
}

impl LogBackend for MemoryBackend {
    async fn append(
        &self,
        key: &str,
        id: EntryId,
        fields: &[(&str, &str)],
    ) -> Result<EntryId, BackendError> {
        let mut streams = self.streams.write();
        streams.ensure_open()?;

        let now = Utc::now();
        if streams.sweep_due(now, self.sweep_interval) {
            streams.sweep(now);
        } else {
            streams.evict_if_expired(key, now);
        }

        let last_id = streams.by_key.get(key).and_then(MemoryStream::last_id);
        if id == EntryId::MIN || last_id.is_some_and(|last| id <= last) {
            return Err(BackendError::IdNotIncreasing {
                key: key.to_string(),
                id,
            });
        }

        let record = Record {
            id,
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
                .collect(),
        };
        streams
            .by_key
            .entry(key.to_string())
            .or_default()
            .records
            .push(record);

        debug!(key = %key, id = %id, "Appended to stream");
        Ok(id)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BackendError> {
        let mut streams = self.streams.write();
        streams.ensure_open()?;

        let now = Utc::now();
        if !streams.evict_if_expired(key, now) {
            return Ok(());
        }

        let ttl = TimeDelta::from_std(ttl).map_err(|e| {
            BackendError::Protocol(format!("TTL out of range for {key}: {e}"))
        })?;
        if let Some(stream) = streams.by_key.get_mut(key) {
            stream.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn range(&self, key: &str, start: EntryId) -> Result<Vec<Record>, BackendError> {
        let mut streams = self.streams.write();
        streams.ensure_open()?;

        if !streams.evict_if_expired(key, Utc::now()) {
            return Ok(Vec::new());
        }

        let records = streams
            .by_key
            .get(key)
            .map(|stream| {
                let first = stream.records.partition_point(|r| r.id < start);
                stream.records[first..].to_vec()
            })
            .unwrap_or_default();
        Ok(records)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.streams.read().ensure_open()
    }

    async fn close(&self) -> Result<(), BackendError> {
        let mut streams = self.streams.write();
        streams.by_key.clear();
        streams.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::keys::entry_id;

    fn fields(text: &str) -> Vec<(&str, &str)> {
        vec![("message", text)]
    }

    #[tokio::test]
    async fn test_append_and_range() {
        let backend = MemoryBackend::new();

        assert_ok!(backend.append("k", entry_id(1000), &fields("a")).await);
        assert_ok!(backend.append("k", entry_id(2000), &fields("b")).await);

        let records = backend.range("k", entry_id(0)).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![entry_id(1000), entry_id(2000)]);
        assert_eq!(records[0].message(), Some("a"));
    }

    #[tokio::test]
    async fn test_range_start_is_inclusive() {
        let backend = MemoryBackend::new();
        backend.append("k", entry_id(1000), &fields("a")).await.unwrap();
        backend.append("k", entry_id(2000), &fields("b")).await.unwrap();

        assert_eq!(backend.range("k", entry_id(2000)).await.unwrap().len(), 1);
        assert_eq!(backend.range("k", entry_id(2001)).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_range_missing_stream_is_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.range("missing", entry_id(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_increasing_id() {
        let backend = MemoryBackend::new();
        backend.append("k", entry_id(2000), &fields("a")).await.unwrap();

        let same = backend.append("k", entry_id(2000), &fields("b")).await;
        assert!(matches!(same, Err(BackendError::IdNotIncreasing { .. })));

        let older = backend.append("k", entry_id(1000), &fields("c")).await;
        assert!(matches!(older, Err(BackendError::IdNotIncreasing { .. })));

        assert_eq!(backend.len("k"), 1);
    }

    #[tokio::test]
    async fn test_rejects_zero_id() {
        let backend = MemoryBackend::new();
        assert_err!(backend.append("k", EntryId::MIN, &fields("a")).await);
        assert!(!backend.has("k"));
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let backend = MemoryBackend::new();
        backend.append("a", entry_id(1000), &fields("x")).await.unwrap();

        // Same id in another stream is fine.
        assert_ok!(backend.append("b", entry_id(1000), &fields("y")).await);
        assert_eq!(backend.len("a"), 1);
        assert_eq!(backend.len("b"), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let backend = MemoryBackend::new();
        backend.append("k", entry_id(1000), &fields("a")).await.unwrap();
        backend.expire("k", Duration::ZERO).await.unwrap();

        assert!(!backend.has("k"));
        assert!(backend.range("k", entry_id(0)).await.unwrap().is_empty());

        // The id sequence restarts with the new stream.
        assert_ok!(backend.append("k", entry_id(500), &fields("b")).await);
    }

    #[tokio::test]
    async fn test_expire_missing_stream_is_noop() {
        let backend = MemoryBackend::new();
        assert_ok!(backend.expire("missing", Duration::from_secs(60)).await);
        assert!(!backend.has("missing"));
    }

    #[tokio::test]
    async fn test_ttl_elapses() {
        let backend = MemoryBackend::new();
        backend.append("k", entry_id(1000), &fields("a")).await.unwrap();
        backend.expire("k", Duration::from_millis(20)).await.unwrap();
        assert!(backend.has("k"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!backend.has("k"));
        assert!(backend.range("k", entry_id(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writes_sweep_streams_nobody_touches_again() {
        let backend = MemoryBackend::with_sweep_interval(Duration::ZERO);
        for n in 0..1000 {
            let key = format!("old-{n}");
            backend.append(&key, entry_id(1000), &fields("a")).await.unwrap();
            backend.expire(&key, Duration::from_millis(5)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        for n in 0..10 {
            let key = format!("new-{n}");
            backend.append(&key, entry_id(1000), &fields("b")).await.unwrap();
        }

        assert_eq!(backend.stream_count(), 10);
    }

    #[tokio::test]
    async fn test_sweep_waits_for_interval() {
        let backend = MemoryBackend::with_sweep_interval(Duration::from_secs(3600));
        backend.append("old", entry_id(1000), &fields("a")).await.unwrap();
        backend.expire("old", Duration::ZERO).await.unwrap();

        backend.append("new", entry_id(1000), &fields("b")).await.unwrap();
        assert_eq!(backend.stream_count(), 2);

        assert_eq!(backend.sweep_expired(), 1);
        assert_eq!(backend.stream_count(), 1);
        assert!(backend.has("new"));
    }

    #[tokio::test]
    async fn test_commands_fail_after_close() {
        let backend = MemoryBackend::new();
        backend.append("k", entry_id(1000), &fields("a")).await.unwrap();

        let handle = backend.clone();
        assert_ok!(backend.close().await);

        assert!(!handle.has("k"));
        assert!(matches!(
            handle.append("k", entry_id(2000), &fields("b")).await,
            Err(BackendError::Unavailable(_))
        ));
        assert_err!(handle.range("k", entry_id(0)).await);
        assert_err!(handle.ping().await);
    }

    #[tokio::test]
    async fn test_insert_raw_keeps_order() {
        let backend = MemoryBackend::new();
        backend.append("k", entry_id(3000), &fields("c")).await.unwrap();
        backend.insert_raw(
            "k",
            Record {
                id: entry_id(1000),
                fields: HashMap::new(),
            },
        );

        let ids: Vec<_> = backend
            .range("k", entry_id(0))
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![entry_id(1000), entry_id(3000)]);
    }
}
