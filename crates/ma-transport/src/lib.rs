//! Stream Transport (spec §4.1): append-only, per-key consumer-group
//! read/ack over a logical "request stream" and "event stream".
//!
//! No single teacher file matches a consumer-group log; grounded on
//! `csa-mcp-hub/src/registry_pool.rs` (shared registry behind an async
//! lock, read from multiple loops) and the append/ack queue shape in
//! `other_examples/02f44294_monokrome-foiacquire__...-work_queue-pipeline.rs`.
//! Concrete distributed backends (spec §1 Non-goals) are out of scope;
//! only this in-process reference implementation ships.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("consumer group '{0}' already exists on stream '{1}'")]
    AlreadyExists(String, String),
    #[error("unknown stream '{0}'")]
    UnknownStream(String),
    #[error("unknown consumer group '{0}' on stream '{1}'")]
    UnknownGroup(String, String),
}

pub type StreamId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub block_ms: u64,
    pub count: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            block_ms: 1_000,
            count: 1,
        }
    }
}

/// Start position for a newly created consumer group: `Zero` replays the
/// whole log, `Latest` ("$") starts after whatever is currently appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    Zero,
    Latest,
}

/// Pluggable append-only stream transport with consumer-group semantics
/// (spec §4.1). At-least-once delivery per group with explicit ack;
/// un-acked entries remain pending to the consumer that read them until
/// reclaimed (reclamation is explicitly out of scope, spec §4.1/§9).
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn group_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), TransportError>;

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        opts: ReadOptions,
    ) -> Result<Vec<StreamEntry>, TransportError>;

    async fn ack(&self, stream: &str, group: &str, id: StreamId) -> Result<(), TransportError>;

    async fn append(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
    ) -> Result<StreamId, TransportError>;

    /// Range-scan a stream's backing log from `start` to `end` inclusive
    /// (used by the Abort Path, spec §7, to enumerate entries to purge).
    async fn range(
        &self,
        stream: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, TransportError>;

    /// Permanently remove an entry from the stream's backing log (Abort
    /// Path's final `xDel`). Idempotent.
    async fn delete(&self, stream: &str, id: StreamId) -> Result<(), TransportError>;

    /// All consumer group names currently registered on `stream`, used by
    /// the Abort Path to ack-then-delete across every persona group plus
    /// the coordination group.
    async fn group_names(&self, stream: &str) -> Vec<String>;
}

struct ConsumerGroup {
    cursor: StreamId,
    pending: HashSet<StreamId>,
}

struct StreamLog {
    entries: BTreeMap<StreamId, StreamEntry>,
    next_id: StreamId,
    groups: HashMap<String, ConsumerGroup>,
}

impl StreamLog {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            groups: HashMap::new(),
        }
    }
}

/// Reference in-process transport. One process-wide instance is typically
/// shared (via `Arc`) across the persona dispatcher loops and the
/// coordinator.
#[derive(Clone)]
pub struct LocalStreamTransport {
    streams: Arc<Mutex<HashMap<String, StreamLog>>>,
    notify: Arc<Notify>,
}

impl Default for LocalStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStreamTransport {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl StreamTransport for LocalStreamTransport {
    async fn group_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().await;
        let log = streams.entry(stream.to_string()).or_insert_with(StreamLog::new);
        if log.groups.contains_key(group) {
            return Err(TransportError::AlreadyExists(group.to_string(), stream.to_string()));
        }
        let cursor = match start {
            GroupStart::Zero => 0,
            GroupStart::Latest => log.next_id.saturating_sub(1),
        };
        log.groups.insert(
            group.to_string(),
            ConsumerGroup {
                cursor,
                pending: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        opts: ReadOptions,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(opts.block_ms.max(1));
        loop {
            {
                let mut streams = self.streams.lock().await;
                let log = streams
                    .get_mut(stream)
                    .ok_or_else(|| TransportError::UnknownStream(stream.to_string()))?;
                let group_state = log
                    .groups
                    .get_mut(group)
                    .ok_or_else(|| TransportError::UnknownGroup(group.to_string(), stream.to_string()))?;

                let new_entries: Vec<StreamEntry> = log
                    .entries
                    .range((group_state.cursor + 1)..)
                    .take(opts.count.max(1))
                    .map(|(_, e)| e.clone())
                    .collect();

                if !new_entries.is_empty() {
                    for entry in &new_entries {
                        group_state.cursor = group_state.cursor.max(entry.id);
                        group_state.pending.insert(entry.id);
                    }
                    return Ok(new_entries);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: StreamId) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().await;
        let log = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::UnknownStream(stream.to_string()))?;
        let group_state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| TransportError::UnknownGroup(group.to_string(), stream.to_string()))?;
        group_state.pending.remove(&id);
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
    ) -> Result<StreamId, TransportError> {
        let id = {
            let mut streams = self.streams.lock().await;
            let log = streams.entry(stream.to_string()).or_insert_with(StreamLog::new);
            let id = log.next_id;
            log.next_id += 1;
            log.entries.insert(id, StreamEntry { id, fields });
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn range(
        &self,
        stream: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        let streams = self.streams.lock().await;
        let log = streams
            .get(stream)
            .ok_or_else(|| TransportError::UnknownStream(stream.to_string()))?;
        Ok(log.entries.range(start..=end).map(|(_, e)| e.clone()).collect())
    }

    async fn delete(&self, stream: &str, id: StreamId) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().await;
        if let Some(log) = streams.get_mut(stream) {
            log.entries.remove(&id);
            for group in log.groups.values_mut() {
                group.pending.remove(&id);
            }
        }
        Ok(())
    }

    async fn group_names(&self, stream: &str) -> Vec<String> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .map(|log| log.groups.keys().cloned().collect())
            .unwrap_or_default()
    }
}
