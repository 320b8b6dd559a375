// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync queue: durable, per-key deduplicated retry buffer for the remote tier.
//!
//! Writes the remote tier could not take land here and are pushed later by
//! [`SyncQueue::drain`]. This is not a tier: entries are "in flight" to the
//! remote, and the durable tier holds its own copy of every record anyway.
//!
//! # Guarantees
//!
//! - one entry per `(username, quiz_id)`; a newer enqueue replaces the old
//!   entry and resets its retry count
//! - the queue is persisted to the durable tier on every change
//! - every remote write (drain or direct) passes through one async gate, so
//!   two writes for the same key can never race each other to the server
//! - an entry failing `max_retries` consecutive drains is dropped with a
//!   warning

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::record::{now_millis, QuizProgressRecord};
use crate::storage::key::StorageKey;
use crate::storage::timed;
use crate::storage::traits::{StorageTier, TierError, TierKind};

/// What a queued entry will do to the remote copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueuedWrite {
    /// Save this snapshot
    Upsert(QuizProgressRecord),
    /// Delete the remote record
    Reset,
}

impl QueuedWrite {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub username: String,
    pub quiz_id: String,
    pub write: QueuedWrite,
    /// Epoch millis
    pub enqueued_at: i64,
    pub retry_count: u32,
    /// An upsert that replaced a pending reset: the remote copy is still the
    /// pre-reset record until this entry lands
    #[serde(default)]
    pub after_reset: bool,
    /// Identity of this version of the entry; changes on replacement
    #[serde(skip)]
    seq: u64,
}

impl SyncQueueEntry {
    fn is_for(&self, username: &str, quiz_id: &str) -> bool {
        self.username == username && self.quiz_id == quiz_id
    }

    #[must_use]
    pub fn record(&self) -> Option<&QuizProgressRecord> {
        match &self.write {
            QueuedWrite::Upsert(record) => Some(record),
            QueuedWrite::Reset => None,
        }
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Entries left after the pass
    pub remaining: usize,
    /// Another drain was already running
    pub skipped: bool,
}

impl DrainReport {
    /// No entry failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Queue state for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncQueueStats {
    /// Entries currently queued
    pub pending: usize,
    /// Total enqueues since startup
    pub total_enqueued: u64,
    /// Total entries pushed to the remote since startup
    pub total_synced: u64,
    /// Total entries dropped after exhausting retries
    pub total_dropped: u64,
    /// Whether a drain is currently in progress
    pub draining: bool,
}

pub struct SyncQueue {
    entries: Mutex<Vec<SyncQueueEntry>>,
    remote: Arc<dyn StorageTier>,
    durable: Arc<dyn StorageTier>,
    /// Serializes every remote write
    gate: tokio::sync::Mutex<()>,
    /// Serializes persistence so an older snapshot never lands last
    persist_lock: tokio::sync::Mutex<()>,
    draining: AtomicBool,
    wake: Notify,
    next_seq: AtomicU64,
    max_retries: u32,
    save_timeout: Duration,
    total_enqueued: AtomicU64,
    total_synced: AtomicU64,
    total_dropped: AtomicU64,
}

impl SyncQueue {
    pub fn new(
        remote: Arc<dyn StorageTier>,
        durable: Arc<dyn StorageTier>,
        max_retries: u32,
        save_timeout: Duration,
    ) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            remote,
            durable,
            gate: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
            draining: AtomicBool::new(false),
            wake: Notify::new(),
            next_seq: AtomicU64::new(1),
            max_retries: max_retries.max(1),
            save_timeout,
            total_enqueued: AtomicU64::new(0),
            total_synced: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Restore entries persisted by a previous run. Entries already queued in
    /// this run are newer and win. An unreadable queue is discarded.
    pub async fn load(&self) -> Result<usize, TierError> {
        let Some(raw) = self.durable.get(&StorageKey::SyncQueue).await? else {
            return Ok(0);
        };

        let stored: Vec<SyncQueueEntry> = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Persisted sync queue unreadable, discarding");
                metrics::record_corruption(TierKind::Durable);
                self.durable.remove(&StorageKey::SyncQueue).await?;
                return Ok(0);
            }
        };

        let restored = {
            let mut entries = self.entries.lock();
            let mut restored = 0;
            for mut entry in stored {
                if entries.iter().any(|e| e.is_for(&entry.username, &entry.quiz_id)) {
                    continue;
                }
                entry.seq = self.next_seq();
                entries.push(entry);
                restored += 1;
            }
            metrics::set_queue_depth(entries.len());
            restored
        };

        if restored > 0 {
            info!(restored, "Sync queue restored from durable tier");
            self.wake.notify_one();
        }
        Ok(restored)
    }

    /// Queue a record for the remote tier, replacing any entry for the key.
    pub async fn enqueue(&self, username: &str, quiz_id: &str, record: QuizProgressRecord) {
        self.push(username, quiz_id, QueuedWrite::Upsert(record)).await;
    }

    /// Queue deletion of the remote copy, replacing any pending save.
    pub async fn enqueue_reset(&self, username: &str, quiz_id: &str) {
        self.push(username, quiz_id, QueuedWrite::Reset).await;
    }

    async fn push(&self, username: &str, quiz_id: &str, write: QueuedWrite) {
        let op = write.as_str();
        let mut entry = SyncQueueEntry {
            username: username.to_string(),
            quiz_id: quiz_id.to_string(),
            write,
            enqueued_at: now_millis(),
            retry_count: 0,
            after_reset: false,
            seq: self.next_seq(),
        };

        let depth = {
            let mut entries = self.entries.lock();
            match entries.iter_mut().find(|e| e.is_for(username, quiz_id)) {
                Some(existing) => {
                    entry.after_reset = entry.write != QueuedWrite::Reset
                        && (existing.write == QueuedWrite::Reset || existing.after_reset);
                    *existing = entry;
                }
                None => entries.push(entry),
            }
            entries.len()
        };
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::set_queue_depth(depth);
        debug!(username, quiz_id, op, depth, "Sync queue entry stored");

        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist sync queue");
        }
        self.wake.notify_one();
    }

    /// Write the queue to the durable tier (removing the key when empty).
    pub async fn persist(&self) -> Result<(), TierError> {
        let _persisting = self.persist_lock.lock().await;
        let snapshot = self.entries.lock().clone();
        if snapshot.is_empty() {
            return self.durable.remove(&StorageKey::SyncQueue).await;
        }
        let raw = serde_json::to_string(&snapshot).map_err(|e| TierError::Malformed(e.to_string()))?;
        self.durable.set(&StorageKey::SyncQueue, &raw).await
    }

    /// Write straight to the remote under the gate. On success any queued
    /// entry for the key that predates this call is cleared.
    pub async fn push_through(
        &self,
        username: &str,
        quiz_id: &str,
        write: &QueuedWrite,
        timeout: Duration,
    ) -> Result<(), TierError> {
        let _gate = self.gate.lock().await;
        let started_at = self.next_seq.load(Ordering::Relaxed);
        self.execute(username, quiz_id, write, timeout).await?;

        let cleared = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| !(e.is_for(username, quiz_id) && e.seq < started_at));
            metrics::set_queue_depth(entries.len());
            before != entries.len()
        };
        if cleared {
            debug!(username, quiz_id, "Direct write superseded queued entry");
            if let Err(e) = self.persist().await {
                warn!(error = %e, "Failed to persist sync queue");
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        username: &str,
        quiz_id: &str,
        write: &QueuedWrite,
        timeout: Duration,
    ) -> Result<(), TierError> {
        let key = StorageKey::primary(username, quiz_id);
        match write {
            QueuedWrite::Upsert(record) => {
                let value = record.to_json_string();
                timed(TierKind::Remote, "set", timeout, self.remote.set(&key, &value)).await
            }
            QueuedWrite::Reset => timed(TierKind::Remote, "remove", timeout, self.remote.remove(&key)).await,
        }
    }

    /// Push every queued entry to the remote, one at a time.
    ///
    /// Single-flight: a call made while another drain runs returns a report
    /// with `skipped` set.
    pub async fn drain(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::AcqRel) {
            return DrainReport { skipped: true, remaining: self.len(), ..DrainReport::default() };
        }
        let _guard = DrainGuard(&self.draining);

        let snapshot = self.entries.lock().clone();
        let mut report = DrainReport::default();
        if snapshot.is_empty() {
            return report;
        }
        info!(pending = snapshot.len(), "Draining sync queue");

        for entry in snapshot {
            let _gate = self.gate.lock().await;
            // Superseded or cleared by a direct write while we waited
            if !self.entries.lock().iter().any(|e| e.seq == entry.seq) {
                continue;
            }

            report.attempted += 1;
            match self.execute(&entry.username, &entry.quiz_id, &entry.write, self.save_timeout).await {
                Ok(()) => {
                    self.entries.lock().retain(|e| e.seq != entry.seq);
                    self.total_synced.fetch_add(1, Ordering::Relaxed);
                    report.synced += 1;
                    debug!(username = %entry.username, quiz_id = %entry.quiz_id, op = entry.write.as_str(), "Queued write synced");
                }
                Err(e) => {
                    report.failed += 1;
                    let dropped = {
                        let mut entries = self.entries.lock();
                        match entries.iter().position(|e| e.seq == entry.seq) {
                            Some(idx) => {
                                entries[idx].retry_count += 1;
                                if entries[idx].retry_count >= self.max_retries {
                                    Some(entries.remove(idx))
                                } else {
                                    None
                                }
                            }
                            None => None,
                        }
                    };
                    match dropped {
                        Some(gone) => {
                            self.total_dropped.fetch_add(1, Ordering::Relaxed);
                            metrics::record_queue_drop();
                            report.dropped += 1;
                            warn!(
                                username = %gone.username,
                                quiz_id = %gone.quiz_id,
                                retries = gone.retry_count,
                                error = %e,
                                "Dropping queued write after repeated failures; durable copy remains"
                            );
                        }
                        None => {
                            debug!(username = %entry.username, quiz_id = %entry.quiz_id, error = %e, "Queued write failed, will retry");
                        }
                    }
                }
            }
        }

        report.remaining = self.len();
        metrics::set_queue_depth(report.remaining);
        metrics::record_drain(report.synced, report.failed);
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist sync queue after drain");
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            dropped = report.dropped,
            remaining = report.remaining,
            "Sync queue drain complete"
        );
        report
    }

    /// Resolves after the next enqueue (or restore). A wake that happened
    /// while nobody waited is kept for the next call.
    pub async fn woken(&self) {
        self.wake.notified().await;
    }

    #[must_use]
    pub fn pending(&self, username: &str, quiz_id: &str) -> Option<SyncQueueEntry> {
        self.entries.lock().iter().find(|e| e.is_for(username, quiz_id)).cloned()
    }

    /// The entry for a key as persisted on the durable tier. `None` when the
    /// durable tier is unreachable or never received it.
    pub async fn stored_entry(&self, username: &str, quiz_id: &str, timeout: Duration) -> Option<SyncQueueEntry> {
        let raw = timed(TierKind::Durable, "get", timeout, self.durable.get(&StorageKey::SyncQueue))
            .await
            .ok()??;
        let stored: Vec<SyncQueueEntry> = serde_json::from_str(&raw).ok()?;
        stored.into_iter().find(|e| e.is_for(username, quiz_id))
    }

    /// Whether the remote copy of the key still predates a reset.
    #[must_use]
    pub fn has_pending_reset(&self, username: &str, quiz_id: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.is_for(username, quiz_id) && (e.write == QueuedWrite::Reset || e.after_reset))
    }

    #[must_use]
    pub fn entries(&self) -> Vec<SyncQueueEntry> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> SyncQueueStats {
        SyncQueueStats {
            pending: self.len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_synced: self.total_synced.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            draining: self.draining.load(Ordering::Acquire),
        }
    }
}

/// RAII guard to reset draining flag.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
