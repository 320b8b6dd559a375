// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recovery: rebuild the best-known record from every copy anywhere.
//!
//! A normal read looks at each tier's primary key. Recovery widens that to
//! every variant the key schema knows (primary, backup, emergency
//! snapshots) plus the persisted queue's copy, and hands everything usable to
//! [`reconcile`](crate::reconcile::reconcile).
//!
//! Copies that claim a different quiz are contamination: they are purged from
//! the local tier they were found in and never merged. Payloads that are not
//! JSON objects are discarded the same way.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::metrics;
use crate::normalize::NameNormalizer;
use crate::queue::SyncQueue;
use crate::reconcile::{reconcile, Candidate, Reconciled};
use crate::record::{ParsedRecord, QuizProgressRecord};
use crate::storage::key::StorageKey;
use crate::storage::timed;
use crate::storage::traits::{StorageTier, TierKind};

/// Verdict on one stored payload.
#[derive(Debug)]
pub(crate) enum Inspection {
    Usable(ParsedRecord),
    /// Embedded quiz id normalizes to something else
    Contaminated { found: String },
    /// Not a JSON object
    Corrupt,
}

/// Parse a payload read under `quiz_id` and check it belongs there.
/// An empty embedded id is accepted (reconciliation stamps it).
pub(crate) fn inspect(normalizer: &NameNormalizer, quiz_id: &str, raw: &str) -> Inspection {
    let Some(parsed) = QuizProgressRecord::from_str_lenient(raw) else {
        return Inspection::Corrupt;
    };
    let embedded = parsed.record.quiz_id.trim();
    if !embedded.is_empty() && normalizer.normalize(embedded) != quiz_id {
        return Inspection::Contaminated { found: embedded.to_string() };
    }
    Inspection::Usable(parsed)
}

pub struct RecoveryService {
    username: String,
    normalizer: Arc<NameNormalizer>,
    remote: Arc<dyn StorageTier>,
    durable: Arc<dyn StorageTier>,
    ephemeral: Arc<dyn StorageTier>,
    queue: Arc<SyncQueue>,
    remote_timeout: Duration,
    local_timeout: Duration,
}

impl RecoveryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        username: impl Into<String>,
        normalizer: Arc<NameNormalizer>,
        remote: Arc<dyn StorageTier>,
        durable: Arc<dyn StorageTier>,
        ephemeral: Arc<dyn StorageTier>,
        queue: Arc<SyncQueue>,
        remote_timeout: Duration,
        local_timeout: Duration,
    ) -> Self {
        Self {
            username: username.into(),
            normalizer,
            remote,
            durable,
            ephemeral,
            queue,
            remote_timeout,
            local_timeout,
        }
    }

    /// Every usable copy of `quiz_id` (already canonical), remote first.
    /// `include_remote` is false while a remote reset is still pending.
    pub async fn scan(&self, quiz_id: &str, include_remote: bool) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        if include_remote {
            self.scan_remote(quiz_id, &mut candidates).await;
        }

        for (kind, tier) in self.locals() {
            self.scan_local(kind, tier, quiz_id, &mut candidates).await;
        }

        // Only the persisted queue counts; an entry that never reached the
        // durable tier exists in memory alone.
        if let Some(entry) = self.queue.stored_entry(&self.username, quiz_id, self.local_timeout).await {
            if let Some(record) = entry.record() {
                candidates.push(Candidate::new(TierKind::Durable, record.clone()));
            }
        }

        candidates
    }

    async fn scan_remote(&self, quiz_id: &str, out: &mut Vec<Candidate>) {
        let primary = StorageKey::primary(&self.username, quiz_id);
        match timed(TierKind::Remote, "get", self.remote_timeout, self.remote.get(&primary)).await {
            Ok(Some(raw)) => match inspect(&self.normalizer, quiz_id, &raw) {
                Inspection::Usable(parsed) => {
                    if !parsed.is_clean() {
                        metrics::record_corruption(TierKind::Remote);
                    }
                    out.push(Candidate::new(TierKind::Remote, parsed.record));
                }
                // The server's copy is not ours to delete; just ignore it.
                Inspection::Contaminated { found } => {
                    metrics::record_contamination(TierKind::Remote);
                    warn!(quiz_id, found = %found, "Remote returned another quiz's record, ignoring");
                }
                Inspection::Corrupt => metrics::record_corruption(TierKind::Remote),
            },
            Ok(None) => {}
            Err(e) => debug!(quiz_id, error = %e, "Remote unavailable during recovery scan"),
        }
    }

    fn locals(&self) -> [(TierKind, &dyn StorageTier); 2] {
        [(TierKind::Durable, self.durable.as_ref()), (TierKind::Ephemeral, self.ephemeral.as_ref())]
    }

    async fn scan_local(&self, kind: TierKind, tier: &dyn StorageTier, quiz_id: &str, out: &mut Vec<Candidate>) {
        let prefix = StorageKey::quiz_prefix(&self.username, quiz_id);
        let keys = match timed(kind, "list", self.local_timeout, tier.list_keys(&prefix)).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(tier = %kind, quiz_id, error = %e, "Recovery could not list keys");
                return;
            }
        };

        for key in keys {
            let raw = match timed(kind, "get", self.local_timeout, tier.get(&key)).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    debug!(tier = %kind, key = %key, error = %e, "Recovery read failed");
                    continue;
                }
            };
            match inspect(&self.normalizer, quiz_id, &raw) {
                Inspection::Usable(parsed) => {
                    if !parsed.is_clean() {
                        metrics::record_corruption(kind);
                        debug!(tier = %kind, key = %key, corrections = ?parsed.corrections, "Sanitized stored record");
                    }
                    out.push(Candidate::new(kind, parsed.record));
                }
                Inspection::Contaminated { found } => {
                    metrics::record_contamination(kind);
                    warn!(tier = %kind, key = %key, found = %found, "Purging contaminated record");
                    purge(kind, tier, &key, self.local_timeout).await;
                }
                Inspection::Corrupt => {
                    metrics::record_corruption(kind);
                    warn!(tier = %kind, key = %key, "Discarding unparseable record");
                    purge(kind, tier, &key, self.local_timeout).await;
                }
            }
        }
    }

    /// Scan and reconcile. The caller writes the winner back.
    pub async fn recover(&self, quiz_id: &str, include_remote: bool) -> Option<Reconciled> {
        let candidates = self.scan(quiz_id, include_remote).await;
        let found = candidates.len();
        let result = reconcile(quiz_id, candidates);
        metrics::record_recovery(result.is_some());
        match &result {
            Some(winner) => info!(
                quiz_id,
                copies = found,
                source = %winner.source,
                answered = winner.record.questions_answered,
                "Recovered progress"
            ),
            None => debug!(quiz_id, "Nothing to recover"),
        }
        result
    }

    /// Canonical ids with any local copy or queued write for this user.
    pub async fn known_quizzes(&self) -> Vec<String> {
        let prefix = StorageKey::user_prefix(&self.username);
        let mut ids = BTreeSet::new();
        for (kind, tier) in self.locals() {
            match timed(kind, "list", self.local_timeout, tier.list_keys(&prefix)).await {
                Ok(keys) => {
                    ids.extend(keys.iter().filter_map(|k| k.quiz_id()).map(|q| self.normalizer.normalize(q)));
                }
                Err(e) => warn!(tier = %kind, error = %e, "Could not list stored quizzes"),
            }
        }
        ids.extend(
            self.queue
                .entries()
                .into_iter()
                .filter(|e| e.username == self.username)
                .map(|e| e.quiz_id),
        );
        ids.retain(|id| !id.is_empty());
        ids.into_iter().collect()
    }
}

async fn purge(kind: TierKind, tier: &dyn StorageTier, key: &StorageKey, timeout: Duration) {
    if let Err(e) = timed(kind, "remove", timeout, tier.remove(key)).await {
        warn!(tier = %kind, key = %key, error = %e, "Purge failed");
    }
}

/// Whether a read result is suspicious enough to warrant a full scan.
pub(crate) fn needs_recovery(winner: Option<&Reconciled>) -> bool {
    match winner {
        None => true,
        Some(w) => w.repaired || w.record.effective_count() == 0,
    }
}
