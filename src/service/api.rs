// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Facade operations: save, load, reset, and the tier-level read/write
//! they are built on.
//!
//! Every public call takes a raw quiz name and canonicalizes it first;
//! nothing below this layer ever sees a non-canonical id.

use tracing::{debug, error, info, instrument, warn};

use crate::error::ProgressError;
use crate::metrics;
use crate::queue::QueuedWrite;
use crate::reconcile::{reconcile, Candidate, Reconciled};
use crate::record::{now_millis, AnswerPolicy, QuestionAttempt, QuizProgressRecord, QuizStatus};
use crate::recovery::{inspect, needs_recovery, Inspection};
use crate::storage::key::{KeyVariant, StorageKey};
use crate::storage::timed;
use crate::storage::traits::{StorageTier, TierError, TierKind};

use super::types::{LoadResult, SaveResult, TierReading, TierWriteReport};
use super::ProgressService;

impl ProgressService {
    fn canonical(&self, raw: &str) -> Result<String, ProgressError> {
        let id = self.normalizer.normalize(raw);
        if id.is_empty() {
            return Err(ProgressError::InvalidQuizId(raw.to_string()));
        }
        Ok(id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SAVE
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist progress to every tier.
    ///
    /// The record is repaired, its experience clamped and its quiz id stamped
    /// before writing. A save with fewer answers than the newest record seen
    /// this session is treated as stale: the newer record is re-persisted
    /// instead. If no tier accepts the write the record is kept in memory
    /// (degraded mode) and the result says so; this never returns `Err`.
    #[instrument(skip(self, record), fields(quiz_id))]
    pub async fn save(&self, raw_quiz_id: &str, record: QuizProgressRecord) -> SaveResult {
        let quiz_id = match self.canonical(raw_quiz_id) {
            Ok(id) => id,
            Err(e) => return SaveResult::failed(e, false),
        };
        tracing::Span::current().record("quiz_id", quiz_id.as_str());

        let mut record = record;
        record.quiz_id = quiz_id.clone();
        record.repair();
        record.clamp_experience(self.config.max_xp);
        record.last_updated = now_millis();

        if let Some(known) = self.last_known.get(&quiz_id) {
            if record.effective_count() < known.effective_count() {
                warn!(
                    quiz_id = %quiz_id,
                    incoming = record.effective_count(),
                    known = known.effective_count(),
                    "Refusing to regress progress; re-saving newest known record"
                );
                metrics::record_regression_blocked();
                record = known.clone();
                record.last_updated = now_millis();
            }
        }
        self.last_known.insert(quiz_id.clone(), record.clone());

        match self.write_canonical(&quiz_id, &record).await {
            Ok(report) => {
                self.degraded.remove(&quiz_id);
                SaveResult::from_report(report)
            }
            Err(e) => {
                self.degraded.insert(quiz_id.clone());
                metrics::record_degraded_save();
                SaveResult::failed(e, true)
            }
        }
    }

    /// Record one answer against the newest known progress and save.
    ///
    /// Returns the status after the answer; answering a finished quiz is
    /// rejected with [`ProgressError::QuizFinished`].
    pub async fn answer(
        &self,
        raw_quiz_id: &str,
        attempt: QuestionAttempt,
        xp_delta: i32,
        total_questions: usize,
    ) -> Result<(QuizStatus, SaveResult), ProgressError> {
        let quiz_id = self.canonical(raw_quiz_id)?;
        let known = self.last_known.get(&quiz_id).map(|r| r.clone());
        let mut record = match known {
            Some(record) => record,
            None => self.load(&quiz_id).await.data.unwrap_or_else(|| QuizProgressRecord::new(&quiz_id)),
        };

        let policy = AnswerPolicy {
            total_questions,
            pass_threshold: self.config.pass_threshold,
            max_xp: self.config.max_xp,
        };
        let status = record.record_answer(attempt, xp_delta, &policy)?;
        let saved = self.save(&quiz_id, record).await;
        Ok((status, saved))
    }

    /// Write a record to every tier independently.
    ///
    /// Local tiers are written first so the record is durable before the
    /// network is touched; a failed remote write goes to the sync queue.
    /// `Err` only when every tier failed.
    pub async fn write(
        &self,
        raw_quiz_id: &str,
        record: &QuizProgressRecord,
    ) -> Result<TierWriteReport, ProgressError> {
        let quiz_id = self.canonical(raw_quiz_id)?;
        let mut record = record.clone();
        record.quiz_id = quiz_id.clone();
        self.write_canonical(&quiz_id, &record).await
    }

    pub(super) async fn write_canonical(
        &self,
        quiz_id: &str,
        record: &QuizProgressRecord,
    ) -> Result<TierWriteReport, ProgressError> {
        let value = record.to_json_string();
        let key = StorageKey::primary(&self.username, quiz_id);
        let (durable, ephemeral) = tokio::join!(
            self.write_durable(quiz_id, &value),
            self.write_local(TierKind::Ephemeral, self.ephemeral.as_ref(), &key, &value),
        );
        let mut report = TierWriteReport { durable, ephemeral, ..TierWriteReport::default() };

        if !durable {
            self.emergency_snapshot(TierKind::Ephemeral, self.ephemeral.as_ref(), quiz_id, &value).await;
        }

        let upsert = QueuedWrite::Upsert(record.clone());
        match self
            .queue
            .push_through(&self.username, quiz_id, &upsert, self.config.progress_timeout())
            .await
        {
            Ok(()) => report.remote = true,
            Err(e) => {
                debug!(quiz_id, error = %e, "Remote save failed, queueing");
                self.queue.enqueue(&self.username, quiz_id, record.clone()).await;
                report.queued = true;
                report.remote_error = Some(e);
            }
        }

        if !report.any() {
            error!(quiz_id, "Every storage tier rejected the write");
            return Err(ProgressError::StorageUnavailable { quiz_id: quiz_id.to_string() });
        }
        Ok(report)
    }

    /// Primary then backup. Success means the primary landed.
    async fn write_durable(&self, quiz_id: &str, value: &str) -> bool {
        let tier = self.durable.as_ref();
        if !self.write_local(TierKind::Durable, tier, &StorageKey::primary(&self.username, quiz_id), value).await {
            return false;
        }
        self.write_local(TierKind::Durable, tier, &StorageKey::backup(&self.username, quiz_id), value).await;
        true
    }

    async fn write_local(&self, kind: TierKind, tier: &dyn StorageTier, key: &StorageKey, value: &str) -> bool {
        match timed(kind, "set", self.config.light_timeout(), tier.set(key, value)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(tier = %kind, key = %key, error = %e, "Tier write failed");
                false
            }
        }
    }

    /// Timestamped copy on `tier`, keeping only the newest few.
    pub(super) async fn emergency_snapshot(&self, kind: TierKind, tier: &dyn StorageTier, quiz_id: &str, value: &str) {
        let key = StorageKey::emergency(&self.username, quiz_id, now_millis());
        if !self.write_local(kind, tier, &key, value).await {
            return;
        }
        info!(tier = %kind, key = %key, "Emergency snapshot written");

        let prefix = StorageKey::quiz_prefix(&self.username, quiz_id);
        let Ok(keys) = timed(kind, "list", self.config.light_timeout(), tier.list_keys(&prefix)).await else {
            return;
        };
        let mut snapshots: Vec<(i64, StorageKey)> = keys
            .into_iter()
            .filter_map(|k| match k.variant() {
                Some(KeyVariant::Emergency(at)) => Some((at, k)),
                _ => None,
            })
            .collect();
        snapshots.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, stale) in snapshots.into_iter().skip(self.config.emergency_snapshot_limit.max(1)) {
            let _ = timed(kind, "remove", self.config.light_timeout(), tier.remove(&stale)).await;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOAD
    // ═══════════════════════════════════════════════════════════════════════

    /// Query every tier's primary copy concurrently.
    ///
    /// Contaminated or unparseable local copies are purged and reported as
    /// absent, with the problem in [`TierReading::issue`].
    pub async fn read(&self, raw_quiz_id: &str) -> Result<Vec<TierReading>, ProgressError> {
        let quiz_id = self.canonical(raw_quiz_id)?;
        Ok(self.read_canonical(&quiz_id).await)
    }

    async fn read_canonical(&self, quiz_id: &str) -> Vec<TierReading> {
        let key = StorageKey::primary(&self.username, quiz_id);
        let (remote, durable, ephemeral) = tokio::join!(
            self.read_tier(TierKind::Remote, self.remote.as_ref(), &key, quiz_id, self.config.progress_timeout()),
            self.read_tier(TierKind::Durable, self.durable.as_ref(), &key, quiz_id, self.config.light_timeout()),
            self.read_tier(TierKind::Ephemeral, self.ephemeral.as_ref(), &key, quiz_id, self.config.light_timeout()),
        );
        vec![remote, durable, ephemeral]
    }

    async fn read_tier(
        &self,
        kind: TierKind,
        tier: &dyn StorageTier,
        key: &StorageKey,
        quiz_id: &str,
        timeout: std::time::Duration,
    ) -> TierReading {
        let raw = match timed(kind, "get", timeout, tier.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return TierReading::absent(kind),
            Err(e) => {
                debug!(tier = %kind, quiz_id, error = %e, "Tier read failed");
                return TierReading { error: Some(e), ..TierReading::absent(kind) };
            }
        };

        match inspect(&self.normalizer, quiz_id, &raw) {
            Inspection::Usable(parsed) => {
                let issue = (!parsed.is_clean()).then(|| {
                    metrics::record_corruption(kind);
                    warn!(tier = %kind, quiz_id, corrections = ?parsed.corrections, "Sanitized corrupt record");
                    ProgressError::DataCorruption {
                        quiz_id: quiz_id.to_string(),
                        detail: format!("{kind}: {}", parsed.corrections.join("; ")),
                    }
                });
                TierReading { record: Some(parsed.record), issue, ..TierReading::absent(kind) }
            }
            Inspection::Contaminated { found } => {
                metrics::record_contamination(kind);
                warn!(tier = %kind, key = %key, found = %found, "Contaminated record rejected");
                if kind != TierKind::Remote {
                    let _ = timed(kind, "remove", timeout, tier.remove(key)).await;
                }
                let issue = ProgressError::Contamination { key: format!("{kind}:{key}"), found };
                TierReading { issue: Some(issue), ..TierReading::absent(kind) }
            }
            Inspection::Corrupt => {
                metrics::record_corruption(kind);
                warn!(tier = %kind, key = %key, "Unparseable record discarded");
                if kind != TierKind::Remote {
                    let _ = timed(kind, "remove", timeout, tier.remove(key)).await;
                }
                let issue = ProgressError::DataCorruption {
                    quiz_id: quiz_id.to_string(),
                    detail: format!("{kind}: not a JSON object"),
                };
                TierReading {
                    error: Some(TierError::Malformed("not a JSON object".to_string())),
                    issue: Some(issue),
                    ..TierReading::absent(kind)
                }
            }
        }
    }

    /// Load the canonical record for a quiz.
    ///
    /// Reads every tier, reconciles, falls back to a full recovery scan when
    /// the result looks empty or needed repair, and re-persists the winner to
    /// any tier that lagged behind.
    #[instrument(skip(self), fields(quiz_id))]
    pub async fn load(&self, raw_quiz_id: &str) -> LoadResult {
        let Ok(quiz_id) = self.canonical(raw_quiz_id) else {
            return LoadResult::empty(false, Vec::new());
        };
        tracing::Span::current().record("quiz_id", quiz_id.as_str());

        let readings = self.read_canonical(&quiz_id).await;
        let mut issues: Vec<ProgressError> = readings.iter().filter_map(|r| r.issue.clone()).collect();
        let reset_pending = self.queue.has_pending_reset(&self.username, &quiz_id);
        let answered = readings.iter().any(TierReading::is_ok);

        let candidates: Vec<Candidate> = readings
            .iter()
            .filter(|r| !(reset_pending && r.tier == TierKind::Remote))
            .filter_map(|r| r.record.clone().map(|record| Candidate::new(r.tier, record)))
            .collect();
        let mut winner = reconcile(&quiz_id, candidates);
        let mut recovered = false;

        if needs_recovery(winner.as_ref()) {
            if let Some(found) = self.recovery.recover(&quiz_id, !reset_pending).await {
                let better = winner
                    .as_ref()
                    .map_or(true, |w| found.record.effective_count() >= w.record.effective_count());
                if better {
                    recovered = true;
                    winner = Some(found);
                }
            }
        }

        // A memory-only record from a degraded save outranks stale tiers.
        let repaired = winner.as_ref().is_some_and(|w| w.repaired);
        let mut source = winner.as_ref().map(|w| w.source);
        let mut record = winner.map(|w| w.record);
        if self.degraded.contains(&quiz_id) {
            if let Some(memory) = self.last_known.get(&quiz_id) {
                if record.as_ref().map_or(true, |r| memory.effective_count() > r.effective_count()) {
                    record = Some(memory.clone());
                    source = None;
                }
            }
        }

        let Some(mut record) = record else {
            return LoadResult::empty(answered, issues);
        };
        if let Some(w) = source {
            issues.extend(self.bound_experience(w, &mut record));
            metrics::record_reconcile_winner(w, repaired);
        }

        self.remember(&quiz_id, &record);
        self.heal(&quiz_id, &record, &readings).await;

        LoadResult { success: true, data: Some(record), source, recovered, issues }
    }

    /// Stored copies can carry more experience than the cap allows; that is
    /// corruption in `source`, and the healed tiers get the clamped value.
    fn bound_experience(&self, source: TierKind, record: &mut QuizProgressRecord) -> Option<ProgressError> {
        let stored = record.experience;
        if !record.clamp_experience(self.config.max_xp) {
            return None;
        }
        metrics::record_corruption(source);
        warn!(
            tier = %source,
            quiz_id = %record.quiz_id,
            stored,
            max_xp = self.config.max_xp,
            "Clamped out-of-range experience"
        );
        Some(ProgressError::DataCorruption {
            quiz_id: record.quiz_id.clone(),
            detail: format!("{source}: experience {stored} above {}", self.config.max_xp),
        })
    }

    fn remember(&self, quiz_id: &str, record: &QuizProgressRecord) {
        let newer = self
            .last_known
            .get(quiz_id)
            .map_or(true, |known| record.effective_count() >= known.effective_count());
        if newer {
            self.last_known.insert(quiz_id.to_string(), record.clone());
        }
    }

    /// Re-persist the winner to tiers whose copy differs. Locals are written
    /// directly; the remote goes through the queue so a load never blocks on
    /// the network twice.
    async fn heal(&self, quiz_id: &str, record: &QuizProgressRecord, readings: &[TierReading]) {
        let value = record.to_json_string();
        for reading in readings {
            let lagging = reading.record.as_ref() != Some(record);
            if !lagging {
                continue;
            }
            match reading.tier {
                TierKind::Remote => {
                    self.queue.enqueue(&self.username, quiz_id, record.clone()).await;
                }
                TierKind::Durable => {
                    if self.write_durable(quiz_id, &value).await {
                        debug!(quiz_id, "Healed durable tier");
                    }
                }
                TierKind::Ephemeral => {
                    let key = StorageKey::primary(&self.username, quiz_id);
                    if self.write_local(TierKind::Ephemeral, self.ephemeral.as_ref(), &key, &value).await {
                        debug!(quiz_id, "Healed ephemeral tier");
                    }
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RESET & RECOVERY
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove a quiz's progress from every tier.
    ///
    /// Local copies (all variants) are deleted now. If the remote delete
    /// fails it is queued, and the remote copy is ignored by `load` until
    /// the queued reset lands. Returns false if a local tier kept a copy.
    #[instrument(skip(self))]
    pub async fn reset(&self, raw_quiz_id: &str) -> bool {
        let Ok(quiz_id) = self.canonical(raw_quiz_id) else {
            return false;
        };
        self.last_known.remove(&quiz_id);
        self.degraded.remove(&quiz_id);

        let (durable_ok, ephemeral_ok) = tokio::join!(
            self.clear_local(TierKind::Durable, self.durable.as_ref(), &quiz_id),
            self.clear_local(TierKind::Ephemeral, self.ephemeral.as_ref(), &quiz_id),
        );

        match self
            .queue
            .push_through(&self.username, &quiz_id, &QueuedWrite::Reset, self.config.light_timeout())
            .await
        {
            Ok(()) => debug!(quiz_id = %quiz_id, "Remote progress deleted"),
            Err(e) => {
                warn!(quiz_id = %quiz_id, error = %e, "Remote reset failed, queueing");
                self.queue.enqueue_reset(&self.username, &quiz_id).await;
            }
        }

        info!(quiz_id = %quiz_id, durable_ok, ephemeral_ok, "Progress reset");
        durable_ok && ephemeral_ok
    }

    async fn clear_local(&self, kind: TierKind, tier: &dyn StorageTier, quiz_id: &str) -> bool {
        let timeout = self.config.light_timeout();
        let prefix = StorageKey::quiz_prefix(&self.username, quiz_id);
        let mut keys = match timed(kind, "list", timeout, tier.list_keys(&prefix)).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(tier = %kind, quiz_id, error = %e, "Could not list keys for reset");
                Vec::new()
            }
        };
        for fixed in [StorageKey::primary(&self.username, quiz_id), StorageKey::backup(&self.username, quiz_id)] {
            if !keys.contains(&fixed) {
                keys.push(fixed);
            }
        }

        let mut ok = true;
        for key in keys {
            if let Err(e) = timed(kind, "remove", timeout, tier.remove(&key)).await {
                warn!(tier = %kind, key = %key, error = %e, "Reset could not remove key");
                ok = false;
            }
        }
        ok
    }

    /// Full-tier scan for one quiz; the winner is written back everywhere.
    #[instrument(skip(self))]
    pub async fn recover(&self, raw_quiz_id: &str) -> Option<QuizProgressRecord> {
        let quiz_id = self.canonical(raw_quiz_id).ok()?;
        let reset_pending = self.queue.has_pending_reset(&self.username, &quiz_id);
        let Reconciled { mut record, source, .. } = self.recovery.recover(&quiz_id, !reset_pending).await?;
        self.bound_experience(source, &mut record);

        self.remember(&quiz_id, &record);
        if let Err(e) = self.write_canonical(&quiz_id, &record).await {
            warn!(quiz_id = %quiz_id, error = %e, "Recovered record could not be written back");
        }
        Some(record)
    }

    /// Recover every quiz with a local copy or queued write. Returns how many
    /// produced a record.
    ///
    /// Only local tiers are scanned, so a dead or hung network cannot stall
    /// the caller: winners are rewritten to the local tiers at once and reach
    /// the remote through the sync queue.
    pub async fn recover_all(&self) -> usize {
        let quizzes = self.recovery.known_quizzes().await;
        let mut recovered = 0;
        for quiz_id in &quizzes {
            if self.recover_local(quiz_id).await {
                recovered += 1;
            }
        }
        info!(known = quizzes.len(), recovered, "Startup recovery complete");
        recovered
    }

    async fn recover_local(&self, quiz_id: &str) -> bool {
        let Some(Reconciled { mut record, source, .. }) = self.recovery.recover(quiz_id, false).await else {
            return false;
        };
        self.bound_experience(source, &mut record);
        self.remember(quiz_id, &record);

        let value = record.to_json_string();
        let key = StorageKey::primary(&self.username, quiz_id);
        let (durable, ephemeral) = tokio::join!(
            self.write_durable(quiz_id, &value),
            self.write_local(TierKind::Ephemeral, self.ephemeral.as_ref(), &key, &value),
        );
        if !durable && !ephemeral {
            warn!(quiz_id, "Recovered record could not be written to any local tier");
        }
        self.queue.enqueue(&self.username, quiz_id, record).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ProgressSyncConfig;
    use crate::storage::ephemeral::EphemeralTier;

    struct Fixture {
        remote: Arc<EphemeralTier>,
        durable: Arc<EphemeralTier>,
        ephemeral: Arc<EphemeralTier>,
        service: ProgressService,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(EphemeralTier::new());
        let durable = Arc::new(EphemeralTier::new());
        let ephemeral = Arc::new(EphemeralTier::new());
        let config = ProgressSyncConfig { username: "alice".into(), ..Default::default() };
        let service = ProgressService::new(config, remote.clone(), durable.clone(), ephemeral.clone()).unwrap();
        Fixture { remote, durable, ephemeral, service }
    }

    fn record_with(answered: usize) -> QuizProgressRecord {
        let mut r = QuizProgressRecord::new("communication");
        for i in 0..answered {
            r.question_history.push(QuestionAttempt::answered(format!("s{i}"), "a", "a", 800));
        }
        r.questions_answered = answered;
        r.current_scenario_index = answered;
        r.status = QuizStatus::InProgress;
        r
    }

    #[tokio::test]
    async fn test_save_writes_all_tiers_under_canonical_key() {
        let f = fixture();
        let result = f.service.save("Communication Skills", record_with(2)).await;

        assert!(result.success && result.api_saved && result.local_saved);
        let key = StorageKey::primary("alice", "communication");
        assert!(f.remote.get(&key).await.unwrap().is_some());
        assert!(f.durable.get(&key).await.unwrap().is_some());
        assert!(f.durable.get(&StorageKey::backup("alice", "communication")).await.unwrap().is_some());
        assert!(f.ephemeral.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let f = fixture();
        f.service.save("communication", record_with(5)).await;

        let loaded = f.service.load("communication").await;
        let data = loaded.data.unwrap();
        assert_eq!(data.questions_answered, 5);
        assert_eq!(data.current_scenario_index, 5);
        assert_eq!(data.status, QuizStatus::InProgress);
        assert_eq!(loaded.source, Some(TierKind::Remote));
    }

    #[tokio::test]
    async fn test_save_rejects_regression() {
        let f = fixture();
        f.service.save("communication", record_with(4)).await;
        f.service.save("communication", record_with(1)).await;

        let stored = f.durable.get(&StorageKey::primary("alice", "communication")).await.unwrap().unwrap();
        let parsed = QuizProgressRecord::from_str_lenient(&stored).unwrap().record;
        assert_eq!(parsed.questions_answered, 4);
    }

    #[tokio::test]
    async fn test_save_clamps_experience_and_repairs_status() {
        let f = fixture();
        let mut r = record_with(0);
        r.experience = 10_000;
        r.status = QuizStatus::Passed;
        f.service.save("communication", r).await;

        let data = f.service.load("communication").await.data.unwrap();
        assert_eq!(data.experience, 300);
        assert_eq!(data.status, QuizStatus::InProgress);
    }

    #[tokio::test]
    async fn test_empty_quiz_id_rejected() {
        let f = fixture();
        let result = f.service.save("!!!", record_with(1)).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(ProgressError::InvalidQuizId(_))));
        assert!(!f.service.reset("   ").await);
    }

    #[tokio::test]
    async fn test_load_heals_lagging_local_tier() {
        let f = fixture();
        let key = StorageKey::primary("alice", "initiative");
        let mut full = record_with(6);
        full.quiz_id = "initiative".into();
        f.remote.set(&key, &full.to_json_string()).await.unwrap();

        let loaded = f.service.load("initiative").await;
        assert_eq!(loaded.data.unwrap().questions_answered, 6);

        let healed = f.durable.get(&key).await.unwrap().unwrap();
        assert_eq!(QuizProgressRecord::from_str_lenient(&healed).unwrap().record.questions_answered, 6);
        assert!(f.ephemeral.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_pins_counter_to_history() {
        let f = fixture();
        let mut inflated = record_with(3);
        inflated.questions_answered = 7;
        inflated.current_scenario_index = 7;
        f.service.save("communication", inflated).await;

        let data = f.service.load("communication").await.data.unwrap();
        assert_eq!(data.questions_answered, 3);
        assert_eq!(data.current_scenario_index, 3);
        assert_eq!(data.question_history.len(), 3);
    }

    #[tokio::test]
    async fn test_load_clamps_stored_experience_and_heals() {
        let f = fixture();
        let key = StorageKey::primary("alice", "communication");
        let mut inflated = record_with(2);
        inflated.experience = 99_999;
        f.remote.set(&key, &inflated.to_json_string()).await.unwrap();

        let loaded = f.service.load("communication").await;
        assert_eq!(loaded.data.unwrap().experience, 300);
        assert!(loaded.issues.iter().any(|e| matches!(e, ProgressError::DataCorruption { .. })));

        let healed = f.durable.get(&key).await.unwrap().unwrap();
        assert_eq!(QuizProgressRecord::from_str_lenient(&healed).unwrap().record.experience, 300);
    }

    #[tokio::test]
    async fn test_recover_clamps_experience_from_backup_copy() {
        let f = fixture();
        let mut inflated = record_with(4);
        inflated.experience = 5_000;
        f.durable
            .set(&StorageKey::backup("alice", "communication"), &inflated.to_json_string())
            .await
            .unwrap();

        let recovered = f.service.recover("communication").await.unwrap();
        assert_eq!(recovered.experience, 300);
        let stored = f.remote.get(&StorageKey::primary("alice", "communication")).await.unwrap().unwrap();
        assert_eq!(QuizProgressRecord::from_str_lenient(&stored).unwrap().record.experience, 300);
    }

    #[test]
    fn test_winner_metric_reports_repair_not_recovery() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let f = fixture();
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        // Only a clean backup copy: found by recovery, needs no repair
        let loaded = ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                f.durable
                    .set(&StorageKey::backup("alice", "communication"), &record_with(3).to_json_string())
                    .await
                    .unwrap();
                f.service.load("communication").await
            })
        });
        assert!(loaded.recovered);

        let winners: Vec<(String, DebugValue)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == "quiz_sync_reconcile_total")
            .map(|(key, .., value)| {
                let repaired = key.key().labels().find(|l| l.key() == "repaired").map(|l| l.value().to_string());
                (repaired.unwrap_or_default(), value)
            })
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].0, "false");
        assert!(matches!(winners[0].1, DebugValue::Counter(1)));
    }

    #[tokio::test]
    async fn test_history_only_progress_round_trips() {
        let f = fixture();
        let mut r = QuizProgressRecord::new("communication");
        for i in 0..5 {
            r.question_history.push(QuestionAttempt::answered(format!("s{i}"), "a", "a", 800));
        }
        r.current_scenario_index = 5;
        r.status = QuizStatus::InProgress;
        assert_eq!(r.questions_answered, 0);

        let saved = f.service.save("communication", r).await;
        assert!(saved.success && saved.error.is_none());

        let loaded = f.service.load("communication").await;
        assert!(loaded.issues.is_empty());
        let data = loaded.data.unwrap();
        assert_eq!(data.questions_answered, 5);
        assert_eq!(data.current_scenario_index, 5);
        assert_eq!(data.status, QuizStatus::InProgress);
    }

    #[tokio::test]
    async fn test_load_of_unknown_quiz_succeeds_empty() {
        let f = fixture();
        let loaded = f.service.load("brand-new-quiz").await;
        assert!(loaded.success);
        assert!(loaded.data.is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_every_variant() {
        let f = fixture();
        f.service.save("communication", record_with(3)).await;
        f.ephemeral
            .set(&StorageKey::emergency("alice", "communication", 1), "{}")
            .await
            .unwrap();

        assert!(f.service.reset("communication").await);
        assert!(f.ephemeral.list_keys(&StorageKey::quiz_prefix("alice", "communication")).await.unwrap().is_empty());
        assert!(f.durable.list_keys(&StorageKey::quiz_prefix("alice", "communication")).await.unwrap().is_empty());
        assert!(f.remote.get(&StorageKey::primary("alice", "communication")).await.unwrap().is_none());

        // A fresh attempt may start below the old count again
        let result = f.service.save("communication", record_with(1)).await;
        assert!(result.success);
        assert_eq!(f.service.load("communication").await.data.unwrap().questions_answered, 1);
    }

    #[tokio::test]
    async fn test_answer_drives_state_machine() {
        let f = fixture();
        let (status, _) = f
            .service
            .answer("communication", QuestionAttempt::answered("s0", "a", "a", 900), 20, 2)
            .await
            .unwrap();
        assert_eq!(status, QuizStatus::InProgress);

        let (status, saved) = f
            .service
            .answer("communication", QuestionAttempt::answered("s1", "a", "a", 900), 20, 2)
            .await
            .unwrap();
        assert_eq!(status, QuizStatus::Passed);
        assert!(saved.success);

        let err = f
            .service
            .answer("communication", QuestionAttempt::timed_out("s2", 30_000), 0, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::QuizFinished { .. }));
    }

    #[tokio::test]
    async fn test_emergency_snapshots_are_pruned() {
        let f = fixture();
        for i in 0..6 {
            let key = StorageKey::emergency("alice", "communication", i);
            f.ephemeral.set(&key, "{}").await.unwrap();
        }
        f.service.emergency_snapshot(TierKind::Ephemeral, f.ephemeral.as_ref(), "communication", "{}").await;

        let keys = f.ephemeral.list_keys(&StorageKey::quiz_prefix("alice", "communication")).await.unwrap();
        assert_eq!(keys.len(), 3);
    }
}
