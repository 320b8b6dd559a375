// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Service lifecycle: startup recovery, the drain scheduler, shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::SyncQueue;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::TierKind;

use super::{ProgressService, ServiceState};

/// Handle to the running scheduler task.
pub(super) struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressService {
    /// Restore the persisted sync queue, reconcile every stored quiz, then
    /// start the drain scheduler.
    ///
    /// Startup flow:
    /// 1. Load queued writes from the durable tier
    /// 2. Spawn the scheduler (periodic, on-enqueue and on-online drains)
    /// 3. Recover each quiz with a local copy or queued write, from local
    ///    tiers only; the remote catches up through the queue
    ///
    /// Calling `start` on a running service does nothing.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            debug!("Progress service already running");
            return;
        }
        let startup_start = std::time::Instant::now();
        self.set_state(ServiceState::Recovering);

        match retry("queue_load", &RetryConfig::query(), || self.queue.load()).await {
            Ok(restored) if restored > 0 => info!(restored, "Sync queue restored"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not restore sync queue, starting empty"),
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_scheduler(
            self.queue.clone(),
            self.online.clone(),
            cancel.clone(),
            self.config.drain_interval(),
        ));
        *worker = Some(Worker { cancel, handle });

        let recovered = self.recover_all().await;
        self.set_state(ServiceState::Running);
        info!(
            recovered,
            queued = self.queue.len(),
            elapsed_ms = startup_start.elapsed().as_millis() as u64,
            "Progress service running"
        );
    }

    /// Stop the scheduler, persist the queue and snapshot any quiz whose
    /// latest save only lives in memory.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }

        if let Err(e) = self.queue.persist().await {
            warn!(error = %e, pending = self.queue.len(), "Failed to persist sync queue on shutdown");
        }
        let flushed = self.flush_degraded().await;

        self.set_state(ServiceState::Stopped);
        info!(flushed, pending = self.queue.len(), "Progress service stopped");
    }

    /// Emergency-snapshot every degraded quiz to the durable tier. Returns
    /// how many were attempted.
    pub(super) async fn flush_degraded(&self) -> usize {
        let degraded: Vec<String> = self.degraded.iter().map(|q| q.key().clone()).collect();
        let mut flushed = 0;
        for quiz_id in degraded {
            let Some(record) = self.last_known.get(&quiz_id).map(|r| r.clone()) else {
                continue;
            };
            self.emergency_snapshot(TierKind::Durable, self.durable.as_ref(), &quiz_id, &record.to_json_string())
                .await;
            flushed += 1;
        }
        flushed
    }
}

impl Drop for ProgressService {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

/// Drain the queue on the periodic interval, whenever something is
/// enqueued, and when the host reports the network is back. Failed drains
/// back off exponentially up to the interval.
async fn run_scheduler(
    queue: Arc<SyncQueue>,
    online: Arc<Notify>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let backoff = RetryConfig::drain(interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; startup already reconciled.
    ticker.tick().await;

    let mut failures: u32 = 0;
    let mut retry_at: Option<Instant> = None;
    debug!(interval_secs = interval.as_secs(), "Drain scheduler started");

    loop {
        let trigger = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => "interval",
            _ = online.notified() => {
                failures = 0;
                "online"
            }
            _ = queue.woken(), if retry_at.is_none() => "enqueue",
            _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => "backoff",
        };
        retry_at = None;

        if queue.is_empty() {
            failures = 0;
            continue;
        }

        let report = tokio::select! {
            _ = cancel.cancelled() => break,
            report = queue.drain() => report,
        };
        if report.skipped {
            continue;
        }
        debug!(
            trigger,
            synced = report.synced,
            failed = report.failed,
            dropped = report.dropped,
            remaining = report.remaining,
            "Drain pass finished"
        );

        if report.is_clean() {
            failures = 0;
        } else {
            let delay = backoff.delay_for(failures);
            failures = failures.saturating_add(1);
            retry_at = Some(Instant::now() + delay);
            debug!(failures, retry_in = ?delay, "Drain incomplete, backing off");
        }
    }
    debug!("Drain scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgressSyncConfig;
    use crate::record::QuizProgressRecord;
    use crate::storage::ephemeral::EphemeralTier;
    use crate::storage::key::StorageKey;
    use crate::storage::traits::{StorageTier, TierError};
    use async_trait::async_trait;

    /// Remote that accepts connections and never answers.
    struct HungRemote;

    #[async_trait]
    impl StorageTier for HungRemote {
        fn kind(&self) -> TierKind {
            TierKind::Remote
        }
        async fn get(&self, _key: &StorageKey) -> Result<Option<String>, TierError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &StorageKey, _value: &str) -> Result<(), TierError> {
            std::future::pending().await
        }
        async fn remove(&self, _key: &StorageKey) -> Result<(), TierError> {
            std::future::pending().await
        }
        async fn list_keys(&self, _prefix: &str) -> Result<Vec<StorageKey>, TierError> {
            std::future::pending().await
        }
    }

    fn service() -> (Arc<EphemeralTier>, Arc<EphemeralTier>, ProgressService) {
        let remote = Arc::new(EphemeralTier::new());
        let durable = Arc::new(EphemeralTier::new());
        let config = ProgressSyncConfig { username: "alice".into(), drain_interval_secs: 1, ..Default::default() };
        let service =
            ProgressService::new(config, remote.clone(), durable.clone(), Arc::new(EphemeralTier::new())).unwrap();
        (remote, durable, service)
    }

    #[tokio::test]
    async fn test_start_and_stop_transition_state() {
        let (_, _, service) = service();
        assert_eq!(service.state(), ServiceState::Created);

        service.start().await;
        assert_eq!(service.state(), ServiceState::Running);
        // Idempotent
        service.start().await;
        assert_eq!(service.state(), ServiceState::Running);

        service.stop().await;
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_start_restores_queue_and_scheduler_drains_it() {
        let (remote, durable, service) = service();
        let staging = SyncQueue::new(remote.clone(), durable.clone(), 5, Duration::from_secs(1));
        staging.enqueue("alice", "initiative", QuizProgressRecord::new("initiative")).await;
        assert!(remote.is_empty());

        service.start().await;
        // The scheduler drains the restored entry in the background
        let key = StorageKey::primary("alice", "initiative");
        let mut stored = None;
        for _ in 0..50 {
            stored = remote.get(&key).await.unwrap();
            if stored.is_some() && service.queue_depth() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stored.is_some());
        assert_eq!(service.queue_depth(), 0);
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_does_not_wait_on_a_hung_remote() {
        let durable = Arc::new(EphemeralTier::new());
        for quiz in ["communication", "initiative", "risk-analysis", "tester-mindset", "reports"] {
            let mut record = QuizProgressRecord::new(quiz);
            record.questions_answered = 2;
            durable.set(&StorageKey::primary("alice", quiz), &record.to_json_string()).await.unwrap();
        }
        let config = ProgressSyncConfig { username: "alice".into(), ..Default::default() };
        let service =
            ProgressService::new(config, Arc::new(HungRemote), durable, Arc::new(EphemeralTier::new())).unwrap();

        let began = Instant::now();
        service.start().await;
        assert!(began.elapsed() < Duration::from_secs(1), "start took {:?}", began.elapsed());
        assert_eq!(service.state(), ServiceState::Running);

        // Every recovered quiz waits in the queue for the remote
        assert_eq!(service.queue_depth(), 5);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_stop_snapshots_degraded_quizzes() {
        let (_, durable, service) = service();
        service.degraded.insert("initiative".into());
        service.last_known.insert("initiative".into(), QuizProgressRecord::new("initiative"));

        service.stop().await;
        let keys = durable.list_keys(&StorageKey::quiz_prefix("alice", "initiative")).await.unwrap();
        assert_eq!(keys.len(), 1);
    }
}
