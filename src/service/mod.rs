// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Progress service facade.
//!
//! The [`ProgressService`] is the only entry point quiz runtimes use. It ties
//! together:
//! - the three storage tiers (remote, durable, ephemeral)
//! - the sync queue and its scheduler
//! - reconciliation and recovery
//!
//! # Lifecycle
//!
//! ```text
//! Created → Recovering → Running → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use quiz_sync::{ProgressService, ProgressSyncConfig, QuizProgressRecord, ServiceState};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = ProgressSyncConfig {
//!     username: "alice".into(),
//!     durable_path: Some("./progress.db".into()),
//!     ..Default::default()
//! };
//! let service = ProgressService::connect(config).await.expect("tiers");
//! assert_eq!(service.state(), ServiceState::Created);
//!
//! service.start().await;
//! let saved = service.save("Communication", QuizProgressRecord::new("communication")).await;
//! assert!(saved.success);
//! let loaded = service.load("communication").await;
//! service.stop().await;
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{LoadResult, SaveResult, ServiceState, TierReading, TierWriteReport};

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{watch, Mutex, Notify};
use tracing::info;

use crate::config::ProgressSyncConfig;
use crate::error::ProgressError;
use crate::normalize::NameNormalizer;
use crate::queue::{SyncQueue, SyncQueueStats};
use crate::record::QuizProgressRecord;
use crate::recovery::RecoveryService;
use crate::storage::durable::DurableTier;
use crate::storage::ephemeral::EphemeralTier;
use crate::storage::key::is_valid_username;
use crate::storage::remote::RemoteTier;
use crate::storage::traits::StorageTier;

use lifecycle::Worker;

/// Facade over the tiers, queue and recovery for one learner.
///
/// # Thread Safety
///
/// `Send + Sync`; share it behind an `Arc`. Per-quiz session state lives in
/// concurrent maps.
pub struct ProgressService {
    pub(super) config: ProgressSyncConfig,
    pub(super) username: String,
    pub(super) normalizer: Arc<NameNormalizer>,

    pub(super) remote: Arc<dyn StorageTier>,
    pub(super) durable: Arc<dyn StorageTier>,
    pub(super) ephemeral: Arc<dyn StorageTier>,

    pub(super) queue: Arc<SyncQueue>,
    pub(super) recovery: RecoveryService,

    /// Newest record seen this session per quiz (monotonic save guard)
    pub(super) last_known: DashMap<String, QuizProgressRecord>,
    /// Quizzes whose latest save reached no tier
    pub(super) degraded: DashSet<String>,

    pub(super) state: watch::Sender<ServiceState>,
    pub(super) state_rx: watch::Receiver<ServiceState>,

    /// Network-restored trigger for the scheduler
    pub(super) online: Arc<Notify>,
    pub(super) worker: Mutex<Option<Worker>>,
}

impl ProgressService {
    /// Build a service over injected tiers.
    ///
    /// Starts in `Created`; call [`start()`](Self::start) to restore the
    /// queue and run the scheduler.
    pub fn new(
        config: ProgressSyncConfig,
        remote: Arc<dyn StorageTier>,
        durable: Arc<dyn StorageTier>,
        ephemeral: Arc<dyn StorageTier>,
    ) -> Result<Self, ProgressError> {
        if !is_valid_username(&config.username) {
            return Err(ProgressError::InvalidUsername(config.username.clone()));
        }
        let username = config.username.trim().to_string();
        let normalizer = Arc::new(NameNormalizer::with_aliases(config.extra_aliases.iter()));

        let queue = Arc::new(SyncQueue::new(
            remote.clone(),
            durable.clone(),
            config.max_sync_retries,
            config.queue_save_timeout(),
        ));
        let recovery = RecoveryService::new(
            username.clone(),
            normalizer.clone(),
            remote.clone(),
            durable.clone(),
            ephemeral.clone(),
            queue.clone(),
            config.progress_timeout(),
            config.light_timeout(),
        );
        let (state_tx, state_rx) = watch::channel(ServiceState::Created);

        Ok(Self {
            config,
            username,
            normalizer,
            remote,
            durable,
            ephemeral,
            queue,
            recovery,
            last_known: DashMap::new(),
            degraded: DashSet::new(),
            state: state_tx,
            state_rx,
            online: Arc::new(Notify::new()),
            worker: Mutex::new(None),
        })
    }

    /// Open the tiers described by `config`: the progress API, SQLite at
    /// `durable_path` (in-memory when unset) and a fresh session tier.
    pub async fn connect(config: ProgressSyncConfig) -> Result<Self, ProgressError> {
        let remote = RemoteTier::from_config(&config).map_err(ProgressError::TierSetup)?;
        let durable = match &config.durable_path {
            Some(path) => DurableTier::open(path, config.durable_max_bytes).await,
            None => DurableTier::in_memory(config.durable_max_bytes).await,
        }
        .map_err(ProgressError::TierSetup)?;
        info!(api = %remote.base_url(), durable = %durable.location(), "Progress tiers connected");

        Self::new(config, Arc::new(remote), Arc::new(durable), Arc::new(EphemeralTier::new()))
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn config(&self) -> &ProgressSyncConfig {
        &self.config
    }

    /// Canonical id for a raw quiz name, using this service's aliases.
    #[must_use]
    pub fn canonical_id(&self, raw: &str) -> String {
        self.normalizer.normalize(raw)
    }

    /// Entries waiting for the remote tier.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn queue_stats(&self) -> SyncQueueStats {
        self.queue.stats()
    }

    /// The sync queue, for hosts that drive draining themselves.
    #[must_use]
    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Whether the latest save for this quiz reached no tier.
    #[must_use]
    pub fn is_degraded(&self, raw_quiz_id: &str) -> bool {
        self.degraded.contains(&self.canonical_id(raw_quiz_id))
    }

    /// Network-restored event: drain the queue now and reset backoff.
    pub fn notify_online(&self) {
        self.online.notify_one();
    }

    pub(super) fn set_state(&self, state: ServiceState) {
        let _ = self.state.send(state);
        crate::metrics::set_service_state(&state.to_string());
    }
}
