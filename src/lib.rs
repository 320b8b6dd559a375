//! # Quiz Sync
//!
//! Progress persistence and reconciliation for quiz runtimes: every answer a
//! learner gives is stored redundantly and survives network loss, restarts
//! and storage corruption.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ProgressService                         │
//! │  • Canonicalizes quiz names (aliases, slugs, suffixes)     │
//! │  • Monotonic save guard, degraded in-memory fallback       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (write all, read all, reconcile)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Remote: Progress API                      │
//! │  • Authoritative when reachable                            │
//! │  • Failed writes go to the sync queue                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Durable: SQLite store                     │
//! │  • Primary, backup and emergency copies                    │
//! │  • Holds the persisted sync queue                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Ephemeral: session memory                  │
//! │  • Redundant copy, emergency snapshots                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads consult every tier and keep the copy with the most answered
//! questions (newest timestamp, then tier priority break ties). Lagging
//! tiers are healed from the winner.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quiz_sync::{ProgressService, ProgressSyncConfig, QuestionAttempt};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ProgressSyncConfig {
//!         api_base_url: "https://quiz.example.com/api".into(),
//!         api_token: Some("token".into()),
//!         username: "alice".into(),
//!         durable_path: Some("./progress.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let service = ProgressService::connect(config).await.expect("Failed to open tiers");
//!     service.start().await;
//!
//!     let attempt = QuestionAttempt::answered("scenario-1", "b", "b", 4_200);
//!     let (status, saved) = service.answer("Communication Skills", attempt, 10, 10).await.unwrap();
//!     println!("status={status} saved={}", saved.success);
//!
//!     if let Some(progress) = service.load("communication").await.data {
//!         println!("answered {}", progress.questions_answered);
//!     }
//!
//!     service.stop().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`service`]: The [`ProgressService`] facade and its lifecycle
//! - [`storage`]: Storage tiers (remote API, SQLite, memory) and key layout
//! - [`queue`]: Persistent sync queue for the remote tier
//! - [`reconcile`]: Picking the canonical copy among tiers
//! - [`recovery`]: Full-tier scans for lost or damaged progress
//! - [`record`]: The progress record, lenient parsing and repair
//! - [`normalize`]: Quiz name canonicalization
//! - [`resilience`]: Retry with exponential backoff

pub mod config;
pub mod error;
pub mod metrics;
pub mod normalize;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod recovery;
pub mod resilience;
pub mod service;
pub mod storage;

pub use config::ProgressSyncConfig;
pub use error::ProgressError;
pub use normalize::{normalize, NameNormalizer};
pub use queue::{DrainReport, QueuedWrite, SyncQueue, SyncQueueEntry, SyncQueueStats};
pub use reconcile::{reconcile, Candidate, Reconciled};
pub use record::{AnswerPolicy, ParsedRecord, QuestionAttempt, QuizProgressRecord, QuizStatus};
pub use recovery::RecoveryService;
pub use resilience::retry::RetryConfig;
pub use service::{LoadResult, ProgressService, SaveResult, ServiceState, TierReading, TierWriteReport};
pub use storage::durable::DurableTier;
pub use storage::ephemeral::EphemeralTier;
pub use storage::key::{KeyVariant, StorageKey};
pub use storage::remote::RemoteTier;
pub use storage::traits::{StorageTier, TierError, TierKind};
pub use metrics::LatencyTimer;
