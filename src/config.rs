// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the progress sync service.
//!
//! # Example
//!
//! ```
//! use quiz_sync::ProgressSyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ProgressSyncConfig::default();
//! assert_eq!(config.max_sync_retries, 5);
//! assert_eq!(config.drain_interval_secs, 60);
//!
//! // Full config
//! let config = ProgressSyncConfig {
//!     api_base_url: "https://quiz.example.com/api".into(),
//!     username: "alice".into(),
//!     durable_path: Some("./progress.db".into()),
//!     progress_timeout_ms: 10_000,
//!     ..Default::default()
//! };
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the progress sync service.
///
/// All fields have defaults. In production at least `api_base_url`,
/// `api_token` and `username` should be set.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressSyncConfig {
    /// Base URL of the progress API (e.g., "https://quiz.example.com/api")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token sent with every remote call
    #[serde(default)]
    pub api_token: Option<String>,

    /// Learner whose progress this service instance manages
    #[serde(default = "default_username")]
    pub username: String,

    /// SQLite file for the durable tier (None = in-memory, lost on restart)
    #[serde(default)]
    pub durable_path: Option<String>,

    /// Durable tier capacity in bytes (keys + values)
    #[serde(default = "default_durable_max_bytes")]
    pub durable_max_bytes: u64,

    /// Timeout for full progress fetches/saves against the remote tier
    #[serde(default = "default_progress_timeout_ms")]
    pub progress_timeout_ms: u64,

    /// Timeout for lightweight calls (deletes, local tier I/O)
    #[serde(default = "default_light_timeout_ms")]
    pub light_timeout_ms: u64,

    /// Timeout for each queue-driven remote save
    #[serde(default = "default_queue_save_timeout_ms")]
    pub queue_save_timeout_ms: u64,

    /// Periodic drain interval for the sync queue
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,

    /// Failed drain attempts before a queued entry is dropped
    #[serde(default = "default_max_sync_retries")]
    pub max_sync_retries: u32,

    /// Upper bound for `experience`
    #[serde(default = "default_max_xp")]
    pub max_xp: u32,

    /// Score percentage needed to pass (None = quizzes end in `completed`)
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: Option<u8>,

    /// Emergency snapshots kept per quiz
    #[serde(default = "default_emergency_snapshot_limit")]
    pub emergency_snapshot_limit: usize,

    /// Extra quiz-name aliases merged into the built-in registry
    #[serde(default)]
    pub extra_aliases: HashMap<String, String>,
}

fn default_api_base_url() -> String { "http://localhost:3000/api".to_string() }
fn default_username() -> String { "anonymous".to_string() }
fn default_durable_max_bytes() -> u64 { 5 * 1024 * 1024 } // 5 MB
fn default_progress_timeout_ms() -> u64 { 20_000 }
fn default_light_timeout_ms() -> u64 { 5_000 }
fn default_queue_save_timeout_ms() -> u64 { 8_000 }
fn default_drain_interval_secs() -> u64 { 60 }
fn default_max_sync_retries() -> u32 { 5 }
fn default_max_xp() -> u32 { 300 }
fn default_pass_threshold() -> Option<u8> { Some(70) }
fn default_emergency_snapshot_limit() -> usize { 3 }

impl Default for ProgressSyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            username: default_username(),
            durable_path: None,
            durable_max_bytes: default_durable_max_bytes(),
            progress_timeout_ms: default_progress_timeout_ms(),
            light_timeout_ms: default_light_timeout_ms(),
            queue_save_timeout_ms: default_queue_save_timeout_ms(),
            drain_interval_secs: default_drain_interval_secs(),
            max_sync_retries: default_max_sync_retries(),
            max_xp: default_max_xp(),
            pass_threshold: default_pass_threshold(),
            emergency_snapshot_limit: default_emergency_snapshot_limit(),
            extra_aliases: HashMap::new(),
        }
    }
}

impl ProgressSyncConfig {
    #[must_use]
    pub fn progress_timeout(&self) -> Duration {
        Duration::from_millis(self.progress_timeout_ms)
    }

    #[must_use]
    pub fn light_timeout(&self) -> Duration {
        Duration::from_millis(self.light_timeout_ms)
    }

    #[must_use]
    pub fn queue_save_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_save_timeout_ms)
    }

    /// Drain interval, never shorter than one second.
    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs.max(1))
    }
}
