// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the progress service.

use crate::error::ProgressError;
use crate::record::QuizProgressRecord;
use crate::storage::traits::{TierError, TierKind};

/// Service lifecycle state.
///
/// ```text
/// Created → Recovering → Running → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, scheduler not running. save/load/reset already work.
    Created,
    /// Restoring the persisted queue and reconciling stored quizzes
    Recovering,
    /// Scheduler draining the sync queue
    Running,
    /// Scheduler stopped, queue persisted
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Recovering => write!(f, "Recovering"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Which tiers accepted a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierWriteReport {
    pub remote: bool,
    pub durable: bool,
    pub ephemeral: bool,
    /// Remote write failed and the record went to the sync queue
    pub queued: bool,
    /// Why the remote write failed
    pub remote_error: Option<TierError>,
}

impl TierWriteReport {
    /// Durable or ephemeral holds the record.
    #[must_use]
    pub fn local_saved(&self) -> bool {
        self.durable || self.ephemeral
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.remote || self.local_saved()
    }
}

/// One tier's answer to a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierReading {
    pub tier: TierKind,
    /// Usable record, if the tier had one
    pub record: Option<QuizProgressRecord>,
    /// Set when the tier could not be read at all
    pub error: Option<TierError>,
    /// What was wrong with the stored copy: sanitized, unparseable or
    /// belonging to another quiz
    pub issue: Option<ProgressError>,
}

impl TierReading {
    pub(crate) fn absent(tier: TierKind) -> Self {
        Self { tier, record: None, error: None, issue: None }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of [`ProgressService::save`](super::ProgressService::save).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveResult {
    /// At least one tier holds the record
    pub success: bool,
    pub api_saved: bool,
    pub local_saved: bool,
    /// No tier took the write; the record lives in memory only
    pub degraded: bool,
    /// Set on failure, or with `NetworkFailure` when only the remote missed
    /// the write and the record was queued
    pub error: Option<ProgressError>,
}

impl SaveResult {
    pub(crate) fn from_report(report: TierWriteReport) -> Self {
        Self {
            success: report.any(),
            api_saved: report.remote,
            local_saved: report.local_saved(),
            degraded: false,
            error: report.remote_error.map(ProgressError::NetworkFailure),
        }
    }

    pub(crate) fn failed(error: ProgressError, degraded: bool) -> Self {
        Self { success: false, api_saved: false, local_saved: false, degraded, error: Some(error) }
    }
}

/// Outcome of [`ProgressService::load`](super::ProgressService::load).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    /// Some tier answered (a quiz with no stored progress still succeeds)
    pub success: bool,
    pub data: Option<QuizProgressRecord>,
    /// Tier whose copy won; None for a memory-only record or no data
    pub source: Option<TierKind>,
    /// The record came from a full recovery scan
    pub recovered: bool,
    /// Corrupt or contaminated copies met along the way
    pub issues: Vec<ProgressError>,
}

impl LoadResult {
    pub(crate) fn empty(success: bool, issues: Vec<ProgressError>) -> Self {
        Self { success, data: None, source: None, recovered: false, issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ServiceState::Created.to_string(), "Created");
        assert_eq!(ServiceState::Running.to_string(), "Running");
    }

    #[test]
    fn test_save_result_from_report() {
        let report = TierWriteReport {
            durable: true,
            ephemeral: true,
            queued: true,
            remote_error: Some(TierError::Timeout),
            ..TierWriteReport::default()
        };
        let result = SaveResult::from_report(report);
        assert!(result.success);
        assert!(result.local_saved);
        assert!(!result.api_saved);
        assert_eq!(result.error, Some(ProgressError::NetworkFailure(TierError::Timeout)));
        assert!(result.error.is_some_and(|e| e.is_transient()));

        assert!(!TierWriteReport::default().any());
    }
}
