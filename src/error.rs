// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the progress service.
//!
//! Tier-level failures are [`TierError`](crate::storage::traits::TierError)s
//! and never cross the facade as `Err`. [`ProgressError`] is what callers may
//! see, mostly embedded in a result struct rather than returned.

use thiserror::Error;

use crate::storage::traits::TierError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    /// Remote tier unreachable or timed out. Feeds the sync queue.
    #[error("remote tier unavailable: {0}")]
    NetworkFailure(#[source] TierError),

    /// Every tier failed the write.
    #[error("no storage tier accepted progress for '{quiz_id}'")]
    StorageUnavailable { quiz_id: String },

    /// Payload was malformed; sanitized with defaults.
    #[error("corrupt progress payload for '{quiz_id}': {detail}")]
    DataCorruption { quiz_id: String, detail: String },

    /// A record stored under one quiz id claims to be another.
    #[error("record under '{key}' belongs to quiz '{found}'")]
    Contamination { key: String, found: String },

    /// A tier could not be opened at construction time.
    #[error("storage tier setup failed: {0}")]
    TierSetup(#[source] TierError),

    #[error("invalid username '{0}'")]
    InvalidUsername(String),

    #[error("quiz id '{0}' normalizes to nothing")]
    InvalidQuizId(String),

    /// Answer recorded against a quiz that already finished.
    #[error("quiz '{quiz_id}' is already {status}")]
    QuizFinished { quiz_id: String, status: String },
}

impl ProgressError {
    /// Whether the error only degrades the operation (caller may carry on).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkFailure(_) | Self::StorageUnavailable { .. })
    }
}
