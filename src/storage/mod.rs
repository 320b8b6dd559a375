// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage tiers.
//!
//! - [`remote::RemoteTier`]: progress API, authoritative but unreliable
//! - [`durable::DurableTier`]: SQLite, survives restarts, capacity-bounded
//! - [`ephemeral::EphemeralTier`]: session memory, redundancy only

pub mod durable;
pub mod ephemeral;
pub mod key;
pub mod remote;
pub mod traits;

use std::future::Future;
use std::time::Duration;

use crate::metrics::{self, LatencyTimer};
use traits::{TierError, TierKind};

/// Run one tier call under a deadline, recording latency and outcome.
/// A missed deadline becomes [`TierError::Timeout`]; the call is abandoned.
pub(crate) async fn timed<T, F>(
    tier: TierKind,
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, TierError>
where
    F: Future<Output = Result<T, TierError>>,
{
    let _timer = LatencyTimer::new(tier, operation);
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TierError::Timeout),
    };
    let status = match &result {
        Ok(_) => "success",
        Err(TierError::Timeout) => "timeout",
        Err(_) => "error",
    };
    metrics::record_operation(tier, operation, status);
    result
}
