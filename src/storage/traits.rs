use async_trait::async_trait;
use thiserror::Error;

use super::key::StorageKey;

/// The three storage tiers, in descending authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TierKind {
    Remote,
    Durable,
    Ephemeral,
}

impl TierKind {
    /// Tie-break rank for reconciliation: Remote > Durable > Ephemeral.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Remote => 3,
            Self::Durable => 2,
            Self::Ephemeral => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Durable => "durable",
            Self::Ephemeral => "ephemeral",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierError {
    #[error("tier unreachable: {0}")]
    Unavailable(String),
    #[error("tier operation timed out")]
    Timeout,
    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },
    #[error("remote rejected the request: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("capacity exceeded: {used} + {requested} bytes > {max}")]
    CapacityExceeded { used: u64, requested: u64, max: u64 },
    #[error("key '{0}' is not supported by this tier")]
    Unsupported(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Key-value capability set shared by every tier.
///
/// Values are serialized records (or the serialized queue). Implementations
/// report failures as [`TierError`]; they never panic on bad input.
#[async_trait]
pub trait StorageTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn get(&self, key: &StorageKey) -> Result<Option<String>, TierError>;
    async fn set(&self, key: &StorageKey, value: &str) -> Result<(), TierError>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &StorageKey) -> Result<(), TierError>;
    /// Keys under an encoded prefix (see [`StorageKey::quiz_prefix`]).
    /// Keys outside the schema are skipped.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<StorageKey>, TierError>;
}
