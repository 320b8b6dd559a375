use async_trait::async_trait;
use dashmap::DashMap;

use super::key::StorageKey;
use super::traits::{StorageTier, TierError, TierKind};

/// Session-scoped tier. Pure redundancy: never authoritative, gone when the
/// session (this value) is dropped or [`clear`](Self::clear)ed.
pub struct EphemeralTier {
    data: DashMap<String, String>,
}

impl EphemeralTier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// End of session.
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for EphemeralTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageTier for EphemeralTier {
    fn kind(&self) -> TierKind {
        TierKind::Ephemeral
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<String>, TierError> {
        Ok(self.data.get(&key.encode()).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &StorageKey, value: &str) -> Result<(), TierError> {
        self.data.insert(key.encode(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &StorageKey) -> Result<(), TierError> {
        self.data.remove(&key.encode());
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<StorageKey>, TierError> {
        let mut keys: Vec<StorageKey> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .filter_map(|entry| StorageKey::parse(entry.key()))
            .collect();
        keys.sort_by_key(StorageKey::encode);
        Ok(keys)
    }
}
