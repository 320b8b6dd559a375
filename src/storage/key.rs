// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Structured storage keys.
//!
//! Every key-value tier stores progress under the same schema:
//!
//! ```text
//! progress/{username}/{quiz_id}/primary
//! progress/{username}/{quiz_id}/backup
//! progress/{username}/{quiz_id}/emergency/{epoch_millis}
//! sync-queue
//! ```
//!
//! Recovery lists `progress/{username}/{quiz_id}/` and parses each key back,
//! so the variant of a stored copy is always known without guessing from
//! suffixes.

use std::fmt;

const PROGRESS_ROOT: &str = "progress";
const SYNC_QUEUE: &str = "sync-queue";

/// Which copy of a record a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyVariant {
    Primary,
    Backup,
    /// Snapshot taken when the primary write failed (epoch millis)
    Emergency(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Progress {
        username: String,
        quiz_id: String,
        variant: KeyVariant,
    },
    /// The persisted sync queue
    SyncQueue,
}

impl StorageKey {
    pub fn primary(username: &str, quiz_id: &str) -> Self {
        Self::progress(username, quiz_id, KeyVariant::Primary)
    }

    pub fn backup(username: &str, quiz_id: &str) -> Self {
        Self::progress(username, quiz_id, KeyVariant::Backup)
    }

    pub fn emergency(username: &str, quiz_id: &str, at_millis: i64) -> Self {
        Self::progress(username, quiz_id, KeyVariant::Emergency(at_millis))
    }

    fn progress(username: &str, quiz_id: &str, variant: KeyVariant) -> Self {
        Self::Progress {
            username: username.to_string(),
            quiz_id: quiz_id.to_string(),
            variant,
        }
    }

    /// Prefix covering every variant of one quiz.
    #[must_use]
    pub fn quiz_prefix(username: &str, quiz_id: &str) -> String {
        format!("{PROGRESS_ROOT}/{username}/{quiz_id}/")
    }

    /// Prefix covering every quiz of one user.
    #[must_use]
    pub fn user_prefix(username: &str) -> String {
        format!("{PROGRESS_ROOT}/{username}/")
    }

    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Progress { username, quiz_id, variant } => {
                let base = Self::quiz_prefix(username, quiz_id);
                match variant {
                    KeyVariant::Primary => format!("{base}primary"),
                    KeyVariant::Backup => format!("{base}backup"),
                    KeyVariant::Emergency(at) => format!("{base}emergency/{at}"),
                }
            }
            Self::SyncQueue => SYNC_QUEUE.to_string(),
        }
    }

    /// Inverse of [`encode`](Self::encode). Foreign keys yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == SYNC_QUEUE {
            return Some(Self::SyncQueue);
        }
        let mut parts = raw.split('/');
        if parts.next()? != PROGRESS_ROOT {
            return None;
        }
        let username = parts.next().filter(|s| !s.is_empty())?;
        let quiz_id = parts.next().filter(|s| !s.is_empty())?;
        let variant = match (parts.next()?, parts.next()) {
            ("primary", None) => KeyVariant::Primary,
            ("backup", None) => KeyVariant::Backup,
            ("emergency", Some(at)) => KeyVariant::Emergency(at.parse().ok()?),
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self::progress(username, quiz_id, variant))
    }

    /// Quiz id for progress keys.
    #[must_use]
    pub fn quiz_id(&self) -> Option<&str> {
        match self {
            Self::Progress { quiz_id, .. } => Some(quiz_id),
            Self::SyncQueue => None,
        }
    }

    #[must_use]
    pub fn variant(&self) -> Option<KeyVariant> {
        match self {
            Self::Progress { variant, .. } => Some(*variant),
            Self::SyncQueue => None,
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Usernames become a key segment, so they must be non-empty and slash-free.
#[must_use]
pub fn is_valid_username(username: &str) -> bool {
    !username.trim().is_empty() && !username.contains('/')
}
