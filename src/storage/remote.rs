// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote tier: the progress REST API.
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | get | `GET {base}/progress/{quizId}` | `{success, data}`; 404 = absent |
//! | set | `POST {base}/progress` with `{quizId, progress}` | `{success, data}` |
//! | remove | `DELETE {base}/progress/{quizId}` | 2xx or 404 |
//!
//! Only primary keys exist remotely. Every failure (transport error,
//! timeout, non-2xx, non-JSON body, `success: false`) comes back as a
//! [`TierError`]; nothing here panics on what the server sends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::key::{KeyVariant, StorageKey};
use super::traits::{StorageTier, TierError, TierKind};
use crate::config::ProgressSyncConfig;

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

pub struct RemoteTier {
    client: Client,
    base_url: String,
    token: Option<String>,
    /// Full progress payloads
    progress_timeout: Duration,
    /// Lightweight calls (delete)
    light_timeout: Duration,
}

impl RemoteTier {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        progress_timeout: Duration,
        light_timeout: Duration,
    ) -> Result<Self, TierError> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| TierError::Backend(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            progress_timeout,
            light_timeout,
        })
    }

    pub fn from_config(config: &ProgressSyncConfig) -> Result<Self, TierError> {
        Self::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.progress_timeout(),
            config.light_timeout(),
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn progress_url(&self, quiz_id: Option<&str>) -> String {
        match quiz_id {
            Some(id) => format!("{}/progress/{}", self.base_url, id),
            None => format!("{}/progress", self.base_url),
        }
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, timeout: Duration) -> Result<Response, TierError> {
        self.authorize(req)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn envelope(response: Response) -> Result<ApiEnvelope, TierError> {
        let body = response.text().await.map_err(transport_error)?;
        let envelope: ApiEnvelope =
            serde_json::from_str(&body).map_err(|e| TierError::Malformed(e.to_string()))?;
        if !envelope.success {
            return Err(TierError::Rejected(
                envelope.message.unwrap_or_else(|| "success=false".to_string()),
            ));
        }
        Ok(envelope)
    }
}

fn transport_error(e: reqwest::Error) -> TierError {
    if e.is_timeout() {
        TierError::Timeout
    } else {
        TierError::Unavailable(e.to_string())
    }
}

/// The quiz id of a primary key; anything else has no remote counterpart.
fn remote_quiz_id(key: &StorageKey) -> Result<&str, TierError> {
    match key {
        StorageKey::Progress { quiz_id, variant: KeyVariant::Primary, .. } => Ok(quiz_id),
        other => Err(TierError::Unsupported(other.encode())),
    }
}

#[async_trait]
impl StorageTier for RemoteTier {
    fn kind(&self) -> TierKind {
        TierKind::Remote
    }

    async fn get(&self, key: &StorageKey) -> Result<Option<String>, TierError> {
        let quiz_id = remote_quiz_id(key)?;
        let url = self.progress_url(Some(quiz_id));
        let response = self.send(self.client.get(&url), self.progress_timeout).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TierError::Http { status: status.as_u16() });
        }

        let envelope = Self::envelope(response).await?;
        debug!(%url, "Remote progress fetched");
        match envelope.data {
            Value::Null => Ok(None),
            data @ Value::Object(_) => Ok(Some(data.to_string())),
            other => Err(TierError::Malformed(format!("expected object, got {other}"))),
        }
    }

    async fn set(&self, key: &StorageKey, value: &str) -> Result<(), TierError> {
        let quiz_id = remote_quiz_id(key)?;
        let progress: Value =
            serde_json::from_str(value).map_err(|e| TierError::Malformed(e.to_string()))?;
        let body = json!({ "quizId": quiz_id, "progress": progress });

        let response = self
            .send(self.client.post(self.progress_url(None)).json(&body), self.progress_timeout)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TierError::Http { status: status.as_u16() });
        }
        Self::envelope(response).await?;
        debug!(quiz_id, "Remote progress saved");
        Ok(())
    }

    async fn remove(&self, key: &StorageKey) -> Result<(), TierError> {
        let quiz_id = remote_quiz_id(key)?;
        let response = self
            .send(self.client.delete(self.progress_url(Some(quiz_id))), self.light_timeout)
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(quiz_id, "Remote progress removed");
            Ok(())
        } else {
            Err(TierError::Http { status: status.as_u16() })
        }
    }

    /// The API has no listing; recovery scans the remote by primary key only.
    async fn list_keys(&self, _prefix: &str) -> Result<Vec<StorageKey>, TierError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> RemoteTier {
        RemoteTier::new(
            "http://localhost:9/api/",
            None,
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let tier = tier();
        assert_eq!(tier.base_url(), "http://localhost:9/api");
        assert_eq!(tier.progress_url(Some("initiative")), "http://localhost:9/api/progress/initiative");
        assert_eq!(tier.progress_url(None), "http://localhost:9/api/progress");
    }

    #[tokio::test]
    async fn test_non_primary_keys_unsupported() {
        let tier = tier();
        let backup = StorageKey::backup("alice", "initiative");

        let emergency = StorageKey::emergency("alice", "initiative", 1_700_000_000_000);

        assert!(matches!(tier.get(&backup).await, Err(TierError::Unsupported(_))));
        assert!(matches!(tier.get(&emergency).await, Err(TierError::Unsupported(_))));
        assert!(matches!(tier.get(&StorageKey::SyncQueue).await, Err(TierError::Unsupported(_))));
        assert!(matches!(tier.set(&backup, "{}").await, Err(TierError::Unsupported(_))));
        assert!(matches!(tier.remove(&StorageKey::SyncQueue).await, Err(TierError::Unsupported(_))));
        assert!(tier.list_keys("progress/alice/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_rejects_non_json_value() {
        let tier = tier();
        let err = tier.set(&StorageKey::primary("alice", "initiative"), "not json").await.unwrap_err();
        assert!(matches!(err, TierError::Malformed(_)));
    }
}
