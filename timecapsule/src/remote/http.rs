//! HTTP client for the remote Letter API
//!
//! Every request is bounded by the configured timeout. Non-2xx statuses and
//! envelopes with `success: false` both surface as [`AppError::Network`].

use super::{ApiEnvelope, ConnectivityProbe, ImageStore, SyncRemote};
use crate::config::{CONNECTIVITY_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::database::{Letter, LetterImage, Mood};
use crate::error::{AppError, Result};
use crate::services::sync::SyncPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Connection settings for the Letter API
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Bearer token supplied by the session layer
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            auth_token: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Fields the API accepts on create and update
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LetterBody<'a> {
    title: &'a str,
    content: &'a str,
    mood: Mood,
    delivery_date: DateTime<Utc>,
    images: &'a [LetterImage],
}

impl<'a> From<&'a Letter> for LetterBody<'a> {
    fn from(letter: &'a Letter) -> Self {
        Self {
            title: &letter.title,
            content: &letter.content,
            mood: letter.mood,
            delivery_date: letter.delivery_date,
            images: &letter.images,
        }
    }
}

/// reqwest-backed Letter API client
#[derive(Clone)]
pub struct HttpLetterApi {
    client: Client,
    config: RemoteConfig,
}

impl HttpLetterApi {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("timecapsule/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let request = match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        let envelope: ApiEnvelope<T> = match response.json().await {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(AppError::Network(format!("Letter API returned {}", status)));
            }
            Err(e) => return Err(e.into()),
        };

        if !status.is_success() || !envelope.success {
            tracing::warn!("Letter API request failed ({}): {}", status, envelope.message);
            return Err(AppError::Network(if envelope.message.is_empty() {
                format!("Letter API returned {}", status)
            } else {
                envelope.message
            }));
        }

        Ok(envelope.data)
    }

    async fn send_expecting<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .ok_or_else(|| AppError::Network("Letter API response carried no data".to_string()))
    }

    pub async fn list_letters(&self) -> Result<Vec<Letter>> {
        let letters = self.send(self.client.get(self.url("/letters"))).await?;
        Ok(letters.unwrap_or_default())
    }

    pub async fn get_letter(&self, id: &str) -> Result<Letter> {
        self.send_expecting(self.client.get(self.url(&format!("/letters/{}", id))))
            .await
    }

    pub async fn create_letter(&self, letter: &Letter) -> Result<Letter> {
        tracing::debug!("Creating remote letter {}", letter.id);
        self.send_expecting(
            self.client
                .post(self.url("/letters"))
                .json(&LetterBody::from(letter)),
        )
        .await
    }

    pub async fn update_letter(&self, letter: &Letter) -> Result<Letter> {
        tracing::debug!("Updating remote letter {}", letter.id);
        self.send_expecting(
            self.client
                .put(self.url(&format!("/letters/{}", letter.id)))
                .json(&LetterBody::from(letter)),
        )
        .await
    }

    /// Soft delete; the server only sets `isDeleted`
    pub async fn delete_letter(&self, id: &str) -> Result<()> {
        self.send::<serde_json::Value>(self.client.delete(self.url(&format!("/letters/{}", id))))
            .await?;
        Ok(())
    }

    pub async fn restore_letter(&self, id: &str) -> Result<()> {
        self.send::<serde_json::Value>(
            self.client
                .patch(self.url(&format!("/letters/{}/restore", id))),
        )
        .await?;
        Ok(())
    }

    /// Hard delete; the server cascades image cleanup on its side
    pub async fn permanent_delete_letter(&self, id: &str) -> Result<()> {
        self.send::<serde_json::Value>(
            self.client
                .delete(self.url(&format!("/letters/{}/permanent", id))),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ImageStore for HttpLetterApi {
    async fn delete_image(&self, storage_id: &str) -> Result<()> {
        self.send::<serde_json::Value>(
            self.client
                .delete(self.url(&format!("/images/{}", storage_id))),
        )
        .await?;
        tracing::debug!("Deleted remote image {}", storage_id);
        Ok(())
    }
}

#[async_trait]
impl SyncRemote for HttpLetterApi {
    async fn push(&self, payload: &SyncPayload) -> Result<()> {
        tracing::debug!("Pushing {} letters to remote", payload.letters.len());
        self.send::<serde_json::Value>(self.client.post(self.url("/sync")).json(payload))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectivityProbe for HttpLetterApi {
    /// Any HTTP response counts as reachable; transport errors and
    /// timeouts do not.
    async fn is_reachable(&self) -> bool {
        let result = self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(CONNECTIVITY_TIMEOUT_SECS))
            .send()
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }
}
