//! Remote collaborators
//!
//! Ports for everything that lives on the other side of the network, and
//! the HTTP adapter implementing them against the Letter API.

pub mod http;

pub use http::{HttpLetterApi, RemoteConfig};

use crate::error::{AppError, Result};
use crate::services::sync::SyncPayload;
use async_trait::async_trait;
use serde::Deserialize;

/// Response envelope shared by every Letter API endpoint
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

/// Deletes hosted image assets
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn delete_image(&self, storage_id: &str) -> Result<()>;
}

/// Receives full-state sync pushes
#[async_trait]
pub trait SyncRemote: Send + Sync {
    async fn push(&self, payload: &SyncPayload) -> Result<()>;
}

/// Answers whether the remote is reachable right now
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Stand-in used when no Letter API is configured: never reachable,
/// every push fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl SyncRemote for OfflineRemote {
    async fn push(&self, _payload: &SyncPayload) -> Result<()> {
        Err(AppError::Network("No Letter API configured".to_string()))
    }
}

#[async_trait]
impl ConnectivityProbe for OfflineRemote {
    async fn is_reachable(&self) -> bool {
        false
    }
}
