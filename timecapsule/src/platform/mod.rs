//! Platform functionality
//!
//! The local notification scheduler the core talks to, and the in-process
//! implementation used when no OS notification centre is wired in.

pub mod notifier;

pub use notifier::{FiredNotification, LocalNotifier};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When a notification fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NotificationTrigger {
    /// Fires once at an absolute instant
    At { date: DateTime<Utc> },
    /// Fires every day at a local wall-clock time
    Daily { hour: u32, minute: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

/// A trigger the platform currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTrigger {
    pub id: String,
    pub trigger: NotificationTrigger,
}

#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    /// Schedule a notification, replacing any trigger with the same id.
    /// Returns the identifier the platform assigned.
    async fn schedule(
        &self,
        id: Option<&str>,
        content: &NotificationContent,
        trigger: &NotificationTrigger,
    ) -> Result<String>;

    async fn cancel(&self, id: &str) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<ScheduledTrigger>>;
}
