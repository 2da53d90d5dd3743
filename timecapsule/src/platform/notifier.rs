//! In-process notification scheduler
//!
//! Each trigger is a tokio task sleeping until its fire time. Firing logs
//! the notification and broadcasts it to subscribers. One-shot triggers
//! remove themselves after firing; daily triggers re-arm.

use super::{NotificationContent, NotificationPlatform, NotificationTrigger, ScheduledTrigger};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A notification that was shown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredNotification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub fired_at: DateTime<Utc>,
}

struct PendingTrigger {
    trigger: NotificationTrigger,
    generation: u64,
    handle: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingTrigger>>>;

#[derive(Clone)]
pub struct LocalNotifier {
    pending: PendingMap,
    permission: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    fired: broadcast::Sender<FiredNotification>,
}

impl Default for LocalNotifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LocalNotifier {
    pub fn new(permission_granted: bool) -> Self {
        let (fired, _) = broadcast::channel(64);
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            permission: Arc::new(AtomicBool::new(permission_granted)),
            generation: Arc::new(AtomicU64::new(0)),
            fired,
        }
    }

    /// Grant or revoke permission to schedule. Existing triggers stay armed.
    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FiredNotification> {
        self.fired.subscribe()
    }

    fn spawn_trigger(
        &self,
        id: String,
        content: NotificationContent,
        trigger: NotificationTrigger,
        generation: u64,
    ) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let fired = self.fired.clone();

        tokio::spawn(async move {
            match trigger {
                NotificationTrigger::At { date } => {
                    sleep_until(date).await;
                    emit(&fired, &id, &content);

                    let mut pending = pending.lock().await;
                    if pending.get(&id).map(|p| p.generation) == Some(generation) {
                        pending.remove(&id);
                    }
                }
                NotificationTrigger::Daily { hour, minute } => loop {
                    let Some(next) = next_daily_occurrence(Utc::now(), hour, minute) else {
                        tracing::error!("Daily trigger {} has no valid next occurrence", id);
                        return;
                    };
                    sleep_until(next).await;
                    emit(&fired, &id, &content);
                },
            }
        })
    }
}

fn emit(fired: &broadcast::Sender<FiredNotification>, id: &str, content: &NotificationContent) {
    tracing::info!("Notification {}: {} - {}", id, content.title, content.body);

    // No subscribers is fine; the log line above is the notification
    let _ = fired.send(FiredNotification {
        id: id.to_string(),
        title: content.title.clone(),
        body: content.body.clone(),
        fired_at: Utc::now(),
    });
}

async fn sleep_until(at: DateTime<Utc>) {
    let wait = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
}

/// Next instant strictly after `now` whose local wall-clock time is
/// `hour:minute`. Local times skipped by DST transitions move to the next day.
pub fn next_daily_occurrence(now: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let today = now.with_timezone(&Local).date_naive();

    (0..=2).find_map(|offset| {
        let day = today + Duration::days(offset);
        let naive = day.and_hms_opt(hour, minute, 0)?;
        let local = Local.from_local_datetime(&naive).earliest()?;
        let candidate = local.with_timezone(&Utc);
        (candidate > now).then_some(candidate)
    })
}

#[async_trait]
impl NotificationPlatform for LocalNotifier {
    async fn schedule(
        &self,
        id: Option<&str>,
        content: &NotificationContent,
        trigger: &NotificationTrigger,
    ) -> Result<String> {
        if !self.permission.load(Ordering::SeqCst) {
            return Err(AppError::Notification(
                "Notification permission denied".to_string(),
            ));
        }

        if let NotificationTrigger::Daily { hour, minute } = trigger {
            if *hour > 23 || *minute > 59 {
                return Err(AppError::Notification(format!(
                    "Invalid daily time {:02}:{:02}",
                    hour, minute
                )));
            }
        }

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);

        let mut pending = self.pending.lock().await;
        if let Some(old) = pending.remove(&id) {
            old.handle.abort();
        }

        let handle = self.spawn_trigger(id.clone(), content.clone(), trigger.clone(), generation);
        pending.insert(
            id.clone(),
            PendingTrigger {
                trigger: trigger.clone(),
                generation,
                handle,
            },
        );

        tracing::debug!("Armed notification {} ({:?})", id, trigger);
        Ok(id)
    }

    async fn cancel(&self, id: &str) -> Result<()> {
        if let Some(old) = self.pending.lock().await.remove(id) {
            old.handle.abort();
            tracing::debug!("Disarmed notification {}", id);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ScheduledTrigger>> {
        let pending = self.pending.lock().await;
        Ok(pending
            .iter()
            .map(|(id, p)| ScheduledTrigger {
                id: id.clone(),
                trigger: p.trigger.clone(),
            })
            .collect())
    }
}
