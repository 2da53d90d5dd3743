//! Notification scheduler
//!
//! Binds letters to local notification triggers and keeps a persisted
//! registry of what was scheduled, so triggers survive restarts and can be
//! cancelled by letter.
//!
//! Identifiers are `"{letter_id}:{purpose}"`, which makes "at most one
//! reminder and one unlock per letter" hold by construction. Platform
//! refusals and storage failures are logged and swallowed: a letter
//! operation never fails because a trigger could not be armed.

use crate::clock::Clock;
use crate::config::{DAILY_NOTIFICATION_ID, KEY_NOTIFICATION_REGISTRY, REMINDER_LEAD_HOURS};
use crate::database::Letter;
use crate::error::{AppError, Result};
use crate::platform::{NotificationContent, NotificationPlatform, NotificationTrigger};
use crate::services::letters::{LetterEvent, LetterObserver};
use crate::storage::{load_json, save_json, KeyValueStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPurpose {
    Reminder,
    Unlock,
    Daily,
}

impl fmt::Display for NotificationPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationPurpose::Reminder => "reminder",
            NotificationPurpose::Unlock => "unlock",
            NotificationPurpose::Daily => "daily",
        })
    }
}

/// A registry entry describing one armed trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub purpose: NotificationPurpose,
    /// Empty for the daily trigger
    pub letter_id: String,
    pub title: String,
    pub body: String,
    pub trigger: NotificationTrigger,
}

pub fn notification_id(letter_id: &str, purpose: NotificationPurpose) -> String {
    match purpose {
        NotificationPurpose::Daily => DAILY_NOTIFICATION_ID.to_string(),
        _ => format!("{}:{}", letter_id, purpose),
    }
}

type Registry = BTreeMap<String, NotificationRecord>;

#[derive(Clone)]
pub struct NotificationScheduler {
    platform: Arc<dyn NotificationPlatform>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Loaded lazily from the store on first use
    registry: Arc<Mutex<Option<Registry>>>,
}

impl NotificationScheduler {
    pub fn new(
        platform: Arc<dyn NotificationPlatform>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            platform,
            store,
            clock,
            registry: Arc::new(Mutex::new(None)),
        }
    }

    async fn load_registry(&self) -> Registry {
        match load_json::<Registry>(self.store.as_ref(), KEY_NOTIFICATION_REGISTRY).await {
            Ok(registry) => registry.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to load notification registry, starting empty: {}", e);
                Registry::new()
            }
        }
    }

    async fn persist(&self, registry: &Registry) {
        if let Err(e) = save_json(self.store.as_ref(), KEY_NOTIFICATION_REGISTRY, registry).await {
            tracing::warn!(
                "Failed to persist notification registry; triggers may not survive a restart: {}",
                e
            );
        }
    }

    /// Lock the registry, loading it from the store on first use
    async fn registry_guard(&self) -> MappedMutexGuard<'_, Registry> {
        let mut guard = self.registry.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_registry().await);
        }
        MutexGuard::map(guard, |registry| registry.get_or_insert_with(Registry::new))
    }

    async fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        let registry = self.registry_guard().await;
        f(&registry)
    }

    /// "Your letter arrives tomorrow", one day before delivery
    pub async fn schedule_reminder(&self, letter: &Letter) -> Option<String> {
        let fire_at = letter.delivery_date - Duration::hours(REMINDER_LEAD_HOURS);
        let content = NotificationContent {
            title: "Your letter arrives tomorrow".to_string(),
            body: format!("\"{}\" unlocks in 24 hours", letter.title),
        };
        self.schedule_for(letter, NotificationPurpose::Reminder, fire_at, content)
            .await
    }

    /// "A letter from your past is ready", at the delivery instant
    pub async fn schedule_unlock(&self, letter: &Letter) -> Option<String> {
        let content = NotificationContent {
            title: "A letter from your past is ready".to_string(),
            body: format!("\"{}\" is now unlocked", letter.title),
        };
        self.schedule_for(
            letter,
            NotificationPurpose::Unlock,
            letter.delivery_date,
            content,
        )
        .await
    }

    /// Schedule both lifecycle triggers for a letter
    pub async fn schedule_for_letter(&self, letter: &Letter) -> (Option<String>, Option<String>) {
        let reminder = self.schedule_reminder(letter).await;
        let unlock = self.schedule_unlock(letter).await;
        (reminder, unlock)
    }

    /// Arm both triggers for every letter, e.g. after a restart wiped the
    /// platform's pending triggers. Ids are deterministic, so re-arming an
    /// already armed letter replaces it.
    pub async fn rearm_letters(&self, letters: &[Letter]) -> usize {
        let mut armed = 0;
        for letter in letters {
            let (reminder, unlock) = self.schedule_for_letter(letter).await;
            armed += reminder.is_some() as usize + unlock.is_some() as usize;
        }
        tracing::info!("Re-armed {} trigger(s) for {} letter(s)", armed, letters.len());
        armed
    }

    async fn schedule_for(
        &self,
        letter: &Letter,
        purpose: NotificationPurpose,
        fire_at: DateTime<Utc>,
        content: NotificationContent,
    ) -> Option<String> {
        if letter.is_terminal() {
            tracing::debug!("Letter {} is delivered or trashed, no {} trigger", letter.id, purpose);
            return None;
        }

        if fire_at <= self.clock.now() {
            tracing::debug!("The {} window for letter {} has passed", purpose, letter.id);
            return None;
        }

        let id = notification_id(&letter.id, purpose);
        let trigger = NotificationTrigger::At { date: fire_at };
        let record = NotificationRecord {
            id: id.clone(),
            purpose,
            letter_id: letter.id.clone(),
            title: content.title.clone(),
            body: content.body.clone(),
            trigger: trigger.clone(),
        };

        self.arm(record, &content, &trigger).await
    }

    async fn arm(
        &self,
        record: NotificationRecord,
        content: &NotificationContent,
        trigger: &NotificationTrigger,
    ) -> Option<String> {
        let mut registry = self.registry_guard().await;

        match self
            .platform
            .schedule(Some(&record.id), content, trigger)
            .await
        {
            Ok(id) => {
                tracing::info!("Scheduled {} notification {} ({:?})", record.purpose, id, trigger);
                registry.insert(id.clone(), NotificationRecord { id: id.clone(), ..record });
                self.persist(&registry).await;
                Some(id)
            }
            Err(e) => {
                tracing::warn!("Could not schedule {} notification {}: {}", record.purpose, record.id, e);
                None
            }
        }
    }

    /// Disarm a trigger and drop its registry entry. Unknown ids are a no-op.
    pub async fn cancel(&self, id: &str) {
        let mut registry = self.registry_guard().await;

        self.cancel_locked(&mut registry, id).await;
        self.persist(&registry).await;
    }

    async fn cancel_locked(&self, registry: &mut Registry, id: &str) {
        if let Err(e) = self.platform.cancel(id).await {
            tracing::warn!("Platform failed to cancel notification {}: {}", id, e);
        }
        if registry.remove(id).is_some() {
            tracing::debug!("Cancelled notification {}", id);
        }
    }

    /// Cancel every trigger bound to a letter. Returns how many were removed.
    pub async fn cancel_all_for_letter(&self, letter_id: &str) -> usize {
        let mut registry = self.registry_guard().await;

        let ids: Vec<String> = registry
            .values()
            .filter(|r| r.letter_id == letter_id)
            .map(|r| r.id.clone())
            .collect();

        for id in &ids {
            self.cancel_locked(&mut registry, id).await;
        }
        if !ids.is_empty() {
            self.persist(&registry).await;
            tracing::info!("Cancelled {} notification(s) for letter {}", ids.len(), letter_id);
        }
        ids.len()
    }

    /// Replace the repeating daily nudge. At most one exists at any time.
    pub async fn schedule_daily_reminder(&self, hour: u32, minute: u32) -> Result<Option<String>> {
        if hour > 23 || minute > 59 {
            return Err(AppError::Validation(format!(
                "Invalid daily reminder time {:02}:{:02}",
                hour, minute
            )));
        }

        self.cancel(DAILY_NOTIFICATION_ID).await;

        let content = NotificationContent {
            title: "Time to write to your future self".to_string(),
            body: "A few words today will mean a lot later.".to_string(),
        };
        let trigger = NotificationTrigger::Daily { hour, minute };
        let record = NotificationRecord {
            id: DAILY_NOTIFICATION_ID.to_string(),
            purpose: NotificationPurpose::Daily,
            letter_id: String::new(),
            title: content.title.clone(),
            body: content.body.clone(),
            trigger: trigger.clone(),
        };

        Ok(self.arm(record, &content, &trigger).await)
    }

    pub async fn cancel_daily_reminder(&self) {
        self.cancel(DAILY_NOTIFICATION_ID).await;
    }

    pub async fn find_for_letter(&self, letter_id: &str) -> Vec<NotificationRecord> {
        self.with_registry(|registry| {
            registry
                .values()
                .filter(|r| r.letter_id == letter_id)
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn list_scheduled(&self) -> Vec<NotificationRecord> {
        self.with_registry(|registry| registry.values().cloned().collect())
            .await
    }

    /// Startup repair: prune registry entries the platform no longer holds.
    /// Live triggers without a registry entry are left to fire once.
    pub async fn reconcile(&self) -> Result<usize> {
        let live: HashSet<String> = self
            .platform
            .list_all()
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let mut guard = self.registry.lock().await;
        let mut registry = self.load_registry().await;

        let before = registry.len();
        registry.retain(|id, _| live.contains(id));
        let pruned = before - registry.len();

        if pruned > 0 {
            self.persist(&registry).await;
        }
        *guard = Some(registry);

        tracing::info!(
            "Notification registry reconciled: {} kept, {} pruned",
            before - pruned,
            pruned
        );
        Ok(pruned)
    }
}

#[async_trait]
impl LetterObserver for NotificationScheduler {
    async fn on_letter_event(&self, event: &LetterEvent) {
        match event {
            LetterEvent::Created(letter) | LetterEvent::Restored(letter) => {
                self.schedule_for_letter(letter).await;
            }
            LetterEvent::Updated(letter) => {
                self.cancel_all_for_letter(&letter.id).await;
                self.schedule_for_letter(letter).await;
            }
            LetterEvent::SoftDeleted(letter) | LetterEvent::Delivered(letter) => {
                self.cancel_all_for_letter(&letter.id).await;
            }
            LetterEvent::PermanentlyDeleted { letter_id } => {
                self.cancel_all_for_letter(letter_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::database::Mood;
    use crate::platform::{LocalNotifier, ScheduledTrigger};
    use crate::storage::MemoryKvStore;

    struct Fixture {
        scheduler: NotificationScheduler,
        notifier: LocalNotifier,
        store: MemoryKvStore,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let notifier = LocalNotifier::default();
        let store = MemoryKvStore::new();
        let clock = FixedClock::new(Utc::now());
        let scheduler = NotificationScheduler::new(
            Arc::new(notifier.clone()),
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
        );
        Fixture {
            scheduler,
            notifier,
            store,
            clock,
        }
    }

    fn letter(id: &str, delivery_date: DateTime<Utc>) -> Letter {
        let now = Utc::now();
        Letter {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            title: "Dear me".to_string(),
            content: "hello from the past".to_string(),
            mood: Mood::Calm,
            created_at: now,
            updated_at: now,
            delivery_date,
            is_delivered: false,
            is_deleted: false,
            deleted_at: None,
            images: Vec::new(),
            featured_image: None,
        }
    }

    #[tokio::test]
    async fn test_reminder_and_unlock_dates() {
        let f = fixture();
        let now = f.clock.now();
        let l = letter("a", now + Duration::days(2));

        let reminder = f.scheduler.schedule_reminder(&l).await;
        let unlock = f.scheduler.schedule_unlock(&l).await;

        assert_eq!(reminder.as_deref(), Some("a:reminder"));
        assert_eq!(unlock.as_deref(), Some("a:unlock"));

        let records = f.scheduler.find_for_letter("a").await;
        let trigger_of = |purpose| {
            records
                .iter()
                .find(|r| r.purpose == purpose)
                .map(|r| r.trigger.clone())
        };
        assert_eq!(
            trigger_of(NotificationPurpose::Reminder),
            Some(NotificationTrigger::At {
                date: now + Duration::days(1)
            })
        );
        assert_eq!(
            trigger_of(NotificationPurpose::Unlock),
            Some(NotificationTrigger::At {
                date: now + Duration::days(2)
            })
        );
    }

    #[tokio::test]
    async fn test_past_window_is_noop() {
        let f = fixture();
        let now = f.clock.now();
        let l = letter("a", now + Duration::hours(12));

        assert!(f.scheduler.schedule_reminder(&l).await.is_none());
        assert!(f.scheduler.find_for_letter("a").await.is_empty());

        let exactly_now = letter("b", now + Duration::days(1));
        assert!(f.scheduler.schedule_reminder(&exactly_now).await.is_none());
        assert!(f.scheduler.list_scheduled().await.is_empty());
        assert!(f.store.get(KEY_NOTIFICATION_REGISTRY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_letters_not_scheduled() {
        let f = fixture();
        let mut l = letter("a", f.clock.now() + Duration::days(5));
        l.is_delivered = true;

        assert_eq!(f.scheduler.schedule_for_letter(&l).await, (None, None));
    }

    #[tokio::test]
    async fn test_rescheduling_keeps_one_per_purpose() {
        let f = fixture();
        let l = letter("a", f.clock.now() + Duration::days(5));

        f.scheduler.schedule_for_letter(&l).await;
        f.scheduler.schedule_for_letter(&l).await;

        assert_eq!(f.scheduler.find_for_letter("a").await.len(), 2);
        assert_eq!(f.notifier.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_all_for_letter_empties_lookup() {
        let f = fixture();
        let now = f.clock.now();

        // zero, one and two triggers beforehand
        assert_eq!(f.scheduler.cancel_all_for_letter("none").await, 0);

        let one = letter("one", now + Duration::hours(30));
        f.scheduler.schedule_unlock(&one).await;
        assert_eq!(f.scheduler.cancel_all_for_letter("one").await, 1);

        let two = letter("two", now + Duration::days(3));
        f.scheduler.schedule_for_letter(&two).await;
        assert_eq!(f.scheduler.cancel_all_for_letter("two").await, 2);

        for id in ["none", "one", "two"] {
            assert!(f.scheduler.find_for_letter(id).await.is_empty());
        }
        assert!(f.notifier.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let f = fixture();

        f.scheduler.cancel("ghost:unlock").await;

        assert!(f.scheduler.list_scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_returns_none() {
        let f = fixture();
        f.notifier.set_permission(false);
        let l = letter("a", f.clock.now() + Duration::days(5));

        assert_eq!(f.scheduler.schedule_for_letter(&l).await, (None, None));
        assert!(f.scheduler.list_scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn test_single_daily_reminder() {
        let f = fixture();

        f.scheduler.schedule_daily_reminder(8, 0).await.unwrap();
        let id = f.scheduler.schedule_daily_reminder(21, 30).await.unwrap();

        assert_eq!(id.as_deref(), Some("daily"));
        let daily: Vec<_> = f
            .scheduler
            .list_scheduled()
            .await
            .into_iter()
            .filter(|r| r.purpose == NotificationPurpose::Daily)
            .collect();
        assert_eq!(daily.len(), 1);
        assert_eq!(
            daily[0].trigger,
            NotificationTrigger::Daily {
                hour: 21,
                minute: 30
            }
        );
        assert!(daily[0].letter_id.is_empty());

        f.scheduler.cancel_daily_reminder().await;
        assert!(f.scheduler.list_scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn test_daily_reminder_rejects_bad_time() {
        let f = fixture();

        let result = f.scheduler.schedule_daily_reminder(7, 60).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_registry_survives_restart() {
        let f = fixture();
        let l = letter("a", f.clock.now() + Duration::days(5));
        f.scheduler.schedule_for_letter(&l).await;

        let restarted = NotificationScheduler::new(
            Arc::new(f.notifier.clone()),
            Arc::new(f.store.clone()),
            Arc::new(f.clock.clone()),
        );

        assert_eq!(restarted.find_for_letter("a").await.len(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_prunes_entries_without_live_trigger() {
        let f = fixture();
        let l = letter("a", f.clock.now() + Duration::days(5));
        f.scheduler.schedule_for_letter(&l).await;

        // Platform lost one trigger and holds one we never registered
        f.notifier.cancel("a:reminder").await.unwrap();
        f.notifier
            .schedule(
                Some("stray"),
                &NotificationContent {
                    title: "t".to_string(),
                    body: "b".to_string(),
                },
                &NotificationTrigger::At {
                    date: f.clock.now() + Duration::days(1),
                },
            )
            .await
            .unwrap();

        let fresh = NotificationScheduler::new(
            Arc::new(f.notifier.clone()),
            Arc::new(f.store.clone()),
            Arc::new(f.clock.clone()),
        );
        let pruned = fresh.reconcile().await.unwrap();

        assert_eq!(pruned, 1);
        let ids: Vec<String> = fresh.list_scheduled().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a:unlock".to_string()]);

        let live: Vec<ScheduledTrigger> = f.notifier.list_all().await.unwrap();
        assert!(live.iter().any(|t| t.id == "stray"));
    }

    #[tokio::test]
    async fn test_rearm_restores_triggers_lost_with_platform() {
        let f = fixture();
        let sealed = letter("a", f.clock.now() + Duration::days(7));
        f.scheduler.schedule_for_letter(&sealed).await;

        // A new process starts with an empty platform
        let platform = LocalNotifier::default();
        let fresh = NotificationScheduler::new(
            Arc::new(platform.clone()),
            Arc::new(f.store.clone()),
            Arc::new(f.clock.clone()),
        );
        assert_eq!(fresh.reconcile().await.unwrap(), 2);

        let mut delivered = letter("b", f.clock.now() + Duration::days(2));
        delivered.is_delivered = true;
        let armed = fresh.rearm_letters(&[sealed.clone(), delivered]).await;

        assert_eq!(armed, 2);
        assert_eq!(fresh.find_for_letter("a").await.len(), 2);
        assert!(fresh.find_for_letter("b").await.is_empty());
        assert_eq!(platform.list_all().await.unwrap().len(), 2);

        // Re-arming an armed letter replaces its triggers
        fresh.rearm_letters(&[sealed]).await;
        assert_eq!(platform.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_observer_cancels_on_soft_delete() {
        let f = fixture();
        let mut l = letter("a", f.clock.now() + Duration::days(5));
        f.scheduler
            .on_letter_event(&LetterEvent::Created(l.clone()))
            .await;
        assert_eq!(f.scheduler.find_for_letter("a").await.len(), 2);

        l.is_deleted = true;
        f.scheduler
            .on_letter_event(&LetterEvent::SoftDeleted(l.clone()))
            .await;
        assert!(f.scheduler.find_for_letter("a").await.is_empty());

        l.is_deleted = false;
        f.scheduler.on_letter_event(&LetterEvent::Restored(l)).await;
        assert_eq!(f.scheduler.find_for_letter("a").await.len(), 2);
    }
}
