//! Sync engine
//!
//! Pushes the full local state (user, letters, portable settings) to the
//! remote. While offline, the latest payload is queued and pushed by the
//! periodic tick once the remote is reachable again. Every push is preceded
//! by a local safety snapshot.
//!
//! Status, queue and history live behind one mutex and are mirrored to the
//! key-value store so they survive restarts. The lock is never held across
//! network or backup I/O.

use crate::clock::Clock;
use crate::config::{KEY_SYNC_HISTORY, KEY_SYNC_QUEUE, KEY_SYNC_STATUS, MAX_SYNC_HISTORY};
use crate::database::Letter;
use crate::error::Result;
use crate::remote::{ConnectivityProbe, SyncRemote};
use crate::services::backup::BackupService;
use crate::services::settings::{PortableSettings, UserProfile};
use crate::storage::{load_json, save_json, KeyValueStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_changes: u32,
    pub sync_in_progress: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Auto,
    Manual,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub kind: SyncKind,
}

impl SyncOptions {
    pub fn manual() -> Self {
        Self {
            kind: SyncKind::Manual,
        }
    }

    /// Skips the in-progress and connectivity checks
    pub fn forced() -> Self {
        Self {
            kind: SyncKind::Force,
        }
    }

    fn is_forced(self) -> bool {
        self.kind == SyncKind::Force
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::manual()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: SyncKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything pushed to the remote in one sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub user: UserProfile,
    pub letters: Vec<Letter>,
    pub settings: PortableSettings,
    pub queued_at: DateTime<Utc>,
}

#[derive(Default)]
struct SyncState {
    loaded: bool,
    status: SyncStatus,
    queue: Option<SyncPayload>,
    history: VecDeque<SyncHistoryEntry>,
}

#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn SyncRemote>,
    probe: Arc<dyn ConnectivityProbe>,
    store: Arc<dyn KeyValueStore>,
    backup: BackupService,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SyncState>>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn SyncRemote>,
        probe: Arc<dyn ConnectivityProbe>,
        store: Arc<dyn KeyValueStore>,
        backup: BackupService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            probe,
            store,
            backup,
            clock,
            state: Arc::new(Mutex::new(SyncState::default())),
        }
    }

    /// Restore status, queue and history persisted by a previous run
    pub async fn load(&self) -> Result<SyncStatus> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state).await;
        Ok(state.status.clone())
    }

    async fn load_locked(&self, state: &mut SyncState) {
        let store = self.store.as_ref();

        let status = load_json::<SyncStatus>(store, KEY_SYNC_STATUS)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load sync status: {}", e);
                None
            })
            .unwrap_or_default();
        let queue = load_json::<SyncPayload>(store, KEY_SYNC_QUEUE)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load sync queue: {}", e);
                None
            });
        let history = load_json::<VecDeque<SyncHistoryEntry>>(store, KEY_SYNC_HISTORY)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load sync history: {}", e);
                None
            })
            .unwrap_or_default();

        state.status = status;
        if state.status.sync_in_progress {
            tracing::warn!("Clearing sync flag left behind by an interrupted run");
            state.status.sync_in_progress = false;
        }
        state.queue = queue;
        state.history = history;
        state.loaded = true;
    }

    async fn ensure_loaded(&self, state: &mut SyncState) {
        if !state.loaded {
            self.load_locked(state).await;
        }
    }

    async fn persist_status(&self, state: &SyncState) {
        if let Err(e) = save_json(self.store.as_ref(), KEY_SYNC_STATUS, &state.status).await {
            tracing::warn!("Failed to persist sync status: {}", e);
        }
    }

    async fn persist_queue(&self, state: &SyncState) {
        let result = match &state.queue {
            Some(payload) => save_json(self.store.as_ref(), KEY_SYNC_QUEUE, payload).await,
            None => self.store.remove(KEY_SYNC_QUEUE).await,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist sync queue: {}", e);
        }
    }

    async fn persist_history(&self, state: &SyncState) {
        if let Err(e) = save_json(self.store.as_ref(), KEY_SYNC_HISTORY, &state.history).await {
            tracing::warn!("Failed to persist sync history: {}", e);
        }
    }

    /// Probe the remote and record the result
    pub async fn check_connectivity(&self) -> bool {
        let online = self.probe.is_reachable().await;

        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        if state.status.is_online != online {
            tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
        state.status.is_online = online;
        self.persist_status(&state).await;

        online
    }

    /// Push the given state, or queue it while offline.
    ///
    /// Returns true only when the remote accepted the push.
    pub async fn sync_data(
        &self,
        user: &UserProfile,
        letters: &[Letter],
        settings: &PortableSettings,
        options: SyncOptions,
    ) -> bool {
        {
            let mut state = self.state.lock().await;
            self.ensure_loaded(&mut state).await;
            if state.status.sync_in_progress && !options.is_forced() {
                tracing::debug!("Sync already in progress, skipping");
                return false;
            }
        }

        let payload = SyncPayload {
            user: user.clone(),
            letters: letters.to_vec(),
            settings: settings.clone(),
            queued_at: self.clock.now(),
        };

        let online = self.check_connectivity().await;
        self.run_sync(payload, options.kind, online).await
    }

    pub async fn force_sync(
        &self,
        user: &UserProfile,
        letters: &[Letter],
        settings: &PortableSettings,
    ) -> bool {
        self.sync_data(user, letters, settings, SyncOptions::forced())
            .await
    }

    /// One periodic step: push the queued payload once the remote is back
    pub async fn tick(&self) -> bool {
        let online = self.check_connectivity().await;

        let payload = {
            let mut state = self.state.lock().await;
            self.ensure_loaded(&mut state).await;

            if !online || state.status.pending_changes == 0 || state.status.sync_in_progress {
                return false;
            }
            state.queue.clone()
        };

        match payload {
            Some(payload) => self.run_sync(payload, SyncKind::Auto, online).await,
            None => {
                tracing::warn!("Pending changes recorded but no queued payload");
                false
            }
        }
    }

    async fn run_sync(&self, payload: SyncPayload, kind: SyncKind, online: bool) -> bool {
        let forced = kind == SyncKind::Force;

        {
            let mut state = self.state.lock().await;

            if state.status.sync_in_progress && !forced {
                tracing::debug!("Sync already in progress, skipping");
                return false;
            }

            if !online && !forced {
                state.queue = Some(payload);
                state.status.pending_changes += 1;
                tracing::info!(
                    "Offline, queued changes ({} pending)",
                    state.status.pending_changes
                );
                self.persist_queue(&state).await;
                self.persist_status(&state).await;
                return false;
            }

            state.status.sync_in_progress = true;
            self.persist_status(&state).await;
        }

        if let Err(e) = self
            .backup
            .save_local_snapshot(&payload.user, &payload.letters, &payload.settings)
            .await
        {
            tracing::warn!("Local safety snapshot failed, syncing anyway: {}", e);
        }

        tracing::info!("Syncing {} letters ({:?})", payload.letters.len(), kind);
        let result = self.remote.push(&payload).await;

        let mut state = self.state.lock().await;
        let now = self.clock.now();
        state.status.sync_in_progress = false;

        let success = match result {
            Ok(()) => {
                state.status.last_sync_time = Some(now);
                state.status.pending_changes = 0;
                state.status.last_error = None;
                state.queue = None;
                self.persist_queue(&state).await;
                tracing::info!("Sync completed");
                true
            }
            Err(e) => {
                tracing::error!("Sync failed: {}", e);
                state.status.last_error = Some(e.to_string());
                false
            }
        };

        let error = state.status.last_error.clone().filter(|_| !success);
        state.history.push_back(SyncHistoryEntry {
            timestamp: now,
            kind,
            success,
            error,
        });
        while state.history.len() > MAX_SYNC_HISTORY {
            state.history.pop_front();
        }

        self.persist_status(&state).await;
        self.persist_history(&state).await;

        success
    }

    pub async fn status(&self) -> SyncStatus {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.status.clone()
    }

    /// Oldest first
    pub async fn history(&self) -> Vec<SyncHistoryEntry> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.history.iter().cloned().collect()
    }

    pub async fn clear_history(&self) {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.history.clear();
        self.persist_history(&state).await;
    }

    pub async fn pending_payload(&self) -> Option<SyncPayload> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await;
        state.queue.clone()
    }

    /// Start the periodic tick. Aborting the handle stops the loop.
    pub fn start_auto_sync(self, interval: std::time::Duration) -> JoinHandle<()> {
        let interval = interval.max(std::time::Duration::from_secs(1));
        tokio::spawn(async move {
            tracing::info!("Starting auto sync every {:?}", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::database::{initialize_database, Mood, Repository};
    use crate::error::AppError;
    use crate::storage::MemoryKvStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Toggle(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for Toggle {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CountingRemote {
        pushes: AtomicUsize,
        fail: AtomicBool,
        last_letters: std::sync::Mutex<usize>,
    }

    #[async_trait]
    impl SyncRemote for CountingRemote {
        async fn push(&self, payload: &SyncPayload) -> Result<()> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Network("server said no".to_string()));
            }
            *self.last_letters.lock().unwrap() = payload.letters.len();
            Ok(())
        }
    }

    struct Fixture {
        engine: SyncEngine,
        remote: Arc<CountingRemote>,
        probe: Arc<Toggle>,
        store: Arc<MemoryKvStore>,
        backup: BackupService,
    }

    async fn fixture() -> Fixture {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        initialize_database(&pool).await.unwrap();

        let store = Arc::new(MemoryKvStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let backup = BackupService::new(Repository::new(pool), store.clone(), clock.clone());
        let remote = Arc::new(CountingRemote::default());
        let probe = Arc::new(Toggle::default());

        let engine = SyncEngine::new(
            remote.clone(),
            probe.clone(),
            store.clone(),
            backup.clone(),
            clock,
        );

        Fixture {
            engine,
            remote,
            probe,
            store,
            backup,
        }
    }

    fn user() -> UserProfile {
        UserProfile {
            id: "user-1".to_string(),
            name: None,
            email: None,
        }
    }

    fn letters(n: usize) -> Vec<Letter> {
        let now = Utc::now();
        (0..n)
            .map(|i| Letter {
                id: format!("letter-{}", i),
                user_id: "user-1".to_string(),
                title: format!("Letter {}", i),
                content: "A message across time.".to_string(),
                mood: Mood::Calm,
                created_at: now,
                updated_at: now,
                delivery_date: now + Duration::days(10),
                is_delivered: false,
                is_deleted: false,
                deleted_at: None,
                images: Vec::new(),
                featured_image: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_offline_queues_then_tick_pushes() {
        let f = fixture().await;
        let settings = PortableSettings::default();

        let first = f
            .engine
            .sync_data(&user(), &letters(1), &settings, SyncOptions::manual())
            .await;
        let second = f
            .engine
            .sync_data(&user(), &letters(2), &settings, SyncOptions::manual())
            .await;

        assert!(!first && !second);
        let status = f.engine.status().await;
        assert_eq!(status.pending_changes, 2);
        assert!(!status.is_online);
        assert_eq!(f.engine.pending_payload().await.unwrap().letters.len(), 2);
        assert_eq!(f.remote.pushes.load(Ordering::SeqCst), 0);

        f.probe.0.store(true, Ordering::SeqCst);
        assert!(f.engine.tick().await);

        let status = f.engine.status().await;
        assert_eq!(status.pending_changes, 0);
        assert!(status.last_sync_time.is_some());
        assert!(status.last_error.is_none());
        assert!(f.engine.pending_payload().await.is_none());
        assert_eq!(*f.remote.last_letters.lock().unwrap(), 2);

        let history = f.engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, SyncKind::Auto);
        assert!(history[0].success);
    }

    #[tokio::test]
    async fn test_online_push_takes_safety_snapshot_first() {
        let f = fixture().await;
        f.probe.0.store(true, Ordering::SeqCst);

        let ok = f
            .engine
            .sync_data(&user(), &letters(3), &PortableSettings::default(), SyncOptions::manual())
            .await;

        assert!(ok);
        let snapshot = f.backup.load_local_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.metadata.total_letters, 3);
    }

    #[tokio::test]
    async fn test_failed_push_keeps_pending_and_records_error() {
        let f = fixture().await;
        let settings = PortableSettings::default();

        f.engine
            .sync_data(&user(), &letters(1), &settings, SyncOptions::manual())
            .await;

        f.probe.0.store(true, Ordering::SeqCst);
        f.remote.fail.store(true, Ordering::SeqCst);

        assert!(!f.engine.tick().await);

        let status = f.engine.status().await;
        assert_eq!(status.pending_changes, 1);
        assert!(status.last_error.unwrap().contains("server said no"));
        assert!(!status.sync_in_progress);
        assert!(f.engine.pending_payload().await.is_some());

        let history = f.engine.history().await;
        assert!(!history[0].success);
        assert!(history[0].error.is_some());
    }

    #[tokio::test]
    async fn test_tick_without_pending_changes_does_nothing() {
        let f = fixture().await;
        f.probe.0.store(true, Ordering::SeqCst);

        assert!(!f.engine.tick().await);
        assert_eq!(f.remote.pushes.load(Ordering::SeqCst), 0);
        assert!(f.engine.status().await.is_online);
    }

    #[tokio::test]
    async fn test_in_progress_rejects_unless_forced() {
        let f = fixture().await;
        {
            let mut state = f.engine.state.lock().await;
            f.engine.ensure_loaded(&mut state).await;
            state.status.sync_in_progress = true;
        }

        let settings = PortableSettings::default();
        let rejected = f
            .engine
            .sync_data(&user(), &letters(1), &settings, SyncOptions::manual())
            .await;
        assert!(!rejected);
        assert_eq!(f.remote.pushes.load(Ordering::SeqCst), 0);

        let forced = f.engine.force_sync(&user(), &letters(1), &settings).await;
        assert!(forced);
        assert_eq!(f.remote.pushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forced_sync_pushes_while_offline() {
        let f = fixture().await;

        let ok = f
            .engine
            .force_sync(&user(), &letters(1), &PortableSettings::default())
            .await;

        assert!(ok);
        assert_eq!(f.engine.history().await[0].kind, SyncKind::Force);
    }

    #[tokio::test]
    async fn test_history_capped_oldest_evicted() {
        let f = fixture().await;
        f.probe.0.store(true, Ordering::SeqCst);
        let settings = PortableSettings::default();

        for _ in 0..MAX_SYNC_HISTORY + 5 {
            f.engine
                .sync_data(&user(), &[], &settings, SyncOptions::manual())
                .await;
        }

        assert_eq!(f.engine.history().await.len(), MAX_SYNC_HISTORY);

        f.engine.clear_history().await;
        assert!(f.engine.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_resets_interrupted_sync_flag() {
        let f = fixture().await;
        let stale = SyncStatus {
            sync_in_progress: true,
            pending_changes: 3,
            ..SyncStatus::default()
        };
        save_json(f.store.as_ref(), KEY_SYNC_STATUS, &stale)
            .await
            .unwrap();

        let status = f.engine.load().await.unwrap();

        assert!(!status.sync_in_progress);
        assert_eq!(status.pending_changes, 3);
    }

    #[tokio::test]
    async fn test_state_survives_engine_restart() {
        let f = fixture().await;
        f.engine
            .sync_data(&user(), &letters(2), &PortableSettings::default(), SyncOptions::manual())
            .await;

        let restarted = SyncEngine::new(
            f.remote.clone(),
            f.probe.clone(),
            f.store.clone(),
            f.backup.clone(),
            Arc::new(FixedClock::new(Utc::now())),
        );

        assert_eq!(restarted.status().await.pending_changes, 1);
        assert_eq!(restarted.pending_payload().await.unwrap().letters.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_sync_survives_zero_interval() {
        let f = fixture().await;

        let handle = f.engine.clone().start_auto_sync(std::time::Duration::ZERO);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(!handle.is_finished());
        handle.abort();
    }

    #[test]
    fn test_history_entry_uses_type_key() {
        let entry = SyncHistoryEntry {
            timestamp: Utc::now(),
            kind: SyncKind::Manual,
            success: true,
            error: None,
        };

        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["type"], "manual");
        assert!(json.get("error").is_none());
    }
}
