//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::clock::{Clock, SystemClock};
use crate::config::DELIVERY_SWEEP_INTERVAL_SECS;
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::platform::LocalNotifier;
use crate::remote::{ConnectivityProbe, HttpLetterApi, ImageStore, OfflineRemote, RemoteConfig, SyncRemote};
use crate::services::{
    BackupHandle, BackupScheduler, BackupService, LettersService, NotificationScheduler,
    RestoreOutcome, SettingsService, SnapshotSources, SyncEngine, SyncOptions,
};
use crate::storage::{KeyValueStore, SqliteKvStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "TIMECAPSULE_DATA_DIR";

/// Data directory from the environment, falling back to `./data`
pub fn data_dir_from_env() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: SettingsService,
    pub letters: LettersService,
    pub notifier: LocalNotifier,
    pub notifications: NotificationScheduler,
    pub backup: BackupService,
    pub sync: SyncEngine,
    pub backup_scheduler: Arc<BackupScheduler>,
}

/// Handles of the background loops started by [`AppState::start_background`]
pub struct BackgroundTasks {
    sweep: JoinHandle<()>,
    auto_sync: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn abort(self) {
        self.sweep.abort();
        self.auto_sync.abort();
    }
}

impl AppState {
    pub async fn build(data_dir: PathBuf) -> Result<Self> {
        Self::build_with_clock(data_dir, Arc::new(SystemClock)).await
    }

    /// Wire every service together. Nothing here is a global.
    pub async fn build_with_clock(data_dir: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        tracing::info!("Initializing application in {:?}", data_dir);

        std::fs::create_dir_all(&data_dir)?;

        let settings = SettingsService::new(data_dir.clone());
        let app_settings = settings.load().await?;

        let pool = create_pool(&data_dir.join("db.sqlite")).await?;
        let repo = Repository::new(pool);
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::new(repo.clone()));

        let notifier = LocalNotifier::new(app_settings.portable.notifications);
        let notifications =
            NotificationScheduler::new(Arc::new(notifier.clone()), store.clone(), clock.clone());

        let (sync_remote, probe, image_store): (
            Arc<dyn SyncRemote>,
            Arc<dyn ConnectivityProbe>,
            Option<Arc<dyn ImageStore>>,
        ) = match &app_settings.sync.api_base_url {
            Some(base_url) => {
                let mut config = RemoteConfig::new(base_url.clone())
                    .with_timeout(Duration::from_secs(app_settings.sync.request_timeout_secs));
                if let Some(token) = &app_settings.sync.auth_token {
                    config = config.with_auth_token(token.clone());
                }
                let api = Arc::new(HttpLetterApi::new(config)?);
                tracing::info!("Letter API configured at {}", base_url);
                let image_store: Arc<dyn ImageStore> = api.clone();
                (
                    api.clone() as Arc<dyn SyncRemote>,
                    api as Arc<dyn ConnectivityProbe>,
                    Some(image_store),
                )
            }
            None => {
                tracing::info!("No Letter API configured, running offline");
                (
                    Arc::new(OfflineRemote) as Arc<dyn SyncRemote>,
                    Arc::new(OfflineRemote) as Arc<dyn ConnectivityProbe>,
                    None,
                )
            }
        };

        let mut letters = LettersService::new(repo.clone(), clock.clone())
            .with_observer(Arc::new(notifications.clone()));
        if let Some(image_store) = image_store {
            letters = letters.with_image_store(image_store);
        }

        let backups_dir = app_settings
            .auto_backup
            .backup_location
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("backups"));
        let backup = BackupService::new(repo, store.clone(), clock.clone())
            .with_backups_dir(backups_dir)
            .with_retention(app_settings.auto_backup.retention_count);

        let sync = SyncEngine::new(sync_remote, probe, store, backup.clone(), clock);
        sync.load().await?;

        let backup_scheduler = BackupScheduler::new(SnapshotSources {
            letters: letters.clone(),
            settings: settings.clone(),
            backup: backup.clone(),
        })
        .await?;

        tracing::info!("Application initialized successfully");

        Ok(Self {
            data_dir,
            settings,
            letters,
            notifier,
            notifications,
            backup,
            sync,
            backup_scheduler: Arc::new(backup_scheduler),
        })
    }

    /// Startup work: repair the trigger registry, deliver anything that
    /// came due while the process was down, re-arm the triggers of letters
    /// still sealed and arm the daily reminder.
    pub async fn prepare(&self) -> Result<()> {
        if let Err(e) = self.notifications.reconcile().await {
            tracing::warn!("Failed to reconcile notifications: {}", e);
        }

        let delivered = self.letters.deliver_due().await?;
        if !delivered.is_empty() {
            tracing::info!("{} letters delivered while offline", delivered.len());
        }

        let sealed = self.letters.list_letters().await?;
        self.notifications.rearm_letters(&sealed).await;

        self.apply_daily_reminder().await
    }

    /// Arm or disarm the daily reminder from settings
    pub async fn apply_daily_reminder(&self) -> Result<()> {
        let daily = self.settings.get_daily_reminder().await?;

        if daily.enabled {
            self.notifications
                .schedule_daily_reminder(daily.hour, daily.minute)
                .await?;
        } else {
            self.notifications.cancel_daily_reminder().await;
        }
        Ok(())
    }

    /// Push the current full state to the remote
    pub async fn sync_now(&self, options: SyncOptions) -> Result<bool> {
        let settings = self.settings.load().await?;
        let letters = self.letters.list_all_letters().await?;

        Ok(self
            .sync
            .sync_data(&settings.user, &letters, &settings.portable, options)
            .await)
    }

    /// Restore a snapshot into the letter store and settings file
    pub async fn restore_from(&self, handle: &BackupHandle) -> Result<RestoreOutcome> {
        let snapshot = self.backup.read_snapshot(handle).await?;
        let outcome = self.backup.restore_snapshot(&snapshot)?;

        self.letters.import_letters(outcome.letters.clone()).await?;
        if let Some(portable) = &outcome.settings {
            self.settings.update_portable(portable.clone()).await?;
        }

        Ok(outcome)
    }

    /// Start the delivery sweep, auto sync and backup schedule
    pub async fn start_background(&self) -> Result<BackgroundTasks> {
        let sync_settings = self.settings.get_sync().await?;

        let sweep = self
            .letters
            .clone()
            .start_delivery_sweep(Duration::from_secs(DELIVERY_SWEEP_INTERVAL_SECS));
        let auto_sync = self
            .sync
            .clone()
            .start_auto_sync(Duration::from_secs(sync_settings.interval_secs));

        self.backup_scheduler.start().await?;
        if let Err(e) = self.backup_scheduler.apply_settings().await {
            tracing::error!("Failed to schedule automatic backups: {}", e);
        }

        Ok(BackgroundTasks { sweep, auto_sync })
    }

    pub async fn shutdown(&self, tasks: BackgroundTasks) -> Result<()> {
        tasks.abort();
        self.backup_scheduler.shutdown().await
    }
}
