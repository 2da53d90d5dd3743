//! Settings service
//!
//! Manages application settings persistence using JSON file storage.
//! Only [`PortableSettings`] travel inside backups; the rest configures
//! this installation.

use crate::config::{DEFAULT_BACKUP_RETENTION, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SYNC_INTERVAL_SECS};
use crate::error::{AppError, Result};
use crate::services::scheduler::BackupFrequency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

/// The portable settings bundle carried by backups and sync pushes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableSettings {
    #[serde(default)]
    pub is_onboarding_completed: bool,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_true")]
    pub notifications: bool,
    #[serde(default)]
    pub biometric_auth: bool,
    #[serde(default = "default_true")]
    pub auto_save: bool,
}

fn default_theme() -> String {
    "system".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for PortableSettings {
    fn default() -> Self {
        Self {
            is_onboarding_completed: false,
            theme: default_theme(),
            language: default_language(),
            notifications: true,
            biometric_auth: false,
            auto_save: true,
        }
    }
}

/// Owner of this installation's letters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            email: None,
        }
    }
}

/// Remote sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Letter API base URL; sync stays offline when unset
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            auth_token: None,
            interval_secs: default_sync_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Auto-backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoBackupSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_frequency")]
    pub frequency: String, // "30m", "12h", "7d", "daily", "weekly", "monthly"
    #[serde(default = "default_backup_retention")]
    pub retention_count: usize,
    /// Custom backup location (if None, uses default data_dir/backups)
    #[serde(default)]
    pub backup_location: Option<String>,
    #[serde(default = "default_true")]
    pub include_images: bool,
    #[serde(default)]
    pub compress: bool,
}

fn default_backup_frequency() -> String {
    "daily".to_string()
}

fn default_backup_retention() -> usize {
    DEFAULT_BACKUP_RETENTION
}

impl Default for AutoBackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: default_backup_frequency(),
            retention_count: default_backup_retention(),
            backup_location: None,
            include_images: true,
            compress: false,
        }
    }
}

/// Daily "write a letter" nudge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReminderSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_daily_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

fn default_daily_hour() -> u32 {
    20
}

impl Default for DailyReminderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hour: default_daily_hour(),
            minute: 0,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub user: UserProfile,
    #[serde(default)]
    pub portable: PortableSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub auto_backup: AutoBackupSettings,
    #[serde(default)]
    pub daily_reminder: DailyReminderSettings,
}

/// Service for managing application settings
#[derive(Clone)]
pub struct SettingsService {
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join("settings.json"),
        }
    }

    /// Load settings from disk or create default if not exists
    pub async fn load(&self) -> Result<AppSettings> {
        if !self.settings_path.exists() {
            tracing::info!("Settings file not found, creating default settings");
            let default = AppSettings::default();
            self.save(&default).await?;
            return Ok(default);
        }

        let content = fs::read_to_string(&self.settings_path).await?;
        let raw: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| AppError::Generic(format!("Failed to parse settings: {}", e)))?;
        let has_user = raw.get("user").is_some();
        let mut settings: AppSettings = serde_json::from_value(raw)
            .map_err(|e| AppError::Generic(format!("Failed to parse settings: {}", e)))?;

        // A minted user id must be written back or it changes on every load
        let mut dirty = !has_user;
        if !has_user {
            tracing::info!("No user profile in settings, created {}", settings.user.id);
        }
        if settings.sync.interval_secs == 0 {
            tracing::warn!("Sync interval of 0 is invalid, using the default");
            settings.sync.interval_secs = default_sync_interval();
            dirty = true;
        }
        if settings.sync.request_timeout_secs == 0 {
            tracing::warn!("Request timeout of 0 is invalid, using the default");
            settings.sync.request_timeout_secs = default_request_timeout();
            dirty = true;
        }

        if dirty {
            self.save(&settings).await?;
        }

        Ok(settings)
    }

    /// Save settings to disk
    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| AppError::Generic(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.settings_path, content).await?;
        tracing::info!("Settings saved to {:?}", self.settings_path);

        Ok(())
    }

    pub async fn get_user(&self) -> Result<UserProfile> {
        Ok(self.load().await?.user)
    }

    pub async fn get_portable(&self) -> Result<PortableSettings> {
        Ok(self.load().await?.portable)
    }

    pub async fn update_portable(&self, portable: PortableSettings) -> Result<()> {
        let mut settings = self.load().await?;
        settings.portable = portable;
        self.save(&settings).await
    }

    pub async fn get_sync(&self) -> Result<SyncSettings> {
        Ok(self.load().await?.sync)
    }

    pub async fn update_sync(&self, sync: SyncSettings) -> Result<()> {
        if sync.interval_secs == 0 || sync.request_timeout_secs == 0 {
            return Err(AppError::Validation(
                "Sync interval and request timeout must be greater than 0".to_string(),
            ));
        }
        let mut settings = self.load().await?;
        settings.sync = sync;
        self.save(&settings).await
    }

    pub async fn get_auto_backup(&self) -> Result<AutoBackupSettings> {
        Ok(self.load().await?.auto_backup)
    }

    pub async fn update_auto_backup(&self, auto_backup: AutoBackupSettings) -> Result<()> {
        auto_backup
            .frequency
            .parse::<BackupFrequency>()
            .map_err(AppError::Validation)?;
        if auto_backup.retention_count == 0 {
            return Err(AppError::Validation(
                "Backup retention must keep at least one file".to_string(),
            ));
        }
        let mut settings = self.load().await?;
        settings.auto_backup = auto_backup;
        self.save(&settings).await
    }

    pub async fn get_daily_reminder(&self) -> Result<DailyReminderSettings> {
        Ok(self.load().await?.daily_reminder)
    }

    pub async fn update_daily_reminder(&self, daily: DailyReminderSettings) -> Result<()> {
        if daily.hour > 23 || daily.minute > 59 {
            return Err(AppError::Validation(format!(
                "Invalid daily reminder time {:02}:{:02}",
                daily.hour, daily.minute
            )));
        }
        let mut settings = self.load().await?;
        settings.daily_reminder = daily;
        self.save(&settings).await
    }
}
