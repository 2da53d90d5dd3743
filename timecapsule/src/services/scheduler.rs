/// Scheduler Service
/// Takes automatic snapshots of all letters on a cron schedule
use crate::error::{AppError, Result};
use crate::services::backup::{BackupHandle, BackupOptions, BackupService};
use crate::services::letters::LettersService;
use crate::services::settings::SettingsService;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Auto-backup frequency options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFrequency {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl BackupFrequency {
    /// Convert frequency to cron expression
    pub fn to_cron(self) -> String {
        match self {
            BackupFrequency::Minutes(m) => {
                if m == 1 {
                    "0 * * * * *".to_string() // Every minute
                } else {
                    format!("0 */{} * * * *", m) // Every N minutes
                }
            }
            BackupFrequency::Hours(h) => {
                if h == 1 {
                    "0 0 * * * *".to_string() // Every hour
                } else {
                    format!("0 0 */{} * * *", h) // Every N hours
                }
            }
            BackupFrequency::Days(d) => {
                if d == 1 {
                    "0 0 2 * * *".to_string() // Daily at 2 AM
                } else {
                    format!("0 0 2 */{} * *", d) // Every N days at 2 AM
                }
            }
        }
    }
}

impl FromStr for BackupFrequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Support formats: "5m", "2h", "3d" or legacy "daily", "weekly", "monthly"
        let s = s.trim().to_lowercase();

        // Legacy format support
        match s.as_str() {
            "daily" => return Ok(BackupFrequency::Days(1)),
            "weekly" => return Ok(BackupFrequency::Days(7)),
            "monthly" => return Ok(BackupFrequency::Days(30)),
            _ => {}
        }

        // New format: <number><unit>
        if s.is_empty() {
            return Err("Empty frequency string".to_string());
        }

        let Some(unit) = s.chars().last() else {
            return Err("Empty frequency string".to_string());
        };
        let number_part = &s[..s.len() - unit.len_utf8()];

        let value: u32 = number_part
            .parse()
            .map_err(|_| format!("Invalid number in frequency: {}", s))?;

        if value == 0 {
            return Err("Frequency value must be greater than 0".to_string());
        }

        match unit {
            'm' => Ok(BackupFrequency::Minutes(value)),
            'h' => Ok(BackupFrequency::Hours(value)),
            'd' => Ok(BackupFrequency::Days(value)),
            _ => Err(format!(
                "Invalid frequency unit '{}'. Use 'm' (minutes), 'h' (hours), or 'd' (days)",
                unit
            )),
        }
    }
}

/// Everything a scheduled snapshot reads from
#[derive(Clone)]
pub struct SnapshotSources {
    pub letters: LettersService,
    pub settings: SettingsService,
    pub backup: BackupService,
}

impl SnapshotSources {
    /// Snapshot every letter, trash included, with the current settings
    pub async fn take_snapshot(&self) -> Result<BackupHandle> {
        let settings = self.settings.load().await?;
        let letters = self.letters.list_all_letters().await?;

        let options = BackupOptions {
            include_images: settings.auto_backup.include_images,
            include_settings: true,
            compress: settings.auto_backup.compress,
        };

        self.backup
            .create_snapshot(&settings.user, &letters, &settings.portable, options)
            .await
    }
}

/// Scheduler service for automatic backups
pub struct BackupScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    sources: Arc<SnapshotSources>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl BackupScheduler {
    /// Create new scheduler service
    pub async fn new(sources: SnapshotSources) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Backup(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            sources: Arc::new(sources),
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Backup(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("Backup scheduler started");
        Ok(())
    }

    /// Schedule automatic backup, replacing any existing schedule
    pub async fn schedule_backup(&self, frequency: BackupFrequency, enabled: bool) -> Result<()> {
        self.cancel_backup().await?;

        if !enabled {
            tracing::info!("Automatic backups disabled");
            return Ok(());
        }

        let cron_expr = frequency.to_cron();
        let sources = Arc::clone(&self.sources);

        let job = Job::new_async(cron_expr.clone(), move |_uuid, _l| {
            let sources = Arc::clone(&sources);
            Box::pin(async move {
                tracing::info!("Running scheduled automatic backup");

                match sources.take_snapshot().await {
                    Ok(handle) => {
                        tracing::info!("Automatic backup created: {}", handle_label(&handle))
                    }
                    Err(e) => tracing::error!("Automatic backup failed: {}", e),
                }
            })
        })
        .map_err(|e| AppError::Backup(format!("Failed to create backup job: {}", e)))?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Backup(format!("Failed to schedule job: {}", e)))?;

        *self.current_job_id.write().await = Some(job_id);

        tracing::info!(
            "Automatic backup scheduled: {:?} ({})",
            frequency,
            cron_expr
        );
        Ok(())
    }

    /// Apply the persisted auto-backup settings
    pub async fn apply_settings(&self) -> Result<()> {
        let auto_backup = self.sources.settings.get_auto_backup().await?;
        let frequency = auto_backup
            .frequency
            .parse::<BackupFrequency>()
            .map_err(AppError::Validation)?;
        self.schedule_backup(frequency, auto_backup.enabled).await
    }

    pub async fn is_scheduled(&self) -> bool {
        self.current_job_id.read().await.is_some()
    }

    /// Cancel scheduled backup
    pub async fn cancel_backup(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;

        if let Some(job_id) = *current_job {
            let scheduler = self.scheduler.write().await;
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Backup(format!("Failed to remove job: {}", e)))?;

            *current_job = None;
            tracing::info!("Automatic backup schedule cancelled");
        }

        Ok(())
    }

    /// Shutdown scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Backup(format!("Failed to shutdown scheduler: {}", e)))?;
        tracing::info!("Backup scheduler shutdown");
        Ok(())
    }
}

fn handle_label(handle: &BackupHandle) -> String {
    match handle {
        BackupHandle::Stored(path) => path.display().to_string(),
        BackupHandle::Inline(json) => format!("inline ({} bytes)", json.len()),
    }
}
