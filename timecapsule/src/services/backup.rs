//! Backup service
//!
//! Builds versioned snapshots of the user's letters and portable settings.
//! Stored snapshots are plain JSON files, or ZIP files carrying the snapshot
//! and a manifest with SHA-256 checksums. Restores are validated
//! structurally before anything reaches the letter store.

use crate::clock::Clock;
use crate::config::{BACKUP_VERSION, DEFAULT_BACKUP_RETENTION, KEY_LOCAL_BACKUP};
use crate::database::{Backup, Letter, Repository};
use crate::error::{AppError, Result};
use crate::services::settings::{PortableSettings, UserProfile};
use crate::storage::{load_json, save_json, KeyValueStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

const SNAPSHOT_ENTRY: &str = "snapshot.json";
const MANIFEST_ENTRY: &str = "manifest.json";

/// Fields a letter must carry to survive a restore
const REQUIRED_LETTER_FIELDS: [&str; 4] = ["id", "title", "content", "userId"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub device_info: String,
    pub app_version: String,
    pub total_letters: usize,
}

/// A full, versioned snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub user: UserProfile,
    pub letters: Vec<Letter>,
    /// `None` when the snapshot was taken without settings
    #[serde(default)]
    pub settings: Option<PortableSettings>,
    pub metadata: BackupMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupOptions {
    pub include_images: bool,
    pub include_settings: bool,
    pub compress: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            include_settings: true,
            compress: false,
        }
    }
}

/// Where a snapshot ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupHandle {
    Stored(PathBuf),
    Inline(String),
}

/// Letters and settings recovered from a snapshot
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub user: UserProfile,
    pub timestamp: Option<DateTime<Utc>>,
    pub letters: Vec<Letter>,
    pub settings: Option<PortableSettings>,
    /// Letters skipped because they were incomplete or malformed
    pub dropped: usize,
}

impl RestoreOutcome {
    pub fn is_lossless(&self) -> bool {
        self.dropped == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

/// Backup manifest structure
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: String,
    pub timestamp: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

/// Backup service
#[derive(Clone)]
pub struct BackupService {
    repo: Repository,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    backups_dir: Option<PathBuf>,
    retention_count: usize,
}

impl BackupService {
    /// Without a backup directory every snapshot is returned inline
    pub fn new(repo: Repository, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            store,
            clock,
            backups_dir: None,
            retention_count: DEFAULT_BACKUP_RETENTION,
        }
    }

    pub fn with_backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = Some(dir.into());
        self
    }

    pub fn with_retention(mut self, retention_count: usize) -> Self {
        self.retention_count = retention_count.max(1);
        self
    }

    /// Assemble a snapshot in memory.
    ///
    /// `metadata.total_letters` counts the letters handed in, whatever the
    /// options strip from them afterwards.
    pub fn build_snapshot(
        &self,
        user: &UserProfile,
        letters: &[Letter],
        settings: &PortableSettings,
        options: BackupOptions,
    ) -> BackupSnapshot {
        let total_letters = letters.len();

        let letters = letters
            .iter()
            .cloned()
            .map(|mut letter| {
                if !options.include_images {
                    letter.images.clear();
                    letter.featured_image = None;
                }
                letter
            })
            .collect();

        BackupSnapshot {
            version: BACKUP_VERSION.to_string(),
            timestamp: self.clock.now(),
            user: user.clone(),
            letters,
            settings: options.include_settings.then(|| settings.clone()),
            metadata: BackupMetadata {
                device_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
                app_version: env!("CARGO_PKG_VERSION").to_string(),
                total_letters,
            },
        }
    }

    /// Create a snapshot and store it in the backup directory if one is set
    pub async fn create_snapshot(
        &self,
        user: &UserProfile,
        letters: &[Letter],
        settings: &PortableSettings,
        options: BackupOptions,
    ) -> Result<BackupHandle> {
        let snapshot = self.build_snapshot(user, letters, settings, options);
        let json = serde_json::to_string_pretty(&snapshot)?;

        let Some(backups_dir) = &self.backups_dir else {
            tracing::debug!("No backup directory configured, returning snapshot inline");
            return Ok(BackupHandle::Inline(json));
        };

        fs::create_dir_all(backups_dir).await?;

        let stamp = snapshot.timestamp.format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        let extension = if options.compress { "zip" } else { "json" };
        let backup_path =
            backups_dir.join(format!("backup_{}_{}.{}", stamp, &suffix[..8], extension));

        let data = if options.compress {
            package_zip(&json, &snapshot.timestamp)?
        } else {
            json.into_bytes()
        };
        let checksum = calculate_checksum(&data);

        fs::write(&backup_path, &data).await?;

        self.repo
            .record_backup(
                backup_path.to_string_lossy().as_ref(),
                data.len() as i64,
                &checksum,
            )
            .await?;

        tracing::info!(
            "Backup created: {:?} ({} letters, {} bytes)",
            backup_path,
            snapshot.metadata.total_letters,
            data.len()
        );

        self.apply_retention_policy().await?;

        Ok(BackupHandle::Stored(backup_path))
    }

    /// Load a snapshot handle back into raw JSON for validation or restore
    pub async fn read_snapshot(&self, handle: &BackupHandle) -> Result<Value> {
        match handle {
            BackupHandle::Inline(json) => serde_json::from_str(json)
                .map_err(|e| AppError::InvalidBackup(format!("Snapshot is not valid JSON: {}", e))),
            BackupHandle::Stored(path) => {
                let data = fs::read(path).await?;
                let is_zip = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));

                let json = if is_zip {
                    unpack_zip(data)?
                } else {
                    String::from_utf8(data).map_err(|_| {
                        AppError::InvalidBackup("Snapshot file is not UTF-8".to_string())
                    })?
                };

                serde_json::from_str(&json).map_err(|e| {
                    AppError::InvalidBackup(format!("Snapshot is not valid JSON: {}", e))
                })
            }
        }
    }

    /// Recover letters and settings from a snapshot.
    ///
    /// Rejects any version other than the current one. Letters missing a
    /// required field are dropped and counted rather than failing the restore.
    pub fn restore_snapshot(&self, snapshot: &Value) -> Result<RestoreOutcome> {
        let found = snapshot.get("version").and_then(Value::as_str);
        if found != Some(BACKUP_VERSION) {
            return Err(AppError::IncompatibleVersion {
                found: found.unwrap_or("none").to_string(),
                expected: BACKUP_VERSION.to_string(),
            });
        }

        let user = snapshot
            .get("user")
            .filter(|u| u.is_object())
            .ok_or_else(|| AppError::InvalidBackup("Missing user".to_string()))?;
        let user: UserProfile = serde_json::from_value(user.clone())
            .map_err(|e| AppError::InvalidBackup(format!("Malformed user: {}", e)))?;

        let raw_letters = snapshot
            .get("letters")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::InvalidBackup("Missing letters array".to_string()))?;

        let mut letters = Vec::with_capacity(raw_letters.len());
        let mut dropped = 0;

        for (index, raw) in raw_letters.iter().enumerate() {
            let missing = missing_letter_fields(raw);
            if !missing.is_empty() {
                tracing::warn!("Dropping letter {}: missing {}", index, missing.join(", "));
                dropped += 1;
                continue;
            }

            match serde_json::from_value::<Letter>(raw.clone()) {
                Ok(letter) => letters.push(letter),
                Err(e) => {
                    tracing::warn!("Dropping letter {}: {}", index, e);
                    dropped += 1;
                }
            }
        }

        let settings = match snapshot.get("settings") {
            Some(value) if !is_empty_settings(value) => {
                match serde_json::from_value::<PortableSettings>(value.clone()) {
                    Ok(settings) => Some(settings),
                    Err(e) => {
                        tracing::warn!("Ignoring malformed settings in snapshot: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let timestamp = snapshot
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        if dropped > 0 {
            tracing::warn!("Restore dropped {} incomplete letters", dropped);
        }
        tracing::info!("Restored {} letters from snapshot", letters.len());

        Ok(RestoreOutcome {
            user,
            timestamp,
            letters,
            settings,
            dropped,
        })
    }

    /// Report every structural problem without failing
    pub fn validate_integrity(&self, snapshot: &Value) -> IntegrityReport {
        let mut issues = Vec::new();

        match snapshot.get("version").and_then(Value::as_str) {
            None => issues.push("Missing version".to_string()),
            Some(version) if version != BACKUP_VERSION => issues.push(format!(
                "Version mismatch: found {}, expected {}",
                version, BACKUP_VERSION
            )),
            Some(_) => {}
        }

        if !snapshot.get("user").is_some_and(Value::is_object) {
            issues.push("Missing user".to_string());
        }

        match snapshot.get("letters").and_then(Value::as_array) {
            Some(letters) => {
                for (index, letter) in letters.iter().enumerate() {
                    for field in missing_letter_fields(letter) {
                        issues.push(format!("Letter {}: missing {}", index, field));
                    }
                }
            }
            None => issues.push("Missing letters array".to_string()),
        }

        match snapshot.get("metadata") {
            Some(metadata) if metadata.is_object() => {
                if metadata.get("totalLetters").and_then(Value::as_u64).is_none() {
                    issues.push("Missing metadata.totalLetters".to_string());
                }
            }
            _ => issues.push("Missing metadata".to_string()),
        }

        IntegrityReport {
            is_valid: issues.is_empty(),
            issues,
        }
    }

    /// Keep the latest safety snapshot in the key-value store
    pub async fn save_local_snapshot(
        &self,
        user: &UserProfile,
        letters: &[Letter],
        settings: &PortableSettings,
    ) -> Result<()> {
        let snapshot = self.build_snapshot(user, letters, settings, BackupOptions::default());
        save_json(self.store.as_ref(), KEY_LOCAL_BACKUP, &snapshot).await?;
        tracing::debug!("Saved local snapshot ({} letters)", letters.len());
        Ok(())
    }

    pub async fn load_local_snapshot(&self) -> Result<Option<BackupSnapshot>> {
        load_json(self.store.as_ref(), KEY_LOCAL_BACKUP).await
    }

    /// List recorded backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<Backup>> {
        self.repo.list_backups().await
    }

    /// Keep only the newest N stored snapshot files
    async fn apply_retention_policy(&self) -> Result<()> {
        let mut backups = self.repo.list_backups().await?;

        if backups.len() <= self.retention_count {
            return Ok(());
        }

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        for backup in backups.iter().skip(self.retention_count) {
            if !Path::new(&backup.path).exists() {
                continue;
            }

            tracing::info!("Deleting old backup: {}", backup.path);
            if let Err(e) = fs::remove_file(&backup.path).await {
                tracing::warn!("Failed to delete backup file {}: {}", backup.path, e);
            }
            // The database record stays as history
        }

        Ok(())
    }
}

/// Required fields that are absent, null or empty
fn missing_letter_fields(letter: &Value) -> Vec<&'static str> {
    REQUIRED_LETTER_FIELDS
        .iter()
        .copied()
        .filter(|field| match letter.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .collect()
}

fn is_empty_settings(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn package_zip(json: &str, timestamp: &DateTime<Utc>) -> Result<Vec<u8>> {
    let manifest = BackupManifest {
        version: BACKUP_VERSION.to_string(),
        timestamp: timestamp.to_rfc3339(),
        files: vec![FileEntry {
            path: SNAPSHOT_ENTRY.to_string(),
            size: json.len() as u64,
            checksum: calculate_checksum(json.as_bytes()),
        }],
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file(SNAPSHOT_ENTRY, options)?;
    zip.write_all(json.as_bytes())?;

    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(manifest_json.as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

fn unpack_zip(data: Vec<u8>) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let manifest: BackupManifest = {
        let mut file = archive.by_name(MANIFEST_ENTRY)?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::InvalidBackup(format!("Malformed manifest: {}", e)))?
    };

    let entry = manifest
        .files
        .iter()
        .find(|f| f.path == SNAPSHOT_ENTRY)
        .ok_or_else(|| AppError::InvalidBackup("Manifest does not list the snapshot".to_string()))?;

    let mut json = String::new();
    archive.by_name(SNAPSHOT_ENTRY)?.read_to_string(&mut json)?;

    let actual = calculate_checksum(json.as_bytes());
    if actual != entry.checksum {
        return Err(AppError::InvalidBackup(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            entry.path, entry.checksum, actual
        )));
    }

    Ok(json)
}

fn calculate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::database::{initialize_database, LetterImage, Mood};
    use crate::storage::MemoryKvStore;
    use chrono::Duration;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn create_test_service() -> BackupService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        initialize_database(&pool).await.unwrap();

        BackupService::new(
            Repository::new(pool),
            Arc::new(MemoryKvStore::new()),
            Arc::new(FixedClock::new(Utc::now())),
        )
    }

    fn user() -> UserProfile {
        UserProfile {
            id: "user-1".to_string(),
            name: Some("Ada".to_string()),
            email: None,
        }
    }

    fn letter(id: &str) -> Letter {
        let now = Utc::now();
        let image = LetterImage {
            url: format!("https://img.example/{}", id),
            storage_id: format!("img-{}", id),
            caption: None,
        };
        Letter {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            title: format!("Letter {}", id),
            content: "Dear future me, hello there.".to_string(),
            mood: Mood::Grateful,
            created_at: now,
            updated_at: now,
            delivery_date: now + Duration::days(30),
            is_delivered: false,
            is_deleted: false,
            deleted_at: None,
            images: vec![image.clone()],
            featured_image: Some(image),
        }
    }

    #[tokio::test]
    async fn test_total_letters_counted_before_stripping() {
        let service = create_test_service().await;
        let letters = vec![letter("a"), letter("b")];

        let snapshot = service.build_snapshot(
            &user(),
            &letters,
            &PortableSettings::default(),
            BackupOptions {
                include_images: false,
                include_settings: false,
                compress: false,
            },
        );

        assert_eq!(snapshot.metadata.total_letters, 2);
        assert_eq!(snapshot.version, BACKUP_VERSION);
        assert!(snapshot.settings.is_none());
        assert!(snapshot.letters.iter().all(|l| l.images.is_empty()));
        assert!(snapshot.letters.iter().all(|l| l.featured_image.is_none()));
    }

    #[tokio::test]
    async fn test_inline_snapshot_restores() {
        let service = create_test_service().await;
        let letters = vec![letter("a")];

        let handle = service
            .create_snapshot(&user(), &letters, &PortableSettings::default(), BackupOptions::default())
            .await
            .unwrap();
        assert!(matches!(handle, BackupHandle::Inline(_)));

        let value = service.read_snapshot(&handle).await.unwrap();
        let outcome = service.restore_snapshot(&value).unwrap();

        assert_eq!(outcome.letters, letters);
        assert_eq!(outcome.user, user());
        assert_eq!(outcome.settings, Some(PortableSettings::default()));
        assert!(outcome.is_lossless());
    }

    #[tokio::test]
    async fn test_stored_snapshot_is_recorded() {
        let temp = TempDir::new().unwrap();
        let service = create_test_service().await.with_backups_dir(temp.path());

        let handle = service
            .create_snapshot(&user(), &[letter("a")], &PortableSettings::default(), BackupOptions::default())
            .await
            .unwrap();

        let BackupHandle::Stored(path) = handle else {
            panic!("expected a stored snapshot");
        };
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".json"));

        let backups = service.list_backups().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].path, path.to_string_lossy());
    }

    #[tokio::test]
    async fn test_compressed_snapshot_round_trips_through_zip() {
        let temp = TempDir::new().unwrap();
        let service = create_test_service().await.with_backups_dir(temp.path());

        let handle = service
            .create_snapshot(
                &user(),
                &[letter("a"), letter("b")],
                &PortableSettings::default(),
                BackupOptions {
                    compress: true,
                    ..BackupOptions::default()
                },
            )
            .await
            .unwrap();

        let BackupHandle::Stored(path) = &handle else {
            panic!("expected a stored snapshot");
        };
        assert!(path.to_string_lossy().ends_with(".zip"));

        let value = service.read_snapshot(&handle).await.unwrap();
        let outcome = service.restore_snapshot(&value).unwrap();
        assert_eq!(outcome.letters.len(), 2);
    }

    #[tokio::test]
    async fn test_tampered_zip_rejected() {
        let temp = TempDir::new().unwrap();
        let service = create_test_service().await;

        let json = serde_json::to_string(&json!({"version": BACKUP_VERSION})).unwrap();
        let manifest = BackupManifest {
            version: BACKUP_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            files: vec![FileEntry {
                path: SNAPSHOT_ENTRY.to_string(),
                size: 0,
                checksum: "not-a-checksum".to_string(),
            }],
        };

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default();
        zip.start_file(SNAPSHOT_ENTRY, options).unwrap();
        zip.write_all(json.as_bytes()).unwrap();
        zip.start_file(MANIFEST_ENTRY, options).unwrap();
        zip.write_all(serde_json::to_string(&manifest).unwrap().as_bytes())
            .unwrap();
        let data = zip.finish().unwrap().into_inner();

        let path = temp.path().join("tampered.zip");
        std::fs::write(&path, data).unwrap();

        let result = service.read_snapshot(&BackupHandle::Stored(path)).await;
        assert!(matches!(result, Err(AppError::InvalidBackup(_))));
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_files() {
        let temp = TempDir::new().unwrap();
        let service = create_test_service()
            .await
            .with_backups_dir(temp.path())
            .with_retention(2);

        let mut paths = Vec::new();
        for _ in 0..4 {
            if let BackupHandle::Stored(path) = service
                .create_snapshot(&user(), &[], &PortableSettings::default(), BackupOptions::default())
                .await
                .unwrap()
            {
                paths.push(path);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let remaining = paths.iter().filter(|p| p.exists()).count();
        assert_eq!(remaining, 2);
        assert!(paths[3].exists());
        assert!(!paths[0].exists());
    }

    #[tokio::test]
    async fn test_any_other_version_rejected() {
        let service = create_test_service().await;

        for version in [json!("0.9.0"), json!("2.0.0"), json!(null)] {
            let snapshot = json!({
                "version": version,
                "user": {"id": "user-1"},
                "letters": [],
            });

            let result = service.restore_snapshot(&snapshot);
            assert!(matches!(result, Err(AppError::IncompatibleVersion { .. })));
        }
    }

    #[tokio::test]
    async fn test_missing_user_or_letters_is_invalid() {
        let service = create_test_service().await;

        let no_user = json!({"version": BACKUP_VERSION, "letters": []});
        assert!(matches!(
            service.restore_snapshot(&no_user),
            Err(AppError::InvalidBackup(_))
        ));

        let no_letters = json!({"version": BACKUP_VERSION, "user": {"id": "u"}});
        assert!(matches!(
            service.restore_snapshot(&no_letters),
            Err(AppError::InvalidBackup(_))
        ));
    }

    #[tokio::test]
    async fn test_incomplete_letters_dropped_and_counted() {
        let service = create_test_service().await;
        let complete = serde_json::to_value(letter("a")).unwrap();
        let mut no_title = serde_json::to_value(letter("b")).unwrap();
        no_title.as_object_mut().unwrap().remove("title");

        let snapshot = json!({
            "version": BACKUP_VERSION,
            "user": {"id": "user-1"},
            "letters": [complete, no_title, {"id": "c"}],
        });

        let outcome = service.restore_snapshot(&snapshot).unwrap();

        assert_eq!(outcome.letters.len(), 1);
        assert_eq!(outcome.letters[0].id, "a");
        assert_eq!(outcome.dropped, 2);
        assert!(outcome.settings.is_none());
    }

    #[tokio::test]
    async fn test_integrity_reports_one_issue_per_missing_field() {
        let service = create_test_service().await;
        let snapshot = json!({
            "version": BACKUP_VERSION,
            "user": {"id": "user-1"},
            "letters": [
                {"id": "a", "title": "t", "content": "c", "userId": "u"},
                {"id": "b"},
                {"title": "t", "content": "", "userId": "u"},
            ],
            "metadata": {"totalLetters": 3},
        });

        let report = service.validate_integrity(&snapshot);

        assert!(!report.is_valid);
        assert_eq!(report.issues.len(), 5);
        assert!(report.issues.contains(&"Letter 1: missing userId".to_string()));
        assert!(report.issues.contains(&"Letter 2: missing id".to_string()));
        assert!(report.issues.contains(&"Letter 2: missing content".to_string()));
    }

    #[tokio::test]
    async fn test_integrity_flags_version_and_metadata() {
        let service = create_test_service().await;
        let snapshot = json!({
            "version": "0.1.0",
            "user": {"id": "user-1"},
            "letters": [],
        });

        let report = service.validate_integrity(&snapshot);

        assert_eq!(report.issues.len(), 2);
        assert!(report.issues[0].starts_with("Version mismatch"));
        assert_eq!(report.issues[1], "Missing metadata");
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_valid() {
        let service = create_test_service().await;
        let snapshot = service.build_snapshot(
            &user(),
            &[letter("a")],
            &PortableSettings::default(),
            BackupOptions::default(),
        );

        let report = service.validate_integrity(&serde_json::to_value(&snapshot).unwrap());

        assert!(report.is_valid, "{:?}", report.issues);
    }

    #[tokio::test]
    async fn test_local_snapshot_round_trip() {
        let service = create_test_service().await;
        assert!(service.load_local_snapshot().await.unwrap().is_none());

        service
            .save_local_snapshot(&user(), &[letter("a")], &PortableSettings::default())
            .await
            .unwrap();

        let local = service.load_local_snapshot().await.unwrap().unwrap();
        assert_eq!(local.letters.len(), 1);
        assert_eq!(local.metadata.total_letters, 1);
    }
}
