//! Services module
//!
//! Business logic services that coordinate between the repository, the
//! key-value store and the remote/platform ports.

pub mod backup;
pub mod letters;
pub mod notifications;
pub mod scheduler;
pub mod settings;
pub mod sync;

pub use backup::{BackupHandle, BackupOptions, BackupService, BackupSnapshot, RestoreOutcome};
pub use letters::{LetterEvent, LetterObserver, LettersService};
pub use notifications::NotificationScheduler;
pub use scheduler::{BackupFrequency, BackupScheduler, SnapshotSources};
pub use settings::{AppSettings, PortableSettings, SettingsService, UserProfile};
pub use sync::{SyncEngine, SyncOptions, SyncPayload, SyncStatus};
