//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the application.

// ===== Letter Validation Limits =====

/// Minimum letter content length in characters
pub const MIN_CONTENT_LENGTH: usize = 10;

/// Maximum letter content length in characters
pub const MAX_CONTENT_LENGTH: usize = 5_000;

/// Maximum letter title length in characters
pub const MAX_TITLE_LENGTH: usize = 100;

/// Earliest allowed delivery, in days after creation
pub const MIN_DELIVERY_DAYS: i64 = 1;

/// Latest allowed delivery, in days after creation
pub const MAX_DELIVERY_DAYS: i64 = 365;

// ===== Notifications =====

/// How long before delivery the "arrives tomorrow" reminder fires
pub const REMINDER_LEAD_HOURS: i64 = 24;

/// Registry identifier of the single repeating daily trigger
pub const DAILY_NOTIFICATION_ID: &str = "daily";

/// How often the delivery sweep marks due letters as delivered (seconds)
pub const DELIVERY_SWEEP_INTERVAL_SECS: u64 = 60;

// ===== Sync =====

/// Default interval of the periodic sync tick (5 minutes)
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Bound on every remote call. Callers must never block indefinitely.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Reachability probes use a shorter bound than regular requests
pub const CONNECTIVITY_TIMEOUT_SECS: u64 = 5;

/// Number of sync history entries kept; oldest are evicted first
pub const MAX_SYNC_HISTORY: usize = 50;

// ===== Backup =====

/// Snapshot format version. Restores of any other version are rejected.
pub const BACKUP_VERSION: &str = "1.0.0";

/// Number of stored snapshot files kept by the retention policy
pub const DEFAULT_BACKUP_RETENTION: usize = 10;

// ===== Key-value store keys =====

pub const KEY_NOTIFICATION_REGISTRY: &str = "notification_registry";
pub const KEY_SYNC_STATUS: &str = "sync_status";
pub const KEY_SYNC_QUEUE: &str = "sync_pending_payload";
pub const KEY_SYNC_HISTORY: &str = "sync_history";
pub const KEY_LOCAL_BACKUP: &str = "local_backup";
