//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the application.

use std::path::PathBuf;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "LIFENEST_DATA_DIR";

/// Directory name used under the OS data directory
pub const APP_DIR_NAME: &str = "lifenest";

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "db.sqlite";

/// Pooled connections. Every service shares the one repository.
pub const DATABASE_MAX_CONNECTIONS: u32 = 4;

/// How long a writer waits on a locked database before failing
pub const DATABASE_BUSY_TIMEOUT_SECS: u64 = 5;

// ===== Reminder Settings Limits =====

/// How long before a to-do's due date its reminder fires
pub const DEFAULT_REMINDER_LEAD_MINUTES: u32 = 30;

/// Maximum reminder lead time (one week)
pub const MAX_REMINDER_LEAD_MINUTES: u32 = 7 * 24 * 60;

/// Default period of the notification dispatcher loop
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 15;

/// Minimum dispatcher period. Anything lower just burns CPU.
pub const MIN_DISPATCH_INTERVAL_SECS: u64 = 1;

/// Maximum dispatcher period (5 minutes). Reminders would arrive visibly late.
pub const MAX_DISPATCH_INTERVAL_SECS: u64 = 300;

// ===== SOS Settings Limits =====

/// Default long-press duration to activate SOS
pub const DEFAULT_SOS_HOLD_MS: u32 = 3_000;

/// Minimum hold duration; shorter values trigger on accidental taps
pub const MIN_SOS_HOLD_MS: u32 = 500;

/// Maximum hold duration (10 seconds)
pub const MAX_SOS_HOLD_MS: u32 = 10_000;

// ===== Auto-Backup Settings Limits =====

/// Number of backup files kept when no retention setting is stored
pub const DEFAULT_BACKUP_RETENTION_COUNT: usize = 10;

/// Upper bound for the retention count; each backup is a full snapshot
pub const MAX_BACKUP_RETENTION_COUNT: usize = 100;

/// Auto-backup frequency when none is configured
pub const DEFAULT_BACKUP_FREQUENCY: &str = "weekly";

/// Settings file name inside the data directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Resolve the application data directory.
///
/// `LIFENEST_DATA_DIR` wins; otherwise the platform data directory is used,
/// falling back to the current directory when the platform has none.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}
