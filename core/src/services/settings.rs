//! Settings service
//!
//! Manages application settings persistence using JSON file storage.
//! Every field has a serde default so older files keep loading.

use crate::config::{
    DEFAULT_BACKUP_FREQUENCY, DEFAULT_BACKUP_RETENTION_COUNT, DEFAULT_DISPATCH_INTERVAL_SECS,
    DEFAULT_REMINDER_LEAD_MINUTES, DEFAULT_SOS_HOLD_MS, MAX_BACKUP_RETENTION_COUNT,
    MAX_DISPATCH_INTERVAL_SECS, MAX_REMINDER_LEAD_MINUTES, MAX_SOS_HOLD_MS,
    MIN_DISPATCH_INTERVAL_SECS, MIN_SOS_HOLD_MS, SETTINGS_FILE,
};
use crate::error::{AppError, Result};
use crate::services::scheduler::BackupFrequency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Notification and reminder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Whether the user granted notification permission
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minutes before a to-do's due date that its reminder fires
    #[serde(default = "default_reminder_lead_minutes")]
    pub reminder_lead_minutes: u32,
    /// Period of the dispatcher that delivers due reminders
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_reminder_lead_minutes() -> u32 {
    DEFAULT_REMINDER_LEAD_MINUTES
}

fn default_dispatch_interval_secs() -> u64 {
    DEFAULT_DISPATCH_INTERVAL_SECS
}

impl NotificationSettings {
    pub fn reminder_lead_time(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.reminder_lead_minutes))
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reminder_lead_minutes: default_reminder_lead_minutes(),
            dispatch_interval_secs: default_dispatch_interval_secs(),
        }
    }
}

/// Auto-backup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBackupSettings {
    #[serde(default)]
    pub enabled: bool,
    /// "5m", "2h", "3d", "daily", "weekly" or "monthly"
    #[serde(default = "default_backup_frequency")]
    pub frequency: String,
    #[serde(default = "default_backup_retention")]
    pub retention_count: usize,
}

fn default_backup_frequency() -> String {
    DEFAULT_BACKUP_FREQUENCY.to_string()
}

fn default_backup_retention() -> usize {
    DEFAULT_BACKUP_RETENTION_COUNT
}

impl AutoBackupSettings {
    pub fn parsed_frequency(&self) -> Result<BackupFrequency> {
        self.frequency
            .parse()
            .map_err(|e: String| AppError::InvalidSettings(e))
    }
}

impl Default for AutoBackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: default_backup_frequency(),
            retention_count: default_backup_retention(),
        }
    }
}

/// SOS button configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SosSettings {
    /// How long the button must be held to raise the alert
    #[serde(default = "default_sos_hold_ms")]
    pub hold_duration_ms: u32,
}

fn default_sos_hold_ms() -> u32 {
    DEFAULT_SOS_HOLD_MS
}

impl SosSettings {
    pub fn hold_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.hold_duration_ms))
    }
}

impl Default for SosSettings {
    fn default() -> Self {
        Self {
            hold_duration_ms: default_sos_hold_ms(),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub auto_backup: AutoBackupSettings,
    #[serde(default)]
    pub sos: SosSettings,
}

impl AppSettings {
    /// Check every value against the limits in `config`
    pub fn validate(&self) -> Result<()> {
        let n = &self.notifications;
        if n.reminder_lead_minutes > MAX_REMINDER_LEAD_MINUTES {
            return Err(AppError::InvalidSettings(format!(
                "Reminder lead time must be at most {} minutes",
                MAX_REMINDER_LEAD_MINUTES
            )));
        }
        if !(MIN_DISPATCH_INTERVAL_SECS..=MAX_DISPATCH_INTERVAL_SECS)
            .contains(&n.dispatch_interval_secs)
        {
            return Err(AppError::InvalidSettings(format!(
                "Dispatch interval must be between {} and {} seconds",
                MIN_DISPATCH_INTERVAL_SECS, MAX_DISPATCH_INTERVAL_SECS
            )));
        }

        let b = &self.auto_backup;
        b.parsed_frequency()?;
        if !(1..=MAX_BACKUP_RETENTION_COUNT).contains(&b.retention_count) {
            return Err(AppError::InvalidSettings(format!(
                "Backup retention must be between 1 and {}",
                MAX_BACKUP_RETENTION_COUNT
            )));
        }

        if !(MIN_SOS_HOLD_MS..=MAX_SOS_HOLD_MS).contains(&self.sos.hold_duration_ms) {
            return Err(AppError::InvalidSettings(format!(
                "SOS hold duration must be between {} and {} ms",
                MIN_SOS_HOLD_MS, MAX_SOS_HOLD_MS
            )));
        }

        Ok(())
    }
}

/// Service for managing application settings
#[derive(Clone)]
pub struct SettingsService {
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self {
            settings_path: app_data_dir.join(SETTINGS_FILE),
        }
    }

    /// Load settings from disk or create default if not exists
    pub async fn load(&self) -> Result<AppSettings> {
        if !fs::try_exists(&self.settings_path).await? {
            tracing::info!("Settings file not found, creating default settings");
            let default = AppSettings::default();
            self.save(&default).await?;
            return Ok(default);
        }

        let content = fs::read_to_string(&self.settings_path).await?;
        let settings: AppSettings = serde_json::from_str(&content)
            .map_err(|e| AppError::InvalidSettings(format!("Failed to parse settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate and save settings to disk
    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        settings.validate()?;

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_path, content).await?;
        tracing::info!("Settings saved to {:?}", self.settings_path);

        Ok(())
    }

    pub async fn get_notifications(&self) -> Result<NotificationSettings> {
        Ok(self.load().await?.notifications)
    }

    pub async fn update_notifications(&self, notifications: NotificationSettings) -> Result<()> {
        let mut settings = self.load().await?;
        settings.notifications = notifications;
        self.save(&settings).await
    }

    pub async fn get_auto_backup(&self) -> Result<AutoBackupSettings> {
        Ok(self.load().await?.auto_backup)
    }

    pub async fn update_auto_backup(&self, auto_backup: AutoBackupSettings) -> Result<()> {
        let mut settings = self.load().await?;
        settings.auto_backup = auto_backup;
        self.save(&settings).await
    }

    pub async fn get_sos(&self) -> Result<SosSettings> {
        Ok(self.load().await?.sos)
    }

    pub async fn update_sos(&self, sos: SosSettings) -> Result<()> {
        let mut settings = self.load().await?;
        settings.sos = sos;
        self.save(&settings).await
    }
}
