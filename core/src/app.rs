//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::clock::{Clock, SystemClock};
use crate::config::DATABASE_FILE;
use crate::database::{create_pool, Repository};
use crate::error::{AppError, Result};
use crate::services::{
    AppSettings, BackupService, CredentialManager, HabitTracker, LocalNotificationScheduler,
    MoodJournal, NotesService, NotificationScheduler, SchedulerService, SettingsService,
    SosService, TodoService,
};
use crate::storage::DocumentStore;
use crate::store::CollectionStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub app_data_dir: PathBuf,
    pub repo: Repository,
    pub settings: SettingsService,
    pub notifications: LocalNotificationScheduler,
    pub habits: HabitTracker,
    pub todos: TodoService,
    pub notes: NotesService,
    pub moods: MoodJournal,
    pub sos: SosService,
    pub backup: BackupService,
    pub credentials: CredentialManager,
    pub scheduler: Arc<SchedulerService>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Open everything under `app_data_dir` with the system clock and OS keyring
    pub async fn initialize(app_data_dir: PathBuf) -> Result<Self> {
        Self::initialize_with(app_data_dir, Arc::new(SystemClock), CredentialManager::system())
            .await
    }

    pub async fn initialize_with(
        app_data_dir: PathBuf,
        clock: Arc<dyn Clock>,
        credentials: CredentialManager,
    ) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("App data directory: {:?}", app_data_dir);

        std::fs::create_dir_all(&app_data_dir)?;
        std::fs::create_dir_all(app_data_dir.join("backups"))?;

        let settings = SettingsService::new(app_data_dir.clone());
        let current = match settings.load().await {
            Ok(current) => current,
            Err(AppError::InvalidSettings(reason)) => {
                tracing::warn!("Ignoring invalid settings file, using defaults: {}", reason);
                AppSettings::default()
            }
            Err(e) => return Err(e),
        };

        let pool = create_pool(&app_data_dir.join(DATABASE_FILE)).await?;
        let repo = Repository::new(pool);
        let store: Arc<dyn CollectionStore> = Arc::new(repo.clone());

        let documents = DocumentStore::new(app_data_dir.join("documents"));
        documents.initialize().await?;

        let notifications = LocalNotificationScheduler::new(clock.clone());
        notifications.set_permission(current.notifications.enabled);
        let notifier: Arc<dyn NotificationScheduler> = Arc::new(notifications.clone());

        let habits = HabitTracker::load(store.clone(), clock.clone()).await?;
        let todos = TodoService::load(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            current.notifications.reminder_lead_time(),
        )
        .await?;
        let notes = NotesService::load(store.clone(), clock.clone()).await?;
        let moods = MoodJournal::load(store.clone(), clock.clone()).await?;
        let sos = SosService::load(
            store,
            documents.clone(),
            notifier.clone(),
            clock.clone(),
            current.sos.hold_duration(),
        )
        .await?;

        let backup = BackupService::new(repo.clone(), documents, app_data_dir.clone());
        backup
            .set_retention_count(current.auto_backup.retention_count)
            .await?;

        let scheduler =
            SchedulerService::new(backup.clone(), credentials.clone(), notifier).await?;

        tracing::info!("Application initialized successfully");

        Ok(Self {
            app_data_dir,
            repo,
            settings,
            notifications,
            habits,
            todos,
            notes,
            moods,
            sos,
            backup,
            credentials,
            scheduler: Arc::new(scheduler),
            clock,
        })
    }

    /// Start the notification dispatcher and, if enabled, automatic backups
    pub async fn start_background_tasks(&self) -> Result<JoinHandle<()>> {
        let current = self.settings.load().await.unwrap_or_default();

        let dispatcher = self
            .notifications
            .clone()
            .start_dispatcher(current.notifications.dispatch_interval());

        self.scheduler.start().await?;
        self.apply_auto_backup(&current).await;

        Ok(dispatcher)
    }

    /// Validate, persist and apply new settings.
    ///
    /// Permission, retention and the backup schedule change immediately.
    /// Reminder lead time, dispatcher period and SOS hold apply on next start.
    pub async fn update_settings(&self, updated: AppSettings) -> Result<()> {
        self.settings.save(&updated).await?;

        self.notifications
            .set_permission(updated.notifications.enabled);
        self.backup
            .set_retention_count(updated.auto_backup.retention_count)
            .await?;
        self.apply_auto_backup(&updated).await;

        Ok(())
    }

    async fn apply_auto_backup(&self, settings: &AppSettings) {
        let auto_backup = &settings.auto_backup;
        let frequency = match auto_backup.parsed_frequency() {
            Ok(frequency) => frequency,
            Err(e) => {
                tracing::warn!("Auto-backup not scheduled: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .scheduler
            .schedule_backup(frequency, auto_backup.enabled)
            .await
        {
            tracing::warn!("Auto-backup not scheduled: {}", e);
        }
    }

    /// Restore a backup and reopen every service on the restored data.
    ///
    /// A wrong password or corrupt archive leaves this state untouched.
    /// On success this state is closed and must not be used any more.
    pub async fn restore_backup(&self, backup_path: &Path, password: &str) -> Result<AppState> {
        self.backup.restore_backup(backup_path, password).await?;

        self.stop_scheduler().await;
        self.repo.close().await;

        AppState::initialize_with(
            self.app_data_dir.clone(),
            self.clock.clone(),
            self.credentials.clone(),
        )
        .await
    }

    /// Stop background work and flush the database
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down");

        self.stop_scheduler().await;
        self.repo.checkpoint().await?;
        self.repo.close().await;

        Ok(())
    }

    async fn stop_scheduler(&self) {
        if let Err(e) = self.scheduler.shutdown().await {
            tracing::warn!("Backup scheduler did not stop cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::database::{CreateTodoRequest, Frequency, Mood};
    use crate::services::credentials::MemorySecretStore;
    use crate::services::settings::AutoBackupSettings;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    async fn open(dir: &TempDir, clock: &FixedClock) -> AppState {
        AppState::initialize_with(
            dir.path().to_path_buf(),
            Arc::new(clock.clone()),
            CredentialManager::new(Arc::new(MemorySecretStore::new())),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let temp = TempDir::new().unwrap();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 10, 1, 8, 0, 0).unwrap());

        let (habit_id, todo_id) = {
            let state = open(&temp, &clock).await;
            let habit = state
                .habits
                .create_habit("Stretch".to_string(), Frequency::Daily)
                .await;
            state.habits.toggle_completion(&habit.id, clock.today()).await;

            let todo = state
                .todos
                .create_todo(CreateTodoRequest {
                    title: "Call the bank".to_string(),
                    due_date: Some(clock.now() + Duration::hours(3)),
                    ..Default::default()
                })
                .await;
            assert!(state.todos.has_scheduled_reminder(&todo.id).await);

            state.moods.record_mood(Mood::Good, None).await;
            state.shutdown().await.unwrap();
            (habit.id, todo.id)
        };

        let state = open(&temp, &clock).await;

        let summary = state.habits.summary(&habit_id).await.unwrap();
        assert_eq!(summary.current_streak, 1);
        assert!(state.todos.get_todo(&todo_id).await.is_some());
        assert!(!state.todos.has_scheduled_reminder(&todo_id).await);
        assert_eq!(state.moods.list_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_settings_revokes_permission() {
        let temp = TempDir::new().unwrap();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 10, 1, 8, 0, 0).unwrap());
        let state = open(&temp, &clock).await;

        let mut settings = state.settings.load().await.unwrap();
        settings.notifications.enabled = false;
        state.update_settings(settings).await.unwrap();

        assert!(!state.notifications.has_permission());
        assert!(!state.settings.load().await.unwrap().notifications.enabled);
    }

    #[tokio::test]
    async fn test_auto_backup_needs_password() {
        let temp = TempDir::new().unwrap();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 10, 1, 8, 0, 0).unwrap());
        let state = open(&temp, &clock).await;

        let mut settings = state.settings.load().await.unwrap();
        settings.auto_backup = AutoBackupSettings {
            enabled: true,
            frequency: "daily".to_string(),
            retention_count: 5,
        };

        state.update_settings(settings.clone()).await.unwrap();
        assert!(!state.scheduler.is_scheduled().await);

        state.credentials.store_auto_backup_password("pw").unwrap();
        state.update_settings(settings).await.unwrap();
        assert!(state.scheduler.is_scheduled().await);
    }
}
