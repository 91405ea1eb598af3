/// Scheduler Service
/// Runs automatic backups on a fixed period or a calendar schedule, reading the password from
/// the credential store and reporting the outcome as a notification
use crate::error::{AppError, Result};
use crate::services::notifications::{NotificationPayload, NotificationScheduler};
use crate::services::{BackupService, CredentialManager};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Auto-backup frequency options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFrequency {
    Minutes(u32),
    Hours(u32),
    Days(u32),
    Daily,
    Weekly,
    Monthly,
}

/// How a frequency is handed to the job scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupSchedule {
    /// Fixed period measured from when the job is scheduled
    Every(Duration),
    /// Six-field cron expression (seconds first, UTC)
    Cron(String),
}

impl BackupFrequency {
    /// Counted frequencies repeat on a fixed period. Cron step fields restart
    /// at each hour, day or month boundary, so "90m" or "3d" cannot be cron.
    /// Named frequencies run at 2 AM.
    pub fn schedule(self) -> BackupSchedule {
        match self {
            BackupFrequency::Minutes(m) => every_secs(m, 60),
            BackupFrequency::Hours(h) => every_secs(h, 3_600),
            BackupFrequency::Days(d) => every_secs(d, 86_400),
            BackupFrequency::Daily => BackupSchedule::Cron("0 0 2 * * *".to_string()),
            BackupFrequency::Weekly => BackupSchedule::Cron("0 0 2 * * SUN".to_string()),
            BackupFrequency::Monthly => BackupSchedule::Cron("0 0 2 1 * *".to_string()),
        }
    }
}

fn every_secs(count: u32, unit_secs: u64) -> BackupSchedule {
    BackupSchedule::Every(Duration::from_secs(u64::from(count) * unit_secs))
}

impl FromStr for BackupFrequency {
    type Err = String;

    /// Accepts "5m", "2h", "3d" as well as "daily", "weekly", "monthly"
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        match s.as_str() {
            "daily" => return Ok(BackupFrequency::Daily),
            "weekly" => return Ok(BackupFrequency::Weekly),
            "monthly" => return Ok(BackupFrequency::Monthly),
            _ => {}
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

/// Scheduler service for automatic backups
pub struct SchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    backup_service: Arc<BackupService>,
    credentials: CredentialManager,
    notifier: Arc<dyn NotificationScheduler>,
    current_job_id: Arc<RwLock<Option<Uuid>>>,
}

impl SchedulerService {
    pub async fn new(
        backup_service: BackupService,
        credentials: CredentialManager,
        notifier: Arc<dyn NotificationScheduler>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Backup(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            backup_service: Arc::new(backup_service),
            credentials,
            notifier,
            current_job_id: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn start(&self) -> Result<()> {
        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Backup(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("Backup scheduler started");
        Ok(())
    }

    /// Replace the current schedule. `enabled = false` only cancels.
    pub async fn schedule_backup(&self, frequency: BackupFrequency, enabled: bool) -> Result<()> {
        self.cancel_backup().await?;

        if !enabled {
            tracing::info!("Automatic backups disabled");
            return Ok(());
        }

        if !self.credentials.has_auto_backup_password() {
            return Err(AppError::Backup(
                "Auto-backup password not set. Please set password in settings.".to_string(),
            ));
        }

        let schedule = frequency.schedule();
        let backup_service = Arc::clone(&self.backup_service);
        let credentials = self.credentials.clone();
        let notifier = Arc::clone(&self.notifier);

        let job = match schedule.clone() {
            BackupSchedule::Cron(cron_expr) => Job::new_async(cron_expr, move |_uuid, _l| {
                Box::pin(scheduled_run(
                    Arc::clone(&backup_service),
                    credentials.clone(),
                    Arc::clone(&notifier),
                ))
            }),
            BackupSchedule::Every(period) => Job::new_repeated_async(period, move |_uuid, _l| {
                Box::pin(scheduled_run(
                    Arc::clone(&backup_service),
                    credentials.clone(),
                    Arc::clone(&notifier),
                ))
            }),
        }
        .map_err(|e| AppError::Backup(format!("Failed to create backup job: {}", e)))?;

        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Backup(format!("Failed to schedule job: {}", e)))?;

        *self.current_job_id.write().await = Some(job_id);

        tracing::info!("Automatic backup scheduled: {:?} ({:?})", frequency, schedule);
        Ok(())
    }

    pub async fn is_scheduled(&self) -> bool {
        self.current_job_id.read().await.is_some()
    }

    /// When the scheduled backup runs next, if one is scheduled
    pub async fn next_backup_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(job_id) = *self.current_job_id.read().await else {
            return Ok(None);
        };

        let mut scheduler = self.scheduler.write().await;
        scheduler
            .next_tick_for_job(job_id)
            .await
            .map_err(|e| AppError::Backup(format!("Failed to read next run: {}", e)))
    }

    pub async fn cancel_backup(&self) -> Result<()> {
        let mut current_job = self.current_job_id.write().await;

        if let Some(job_id) = current_job.take() {
            let scheduler = self.scheduler.write().await;
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Backup(format!("Failed to remove job: {}", e)))?;

            tracing::info!("Automatic backup schedule cancelled");
        }

        Ok(())
    }

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

async fn scheduled_run(
    backup_service: Arc<BackupService>,
    credentials: CredentialManager,
    notifier: Arc<dyn NotificationScheduler>,
) {
    tracing::info!("Running scheduled automatic backup");
    let _ = run_backup(&backup_service, &credentials, notifier.as_ref()).await;
}

/// One automatic backup run. The outcome is always reported to the user.
pub async fn run_backup(
    backup_service: &BackupService,
    credentials: &CredentialManager,
    notifier: &dyn NotificationScheduler,
) -> Result<PathBuf> {
    let password = match credentials.get_auto_backup_password() {
        Ok(password) => password,
        Err(e) => {
            tracing::error!("Failed to retrieve auto-backup password: {}", e);
            notify(
                notifier,
                "Automatic Backup Failed",
                "Could not retrieve backup password from credential manager",
            )
            .await;
            return Err(e);
        }
    };

    match backup_service.create_backup(&password).await {
        Ok(path) => {
            tracing::info!("Automatic backup created: {:?}", path);
            notify(notifier, "Backup Complete", "Automatic backup created successfully").await;
            Ok(path)
        }
        Err(e) => {
            tracing::error!("Automatic backup failed: {}", e);
            notify(notifier, "Automatic Backup Failed", &e.to_string()).await;
            Err(e)
        }
    }
}

async fn notify(notifier: &dyn NotificationScheduler, title: &str, body: &str) {
    if notifier
        .send_now(NotificationPayload::new(title, body))
        .await
        .is_none()
    {
        tracing::warn!("Notification not delivered: {} - {}", title, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::database::{create_pool, Repository};
    use crate::services::credentials::MemorySecretStore;
    use crate::services::notifications::LocalNotificationScheduler;
    use crate::storage::DocumentStore;
    use chrono::{Datelike, Timelike, Weekday};
    use tempfile::TempDir;

    #[test]
    fn test_parse_frequency() {
        assert_eq!("5m".parse::<BackupFrequency>(), Ok(BackupFrequency::Minutes(5)));
        assert_eq!(" 2H ".parse::<BackupFrequency>(), Ok(BackupFrequency::Hours(2)));
        assert_eq!("3d".parse::<BackupFrequency>(), Ok(BackupFrequency::Days(3)));
        assert_eq!("90m".parse::<BackupFrequency>(), Ok(BackupFrequency::Minutes(90)));
        assert_eq!("daily".parse::<BackupFrequency>(), Ok(BackupFrequency::Daily));
        assert_eq!("Weekly".parse::<BackupFrequency>(), Ok(BackupFrequency::Weekly));
        assert_eq!("monthly".parse::<BackupFrequency>(), Ok(BackupFrequency::Monthly));

        assert!("".parse::<BackupFrequency>().is_err());
        assert!("0m".parse::<BackupFrequency>().is_err());
        assert!("5x".parse::<BackupFrequency>().is_err());
        assert!("m".parse::<BackupFrequency>().is_err());
        assert!("5é".parse::<BackupFrequency>().is_err());
    }

    #[test]
    fn test_counted_frequencies_use_exact_periods() {
        assert_eq!(
            BackupFrequency::Minutes(90).schedule(),
            BackupSchedule::Every(Duration::from_secs(90 * 60))
        );
        assert_eq!(
            BackupFrequency::Hours(48).schedule(),
            BackupSchedule::Every(Duration::from_secs(48 * 3_600))
        );
        assert_eq!(
            BackupFrequency::Days(45).schedule(),
            BackupSchedule::Every(Duration::from_secs(45 * 86_400))
        );
    }

    struct Fixture {
        backup: BackupService,
        credentials: CredentialManager,
        notifier: LocalNotificationScheduler,
        _temp: TempDir,
    }

    async fn create_fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let pool = create_pool(&temp.path().join("db.sqlite")).await.unwrap();
        let documents = DocumentStore::new(temp.path().join("documents"));
        documents.initialize().await.unwrap();

        Fixture {
            backup: BackupService::new(Repository::new(pool), documents, temp.path().to_path_buf()),
            credentials: CredentialManager::new(Arc::new(MemorySecretStore::new())),
            notifier: LocalNotificationScheduler::new(Arc::new(SystemClock)),
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn test_run_backup_reports_success() {
        let f = create_fixture().await;
        let mut rx = f.notifier.subscribe();
        f.credentials.store_auto_backup_password("auto-pw").unwrap();

        let path = run_backup(&f.backup, &f.credentials, &f.notifier).await.unwrap();

        assert!(path.exists());
        assert_eq!(rx.recv().await.unwrap().payload.title, "Backup Complete");
    }

    #[tokio::test]
    async fn test_run_backup_without_password() {
        let f = create_fixture().await;
        let mut rx = f.notifier.subscribe();

        assert!(run_backup(&f.backup, &f.credentials, &f.notifier).await.is_err());
        assert_eq!(rx.recv().await.unwrap().payload.title, "Automatic Backup Failed");
        assert!(f.backup.list_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_requires_password() {
        let f = create_fixture().await;
        let scheduler = SchedulerService::new(
            f.backup.clone(),
            f.credentials.clone(),
            Arc::new(f.notifier.clone()),
        )
        .await
        .unwrap();

        assert!(scheduler
            .schedule_backup(BackupFrequency::Daily, true)
            .await
            .is_err());

        f.credentials.store_auto_backup_password("auto-pw").unwrap();
        scheduler
            .schedule_backup(BackupFrequency::Daily, true)
            .await
            .unwrap();
        assert!(scheduler.is_scheduled().await);

        scheduler
            .schedule_backup(BackupFrequency::Daily, false)
            .await
            .unwrap();
        assert!(!scheduler.is_scheduled().await);
    }

    async fn scheduler_with_password(f: &Fixture) -> SchedulerService {
        f.credentials.store_auto_backup_password("auto-pw").unwrap();
        SchedulerService::new(
            f.backup.clone(),
            f.credentials.clone(),
            Arc::new(f.notifier.clone()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_weekly_runs_on_sunday() {
        let f = create_fixture().await;
        let scheduler = scheduler_with_password(&f).await;

        scheduler
            .schedule_backup(BackupFrequency::Weekly, true)
            .await
            .unwrap();

        let next = scheduler.next_backup_at().await.unwrap().unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!((next.hour(), next.minute()), (2, 0));
        assert!(next - Utc::now() <= chrono::Duration::days(7));
    }

    #[tokio::test]
    async fn test_monthly_runs_on_the_first() {
        let f = create_fixture().await;
        let scheduler = scheduler_with_password(&f).await;

        scheduler
            .schedule_backup(BackupFrequency::Monthly, true)
            .await
            .unwrap();

        let next = scheduler.next_backup_at().await.unwrap().unwrap();
        assert_eq!(next.day(), 1);
        assert_eq!((next.hour(), next.minute()), (2, 0));
        assert!(next - Utc::now() <= chrono::Duration::days(31));
    }

    #[tokio::test]
    async fn test_long_interval_is_not_truncated() {
        let f = create_fixture().await;
        let scheduler = scheduler_with_password(&f).await;

        scheduler
            .schedule_backup(BackupFrequency::Hours(48), true)
            .await
            .unwrap();

        let next = scheduler.next_backup_at().await.unwrap().unwrap();
        let until = next - Utc::now();
        assert!(until > chrono::Duration::hours(47));
        assert!(until <= chrono::Duration::hours(48));

        scheduler.cancel_backup().await.unwrap();
        assert_eq!(scheduler.next_backup_at().await.unwrap(), None);
    }
}
