//! Services module
//!
//! Business logic services that sit between the composition root and storage.

pub mod backup;
pub mod credentials;
pub mod habits;
pub mod mood;
pub mod notes;
pub mod notifications;
pub mod scheduler;
pub mod settings;
pub mod sos;
pub mod todos;

pub use backup::BackupService;
pub use credentials::CredentialManager;
pub use habits::HabitTracker;
pub use mood::MoodJournal;
pub use notes::NotesService;
pub use notifications::{LocalNotificationScheduler, NotificationScheduler};
pub use scheduler::{BackupFrequency, SchedulerService};
pub use settings::{AppSettings, SettingsService};
pub use sos::{SosService, SosTrigger};
pub use todos::TodoService;
