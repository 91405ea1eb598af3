//! LifeNest library
//!
//! Headless core of the LifeNest personal organizer: habits with streaks,
//! to-dos with due-date reminders, a notes vault, a mood journal, an SOS
//! toolkit and encrypted local backups.

pub mod app;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod services;
pub mod storage;
pub mod store;

pub use app::AppState;
pub use error::{AppError, Result};
