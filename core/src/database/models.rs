//! Database models
//!
//! Rust structs representing persisted entities.
//! Collection entities are stored as JSON snapshots; `Backup` is a plain row.

use crate::crypto::EncryptedData;
use crate::store::Entity;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

/// How often a habit is meant to be performed. Informational only;
/// streaks are always counted in calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

/// A tracked habit and the days it was completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: String,
    pub title: String,
    pub frequency: Frequency,
    /// Serialized as `YYYY-MM-DD` strings; a day appears at most once
    pub completed_dates: BTreeSet<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Habit {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Habit plus the values derived from its completions
#[derive(Debug, Clone, Serialize)]
pub struct HabitSummary {
    pub habit: Habit,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub done_today: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    Completed { completed_at: DateTime<Utc> },
}

impl TodoStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, TodoStatus::Pending)
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            TodoStatus::Pending => None,
            TodoStatus::Completed { completed_at } => Some(*completed_at),
        }
    }
}

/// A to-do item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TodoStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Todo {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Create to-do request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTodoRequest {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Partial to-do update. The outer `Option` means "leave unchanged",
/// the inner one allows clearing a field. In JSON an absent key leaves the
/// field alone and `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<DateTime<Utc>>>,
}

/// Only called for keys that are present, so a `null` becomes `Some(None)`
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Note content, either readable or sealed behind a password
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoteBody {
    Plain { content: String },
    Locked { sealed: EncryptedData },
}

impl NoteBody {
    pub fn is_locked(&self) -> bool {
        matches!(self, NoteBody::Locked { .. })
    }
}

/// A note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: NoteBody,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Note {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Awful,
    Bad,
    Okay,
    Good,
    Great,
}

impl Mood {
    /// 1 (awful) through 5 (great)
    pub fn score(self) -> u8 {
        match self {
            Mood::Awful => 1,
            Mood::Bad => 2,
            Mood::Okay => 3,
            Mood::Good => 4,
            Mood::Great => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub id: String,
    pub mood: Mood,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Entity for MoodEntry {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub relation: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

impl Entity for EmergencyContact {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Metadata for a document kept for emergencies (ID card, insurance, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyDocument {
    pub id: String,
    pub title: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    /// SHA-256 hash of the file content in the document store
    pub blob_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for EmergencyDocument {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Backup record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Backup {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub size: i64,
    pub manifest_hash: String,
}
