//! Mood journal

use crate::clock::Clock;
use crate::database::{Mood, MoodEntry};
use crate::error::Result;
use crate::store::{CollectionStore, PersistedCollection};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

const COLLECTION: &str = "moods";

#[derive(Clone)]
pub struct MoodJournal {
    entries: Arc<PersistedCollection<MoodEntry>>,
    clock: Arc<dyn Clock>,
}

impl MoodJournal {
    pub async fn load(store: Arc<dyn CollectionStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let entries = PersistedCollection::load(COLLECTION, store).await?;
        Ok(Self {
            entries: Arc::new(entries),
            clock,
        })
    }

    pub async fn record_mood(&self, mood: Mood, note: Option<String>) -> MoodEntry {
        let entry = MoodEntry {
            id: Uuid::new_v4().to_string(),
            mood,
            note,
            recorded_at: self.clock.now(),
        };

        self.entries.insert(entry.clone()).await;
        tracing::debug!("Mood recorded: {:?} ({})", entry.mood, entry.id);

        entry
    }

    pub async fn delete_entry(&self, id: &str) -> bool {
        self.entries.remove(id).await.is_some()
    }

    /// Newest first
    pub async fn list_entries(&self) -> Vec<MoodEntry> {
        let mut entries = self.entries.snapshot().await;
        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        entries
    }

    /// Entries whose UTC timestamp falls on `day`
    pub async fn entries_for_day(&self, day: NaiveDate) -> Vec<MoodEntry> {
        self.list_entries()
            .await
            .into_iter()
            .filter(|e| e.recorded_at.date_naive() == day)
            .collect()
    }

    /// Mean score (1-5) for `day`, `None` without entries
    pub async fn daily_average(&self, day: NaiveDate) -> Option<f32> {
        let entries = self.entries_for_day(day).await;
        if entries.is_empty() {
            return None;
        }

        let total: u32 = entries.iter().map(|e| u32::from(e.mood.score())).sum();
        Some(total as f32 / entries.len() as f32)
    }

    pub async fn replace_all(&self, entries: Vec<MoodEntry>) {
        self.entries.replace_all(entries).await;
    }
}
