//! Habit tracking
//!
//! Each habit keeps the set of calendar days it was completed on.
//! Streaks are derived from that set on read and never stored.

use crate::clock::Clock;
use crate::database::{Frequency, Habit, HabitSummary};
use crate::error::Result;
use crate::store::{CollectionStore, PersistedCollection};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

const COLLECTION: &str = "habits";

/// Current streak as of `today`.
///
/// The most recent completion must be `today` or the day before, otherwise
/// the streak is broken and counts as 0. From there, consecutive days are
/// counted backwards until the first gap. Completions after `today` also
/// count as broken.
pub fn compute_streak(completed_dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut days = completed_dates.iter().rev();

    let Some(&latest) = days.next() else {
        return 0;
    };

    if latest != today && Some(latest) != today.pred_opt() {
        return 0;
    }

    let mut streak = 1;
    let mut expected = latest.pred_opt();

    for &day in days {
        if Some(day) != expected {
            break;
        }
        streak += 1;
        expected = day.pred_opt();
    }

    streak
}

/// Longest run of consecutive days anywhere in the history
pub fn longest_streak(completed_dates: &BTreeSet<NaiveDate>) -> u32 {
    let mut best = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;

    for &day in completed_dates {
        current = match previous {
            Some(prev) if prev.succ_opt() == Some(day) => current + 1,
            _ => 1,
        };
        best = best.max(current);
        previous = Some(day);
    }

    best
}

/// Service for managing habits and their completions
#[derive(Clone)]
pub struct HabitTracker {
    habits: Arc<PersistedCollection<Habit>>,
    clock: Arc<dyn Clock>,
}

impl HabitTracker {
    pub async fn load(store: Arc<dyn CollectionStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let habits = PersistedCollection::load(COLLECTION, store).await?;
        Ok(Self {
            habits: Arc::new(habits),
            clock,
        })
    }

    pub async fn create_habit(&self, title: String, frequency: Frequency) -> Habit {
        let habit = Habit {
            id: Uuid::new_v4().to_string(),
            title,
            frequency,
            completed_dates: BTreeSet::new(),
            created_at: self.clock.now(),
        };

        self.habits.insert(habit.clone()).await;
        tracing::info!("Habit created: {} ({})", habit.id, habit.title);

        habit
    }

    pub async fn get_habit(&self, id: &str) -> Option<Habit> {
        self.habits.get(id).await
    }

    pub async fn list_habits(&self) -> Vec<Habit> {
        self.habits.snapshot().await
    }

    /// Rename or re-schedule a habit. Unknown ids return `None`.
    pub async fn update_habit(
        &self,
        id: &str,
        title: Option<String>,
        frequency: Option<Frequency>,
    ) -> Option<Habit> {
        let updated = self
            .habits
            .update(id, |habit| {
                if let Some(title) = title {
                    habit.title = title;
                }
                if let Some(frequency) = frequency {
                    habit.frequency = frequency;
                }
            })
            .await;

        if updated.is_none() {
            tracing::debug!("Update ignored for unknown habit {}", id);
        }
        updated
    }

    pub async fn delete_habit(&self, id: &str) -> bool {
        let removed = self.habits.remove(id).await.is_some();
        if removed {
            tracing::info!("Habit deleted: {}", id);
        }
        removed
    }

    /// Flip completion of `day`. Returns whether the day is now completed,
    /// or `None` for an unknown habit.
    pub async fn toggle_completion(&self, habit_id: &str, day: NaiveDate) -> Option<bool> {
        let mut completed = false;

        self.habits
            .update(habit_id, |habit| {
                completed = habit.completed_dates.insert(day);
                if !completed {
                    habit.completed_dates.remove(&day);
                }
            })
            .await?;

        tracing::debug!("Habit {} on {}: completed = {}", habit_id, day, completed);
        Some(completed)
    }

    pub async fn summary(&self, id: &str) -> Option<HabitSummary> {
        let today = self.clock.today();
        self.habits.get(id).await.map(|h| summarize(h, today))
    }

    /// Every habit with its streaks as of the clock's current day
    pub async fn list_with_streaks(&self) -> Vec<HabitSummary> {
        let today = self.clock.today();
        self.habits
            .snapshot()
            .await
            .into_iter()
            .map(|h| summarize(h, today))
            .collect()
    }

    /// Bulk replace, e.g. after pulling from a remote backend
    pub async fn replace_all(&self, habits: Vec<Habit>) {
        let count = habits.len();
        self.habits.replace_all(habits).await;
        tracing::info!("Replaced habits collection ({} items)", count);
    }
}

fn summarize(habit: Habit, today: NaiveDate) -> HabitSummary {
    HabitSummary {
        current_streak: compute_streak(&habit.completed_dates, today),
        longest_streak: longest_streak(&habit.completed_dates),
        done_today: habit.completed_dates.contains(&today),
        habit,
    }
}
