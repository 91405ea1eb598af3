//! To-do list with due-date reminders
//!
//! Each pending to-do with a due date gets one reminder, fired a fixed lead
//! time before it is due. The reminder handles live in a private side table
//! keyed by to-do id; they are never persisted and start empty on every
//! launch.
//!
//! Every to-do has its own slot lock in that table. Changes that affect the
//! reminder go through `reconcile`, which holds the slot while it talks to
//! the scheduler, so calls for one to-do are serialized while other to-dos
//! proceed independently.

use crate::clock::Clock;
use crate::database::{CreateTodoRequest, Todo, TodoPatch, TodoStatus};
use crate::error::Result;
use crate::services::notifications::{NotificationHandle, NotificationPayload, NotificationScheduler};
use crate::store::{CollectionStore, PersistedCollection};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const COLLECTION: &str = "todos";

type BindingSlot = Arc<Mutex<Option<NotificationHandle>>>;

/// Service for managing to-dos and their reminders
#[derive(Clone)]
pub struct TodoService {
    todos: Arc<PersistedCollection<Todo>>,
    scheduler: Arc<dyn NotificationScheduler>,
    clock: Arc<dyn Clock>,
    lead_time: Duration,
    bindings: Arc<Mutex<HashMap<String, BindingSlot>>>,
}

impl TodoService {
    /// Load the to-do collection. Reminder bindings start empty; reminders
    /// scheduled by a previous run are not re-discovered.
    pub async fn load(
        store: Arc<dyn CollectionStore>,
        scheduler: Arc<dyn NotificationScheduler>,
        clock: Arc<dyn Clock>,
        lead_time: Duration,
    ) -> Result<Self> {
        let todos = PersistedCollection::load(COLLECTION, store).await?;
        Ok(Self {
            todos: Arc::new(todos),
            scheduler,
            clock,
            lead_time,
            bindings: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn create_todo(&self, req: CreateTodoRequest) -> Todo {
        let now = self.clock.now();
        let todo = Todo {
            id: Uuid::new_v4().to_string(),
            title: req.title,
            description: req.description,
            status: TodoStatus::Pending,
            due_date: req.due_date,
            created_at: now,
            updated_at: now,
        };

        self.todos.insert(todo.clone()).await;
        tracing::info!("Todo created: {} ({})", todo.id, todo.title);

        self.notify_now("Task added", &todo).await;
        self.reconcile(&todo.id).await;

        todo
    }

    pub async fn get_todo(&self, id: &str) -> Option<Todo> {
        self.todos.get(id).await
    }

    pub async fn list_todos(&self) -> Vec<Todo> {
        self.todos.snapshot().await
    }

    /// Pending to-dos whose due date has passed
    pub async fn overdue_todos(&self) -> Vec<Todo> {
        let now = self.clock.now();
        self.todos
            .snapshot()
            .await
            .into_iter()
            .filter(|t| t.status.is_pending() && t.due_date.is_some_and(|due| due < now))
            .collect()
    }

    /// Apply a partial update. The reminder is only re-evaluated when the
    /// due date actually changes. Unknown ids return `None`.
    pub async fn update_todo(&self, id: &str, patch: TodoPatch) -> Option<Todo> {
        let now = self.clock.now();
        let mut due_changed = false;

        let updated = self
            .todos
            .update(id, |todo| {
                if let Some(title) = patch.title {
                    todo.title = title;
                }
                if let Some(description) = patch.description {
                    todo.description = description;
                }
                if let Some(due_date) = patch.due_date {
                    if todo.due_date != due_date {
                        todo.due_date = due_date;
                        due_changed = true;
                    }
                }
                todo.updated_at = now;
            })
            .await;

        let Some(updated) = updated else {
            tracing::debug!("Update ignored for unknown todo {}", id);
            return None;
        };

        if due_changed {
            tracing::debug!("Due date of todo {} changed to {:?}", id, updated.due_date);
            self.reconcile(id).await;
        }

        Some(updated)
    }

    /// Flip between pending and completed. Unknown ids return `None`.
    pub async fn toggle_status(&self, id: &str) -> Option<Todo> {
        let now = self.clock.now();

        let updated = self
            .todos
            .update(id, |todo| {
                todo.status = match todo.status {
                    TodoStatus::Pending => TodoStatus::Completed { completed_at: now },
                    TodoStatus::Completed { .. } => TodoStatus::Pending,
                };
                todo.updated_at = now;
            })
            .await?;

        tracing::info!(
            "Todo {} is now {}",
            id,
            if updated.status.is_pending() { "pending" } else { "completed" }
        );

        if !updated.status.is_pending() {
            self.notify_now("Task completed", &updated).await;
        }
        self.reconcile(id).await;

        Some(updated)
    }

    /// Delete a to-do and cancel its reminder. Returns false for unknown ids.
    pub async fn delete_todo(&self, id: &str) -> bool {
        let removed = self.todos.remove(id).await.is_some();
        self.release_binding(id).await;

        if removed {
            tracing::info!("Todo deleted: {}", id);
        }
        removed
    }

    /// Bulk replace, e.g. after pulling from a remote backend.
    ///
    /// Reminders of vanished to-dos are cancelled; to-dos whose status or
    /// due date differ from the previous copy are re-evaluated.
    pub async fn replace_all(&self, todos: Vec<Todo>) {
        let incoming: HashMap<String, ReminderKey> =
            todos.iter().map(|t| (t.id.clone(), reminder_key(t))).collect();

        let previous = self.todos.replace_all(todos).await;
        let previous: HashMap<String, ReminderKey> =
            previous.iter().map(|t| (t.id.clone(), reminder_key(t))).collect();

        let mut ids: HashSet<&String> = previous.keys().collect();
        ids.extend(incoming.keys());

        for id in ids {
            match (previous.get(id), incoming.get(id)) {
                (_, None) => self.release_binding(id).await,
                (Some(old), Some(new)) if old == new => {}
                _ => self.reconcile(id).await,
            }
        }

        tracing::info!("Replaced todos collection ({} items)", incoming.len());
    }

    /// Whether a reminder is currently outstanding for the to-do
    pub async fn has_scheduled_reminder(&self, id: &str) -> bool {
        let slot = self.bindings.lock().await.get(id).cloned();
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Bring the reminder of one to-do in line with its current state:
    /// cancel whatever is outstanding, then schedule again if it still needs one.
    async fn reconcile(&self, id: &str) {
        let slot = self.slot(id).await;
        let mut handle = slot.lock().await;

        if let Some(old) = handle.take() {
            self.scheduler.cancel(&old).await;
        }

        if let Some(todo) = self.todos.get(id).await {
            *handle = self.schedule_reminder(&todo).await;
        }

        if handle.is_none() {
            let mut bindings = self.bindings.lock().await;
            // Clones are only taken under the table lock, so a count of two
            // (table and this call) means nobody else is waiting on the slot
            let idle = bindings.get(id).is_some_and(|s| Arc::ptr_eq(s, &slot))
                && Arc::strong_count(&slot) == 2;
            if idle {
                bindings.remove(id);
            }
        }
    }

    async fn release_binding(&self, id: &str) {
        let slot = self.bindings.lock().await.remove(id);

        if let Some(slot) = slot {
            if let Some(old) = slot.lock().await.take() {
                self.scheduler.cancel(&old).await;
            }
        }
    }

    async fn slot(&self, id: &str) -> BindingSlot {
        self.bindings
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    async fn schedule_reminder(&self, todo: &Todo) -> Option<NotificationHandle> {
        if !todo.status.is_pending() {
            return None;
        }

        let due = todo.due_date?;
        let fire_at = due - self.lead_time;

        if fire_at <= self.clock.now() {
            tracing::debug!("Reminder for todo {} would fire in the past; skipping", todo.id);
            return None;
        }

        let payload = NotificationPayload::new(
            "Task reminder",
            format!("\"{}\" is due at {}", todo.title, due.format("%Y-%m-%d %H:%M UTC")),
        )
        .with_data(serde_json::json!({ "todo_id": todo.id }));

        let handle = self.scheduler.schedule_at(fire_at, payload).await;

        match &handle {
            Some(h) => tracing::debug!("Reminder {} scheduled for todo {} at {}", h, todo.id, fire_at),
            None => tracing::warn!("Reminder for todo {} could not be scheduled", todo.id),
        }

        handle
    }

    async fn notify_now(&self, title: &str, todo: &Todo) {
        let payload = NotificationPayload::new(title, todo.title.clone())
            .with_data(serde_json::json!({ "todo_id": todo.id }));

        if self.scheduler.send_now(payload).await.is_none() {
            tracing::debug!("'{}' notification for todo {} was not delivered", title, todo.id);
        }
    }
}

/// The parts of a to-do that decide whether it needs a reminder
type ReminderKey = (bool, Option<DateTime<Utc>>);

fn reminder_key(todo: &Todo) -> ReminderKey {
    (todo.status.is_pending(), todo.due_date)
}
