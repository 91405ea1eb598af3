//! Notes service
//!
//! Plain notes plus an optional password lock per note. A locked note keeps
//! only the sealed body; the password itself is never stored.

use crate::clock::Clock;
use crate::crypto;
use crate::database::{Note, NoteBody};
use crate::error::{AppError, Result};
use crate::store::{CollectionStore, PersistedCollection};
use std::sync::Arc;
use uuid::Uuid;

const COLLECTION: &str = "notes";

/// Service for managing notes
#[derive(Clone)]
pub struct NotesService {
    notes: Arc<PersistedCollection<Note>>,
    clock: Arc<dyn Clock>,
}

impl NotesService {
    pub async fn load(store: Arc<dyn CollectionStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let notes = PersistedCollection::load(COLLECTION, store).await?;
        Ok(Self {
            notes: Arc::new(notes),
            clock,
        })
    }

    /// Create a new note
    pub async fn create_note(&self, title: String, content: String) -> Note {
        let now = self.clock.now();
        let note = Note {
            id: Uuid::new_v4().to_string(),
            title,
            body: NoteBody::Plain { content },
            created_at: now,
            updated_at: now,
        };

        self.notes.insert(note.clone()).await;
        tracing::info!("Note created: {}", note.id);

        note
    }

    /// Get a note by ID
    pub async fn get_note(&self, id: &str) -> Result<Note> {
        self.notes
            .get(id)
            .await
            .ok_or_else(|| AppError::NoteNotFound(id.to_string()))
    }

    /// All notes, most recently edited first
    pub async fn list_notes(&self) -> Vec<Note> {
        let mut notes = self.notes.snapshot().await;
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        notes
    }

    /// Update title and/or content. Content of a locked note cannot be
    /// changed without unlocking it first.
    pub async fn update_note(
        &self,
        id: &str,
        title: Option<String>,
        content: Option<String>,
    ) -> Result<Note> {
        let now = self.clock.now();
        let updated = self
            .notes
            .try_update(id, |note| {
                if content.is_some() && note.body.is_locked() {
                    return Err(AppError::NoteLocked(id.to_string()));
                }
                if let Some(title) = title {
                    note.title = title;
                }
                if let Some(content) = content {
                    note.body = NoteBody::Plain { content };
                }
                note.updated_at = now;
                Ok(note.clone())
            })
            .await
            .ok_or_else(|| AppError::NoteNotFound(id.to_string()))??;

        tracing::debug!("Note updated: {}", id);
        Ok(updated)
    }

    /// Delete a note. Unknown ids are ignored.
    pub async fn delete_note(&self, id: &str) -> bool {
        let removed = self.notes.remove(id).await.is_some();
        if removed {
            tracing::info!("Note deleted: {}", id);
        }
        removed
    }

    /// Case-insensitive search over titles and unlocked content
    pub async fn search_notes(&self, query: &str) -> Vec<Note> {
        let query = query.to_lowercase();

        self.list_notes()
            .await
            .into_iter()
            .filter(|note| {
                note.title.to_lowercase().contains(&query)
                    || match &note.body {
                        NoteBody::Plain { content } => content.to_lowercase().contains(&query),
                        NoteBody::Locked { .. } => false,
                    }
            })
            .collect()
    }

    /// Seal the note's content with `password`.
    ///
    /// Key derivation runs outside the collection lock. The seal is only
    /// committed if the content is still what was sealed, otherwise the
    /// latest content is sealed again.
    pub async fn lock_note(&self, id: &str, password: &str) -> Result<Note> {
        loop {
            let NoteBody::Plain { content } = self.get_note(id).await?.body else {
                return Err(AppError::NoteLocked(id.to_string()));
            };

            let sealed = crypto::seal_text(&content, password)?;
            let now = self.clock.now();

            let committed = self
                .notes
                .try_update(id, |note| {
                    match &note.body {
                        NoteBody::Locked { .. } => {
                            return Err(AppError::NoteLocked(id.to_string()))
                        }
                        NoteBody::Plain { content: current } if *current != content => {
                            return Ok(None)
                        }
                        NoteBody::Plain { .. } => {}
                    }
                    note.body = NoteBody::Locked { sealed };
                    note.updated_at = now;
                    Ok(Some(note.clone()))
                })
                .await
                .ok_or_else(|| AppError::NoteNotFound(id.to_string()))??;

            if let Some(locked) = committed {
                tracing::info!("Note locked: {}", id);
                return Ok(locked);
            }
            tracing::debug!("Note {} edited while locking, sealing again", id);
        }
    }

    /// Reveal a locked note's content without changing it
    pub async fn unlock_note(&self, id: &str, password: &str) -> Result<String> {
        match self.get_note(id).await?.body {
            NoteBody::Plain { content } => Ok(content),
            NoteBody::Locked { sealed } => crypto::open_text(&sealed, password),
        }
    }

    /// Permanently remove the lock, storing the content in plain form again
    pub async fn remove_lock(&self, id: &str, password: &str) -> Result<Note> {
        let NoteBody::Locked { sealed } = self.get_note(id).await?.body else {
            return self.get_note(id).await;
        };

        let content = crypto::open_text(&sealed, password)?;
        let now = self.clock.now();

        let note = self
            .notes
            .try_update(id, |note| {
                match &note.body {
                    NoteBody::Locked { sealed: current } if *current == sealed => {}
                    // Unlocked meanwhile by someone who knew the password
                    NoteBody::Plain { .. } => return Ok(note.clone()),
                    NoteBody::Locked { .. } => return Err(AppError::NoteLocked(id.to_string())),
                }
                note.body = NoteBody::Plain { content };
                note.updated_at = now;
                Ok(note.clone())
            })
            .await
            .ok_or_else(|| AppError::NoteNotFound(id.to_string()))??;

        tracing::info!("Note lock removed: {}", id);
        Ok(note)
    }

    pub async fn replace_all(&self, notes: Vec<Note>) {
        let count = notes.len();
        self.notes.replace_all(notes).await;
        tracing::info!("Replaced notes collection ({} items)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::MemoryCollectionStore;
    use chrono::{Duration, TimeZone, Utc};

    async fn create_test_service() -> (NotesService, FixedClock) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap());
        let service = NotesService::load(
            Arc::new(MemoryCollectionStore::new()),
            Arc::new(clock.clone()),
        )
        .await
        .unwrap();
        (service, clock)
    }

    #[tokio::test]
    async fn test_create_and_get_note() {
        let (service, _clock) = create_test_service().await;

        let note = service
            .create_note("Test".to_string(), "body".to_string())
            .await;
        let fetched = service.get_note(&note.id).await.unwrap();

        assert_eq!(fetched, note);
        assert!(matches!(
            service.get_note("missing").await,
            Err(AppError::NoteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_orders_by_last_edit() {
        let (service, clock) = create_test_service().await;

        let first = service.create_note("First".to_string(), String::new()).await;
        clock.advance(Duration::minutes(1));
        service.create_note("Second".to_string(), String::new()).await;
        clock.advance(Duration::minutes(1));
        service
            .update_note(&first.id, Some("First, edited".to_string()), None)
            .await
            .unwrap();

        let titles: Vec<String> = service.list_notes().await.into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["First, edited", "Second"]);
    }

    #[tokio::test]
    async fn test_search_notes() {
        let (service, _clock) = create_test_service().await;

        service.create_note("Apple".to_string(), String::new()).await;
        service.create_note("Banana".to_string(), String::new()).await;
        service
            .create_note("Cherry".to_string(), "Buy bananas".to_string())
            .await;

        let results = service.search_notes("BANANA").await;

        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let (service, _clock) = create_test_service().await;
        let note = service
            .create_note("Diary".to_string(), "secret thoughts".to_string())
            .await;

        let locked = service.lock_note(&note.id, "hunter2").await.unwrap();
        assert!(locked.body.is_locked());
        assert!(service.search_notes("secret").await.is_empty());

        assert!(matches!(
            service.unlock_note(&note.id, "wrong").await,
            Err(AppError::InvalidPassword)
        ));
        assert_eq!(
            service.unlock_note(&note.id, "hunter2").await.unwrap(),
            "secret thoughts"
        );
        assert!(service.get_note(&note.id).await.unwrap().body.is_locked());

        let plain = service.remove_lock(&note.id, "hunter2").await.unwrap();
        assert_eq!(
            plain.body,
            NoteBody::Plain {
                content: "secret thoughts".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_locked_content_cannot_be_edited() {
        let (service, _clock) = create_test_service().await;
        let note = service.create_note("Vault".to_string(), "pin".to_string()).await;
        service.lock_note(&note.id, "pw").await.unwrap();

        let result = service
            .update_note(&note.id, None, Some("overwrite".to_string()))
            .await;
        assert!(matches!(result, Err(AppError::NoteLocked(_))));

        let renamed = service
            .update_note(&note.id, Some("Vault 2".to_string()), None)
            .await
            .unwrap();
        assert_eq!(renamed.title, "Vault 2");
        assert!(renamed.body.is_locked());

        assert!(matches!(
            service.lock_note(&note.id, "pw").await,
            Err(AppError::NoteLocked(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_edit_during_lock_is_not_lost() {
        let (service, _clock) = create_test_service().await;
        let note = service.create_note("Vault".to_string(), "old".to_string()).await;

        let locking = {
            let service = service.clone();
            let id = note.id.clone();
            tokio::spawn(async move { service.lock_note(&id, "pw").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let edit = service
            .update_note(&note.id, None, Some("new".to_string()))
            .await;

        locking.await.unwrap().unwrap();
        let sealed_content = service.unlock_note(&note.id, "pw").await.unwrap();

        match edit {
            Ok(_) => assert_eq!(sealed_content, "new"),
            Err(AppError::NoteLocked(_)) => assert_eq!(sealed_content, "old"),
            Err(e) => panic!("unexpected error: {}", e),
        }
        assert!(service.get_note(&note.id).await.unwrap().body.is_locked());
    }

    #[tokio::test]
    async fn test_remove_lock_on_plain_note_is_noop() {
        let (service, _clock) = create_test_service().await;
        let note = service.create_note("Open".to_string(), "text".to_string()).await;

        let unchanged = service.remove_lock(&note.id, "anything").await.unwrap();

        assert_eq!(unchanged, note);
    }

    #[tokio::test]
    async fn test_delete_note() {
        let (service, _clock) = create_test_service().await;
        let note = service.create_note("Temp".to_string(), String::new()).await;

        assert!(service.delete_note(&note.id).await);
        assert!(!service.delete_note(&note.id).await);
        assert!(service.list_notes().await.is_empty());
    }
}
