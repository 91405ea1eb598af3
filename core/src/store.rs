//! Persisted collections
//!
//! Every entity list (habits, to-dos, notes, ...) lives in memory inside a
//! `PersistedCollection` and is written back as a JSON snapshot after each
//! mutation. The in-memory copy is authoritative for the running process;
//! snapshots are only read back at startup.

use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Durable backend for collection snapshots. Payloads are opaque JSON.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn load(&self, collection: &str) -> Result<Option<String>>;

    async fn save(&self, collection: &str, payload: &str) -> Result<()>;
}

/// Anything kept in a collection has a stable string id
pub trait Entity {
    fn id(&self) -> &str;
}

/// Volatile store used by tests and ephemeral sessions
#[derive(Clone, Default)]
pub struct MemoryCollectionStore {
    snapshots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for MemoryCollectionStore {
    async fn load(&self, collection: &str) -> Result<Option<String>> {
        Ok(self.snapshots.lock().await.get(collection).cloned())
    }

    async fn save(&self, collection: &str, payload: &str) -> Result<()> {
        self.snapshots
            .lock()
            .await
            .insert(collection.to_string(), payload.to_string());
        Ok(())
    }
}

/// Ordered, durably saved collection of entities
pub struct PersistedCollection<T> {
    name: &'static str,
    items: Mutex<Vec<T>>,
    store: Arc<dyn CollectionStore>,
}

impl<T> PersistedCollection<T>
where
    T: Entity + Clone + Serialize + DeserializeOwned + Send,
{
    /// Load the collection snapshot, starting empty if none was saved yet
    pub async fn load(name: &'static str, store: Arc<dyn CollectionStore>) -> Result<Self> {
        let items: Vec<T> = match store.load(name).await? {
            Some(payload) => serde_json::from_str(&payload)?,
            None => Vec::new(),
        };

        tracing::info!("Loaded collection '{}' ({} items)", name, items.len());

        Ok(Self {
            name,
            items: Mutex::new(items),
            store,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.items.lock().await.iter().find(|i| i.id() == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn insert(&self, item: T) {
        let mut items = self.items.lock().await;
        items.push(item);
        self.persist(&items).await;
    }

    /// Apply `f` to the item with `id`. Unknown ids leave the collection untouched.
    pub async fn update<F>(&self, id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut T),
    {
        let mut items = self.items.lock().await;
        let item = items.iter_mut().find(|i| i.id() == id)?;
        f(item);
        let updated = item.clone();
        self.persist(&items).await;
        Some(updated)
    }

    /// Apply a change that `f` may refuse. A refusal must leave the item
    /// untouched and is not persisted.
    pub async fn try_update<F, R>(&self, id: &str, f: F) -> Option<Result<R>>
    where
        F: FnOnce(&mut T) -> Result<R>,
    {
        let mut items = self.items.lock().await;
        let item = items.iter_mut().find(|i| i.id() == id)?;
        let result = f(item);
        if result.is_ok() {
            self.persist(&items).await;
        }
        Some(result)
    }

    /// Mutate the whole collection in one critical section
    pub async fn mutate_all<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Vec<T>) -> R,
    {
        let mut items = self.items.lock().await;
        let result = f(&mut items);
        self.persist(&items).await;
        result
    }

    pub async fn remove(&self, id: &str) -> Option<T> {
        let mut items = self.items.lock().await;
        let index = items.iter().position(|i| i.id() == id)?;
        let removed = items.remove(index);
        self.persist(&items).await;
        Some(removed)
    }

    /// Swap in a new collection wholesale, returning the previous contents
    pub async fn replace_all(&self, new_items: Vec<T>) -> Vec<T> {
        let mut items = self.items.lock().await;
        let previous = std::mem::replace(&mut *items, new_items);
        self.persist(&items).await;
        previous
    }

    /// Write the snapshot. Failures are logged; memory stays authoritative.
    async fn persist(&self, items: &[T]) {
        let payload = match serde_json::to_string(items) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to serialize collection '{}': {}", self.name, e);
                return;
            }
        };

        if let Err(e) = self.store.save(self.name, &payload).await {
            tracing::error!("Failed to persist collection '{}': {}", self.name, e);
        } else {
            tracing::debug!("Persisted collection '{}' ({} items)", self.name, items.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        value: u32,
    }

    impl Entity for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, value: u32) -> Item {
        Item {
            id: id.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let store = Arc::new(MemoryCollectionStore::new());
        let collection: PersistedCollection<Item> =
            PersistedCollection::load("items", store.clone()).await.unwrap();

        collection.insert(item("a", 1)).await;
        collection.insert(item("b", 2)).await;
        collection.update("a", |i| i.value = 10).await;
        collection.remove("b").await;

        let reloaded: PersistedCollection<Item> =
            PersistedCollection::load("items", store).await.unwrap();

        assert_eq!(reloaded.snapshot().await, vec![item("a", 10)]);
    }

    #[tokio::test]
    async fn test_unknown_id_is_noop() {
        let store = Arc::new(MemoryCollectionStore::new());
        let collection: PersistedCollection<Item> =
            PersistedCollection::load("items", store).await.unwrap();
        collection.insert(item("a", 1)).await;

        assert!(collection.update("missing", |i| i.value = 99).await.is_none());
        assert!(collection.remove("missing").await.is_none());
        assert_eq!(collection.snapshot().await, vec![item("a", 1)]);
    }

    #[tokio::test]
    async fn test_refused_update_is_not_applied() {
        let store = Arc::new(MemoryCollectionStore::new());
        let collection: PersistedCollection<Item> =
            PersistedCollection::load("items", store.clone()).await.unwrap();
        collection.insert(item("a", 1)).await;

        let refused = collection
            .try_update("a", |i| {
                if i.value < 5 {
                    return Err(crate::error::AppError::Generic("too small".to_string()));
                }
                i.value = 0;
                Ok(())
            })
            .await
            .unwrap();
        assert!(refused.is_err());

        let doubled = collection
            .try_update("a", |i| {
                i.value *= 2;
                Ok(i.value)
            })
            .await;
        assert!(matches!(doubled, Some(Ok(2))));
        assert!(collection.try_update("missing", |_| Ok(())).await.is_none());

        let raw = store.load("items").await.unwrap().unwrap();
        assert!(raw.contains("\"value\":2"));
    }

    #[tokio::test]
    async fn test_replace_all_returns_previous() {
        let store = Arc::new(MemoryCollectionStore::new());
        let collection: PersistedCollection<Item> =
            PersistedCollection::load("items", store.clone()).await.unwrap();
        collection.insert(item("a", 1)).await;

        let previous = collection.replace_all(vec![item("x", 7), item("y", 8)]).await;

        assert_eq!(previous, vec![item("a", 1)]);
        assert_eq!(collection.len().await, 2);

        let raw = store.load("items").await.unwrap().unwrap();
        assert!(raw.contains("\"x\""));
        assert!(!raw.contains("\"a\""));
    }
}
