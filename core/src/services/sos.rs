//! Emergency / SOS module
//!
//! Emergency contacts, important documents, the last known location and
//! the long-press trigger that raises an SOS alert.

use crate::clock::Clock;
use crate::database::{EmergencyContact, EmergencyDocument, LocationFix};
use crate::error::{AppError, Result};
use crate::services::notifications::{NotificationHandle, NotificationPayload, NotificationScheduler};
use crate::storage::DocumentStore;
use crate::store::{CollectionStore, PersistedCollection};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

const CONTACTS_COLLECTION: &str = "sos_contacts";
const DOCUMENTS_COLLECTION: &str = "sos_documents";
const LOCATION_SNAPSHOT: &str = "sos_location";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SosPhase {
    Idle,
    Holding { since: Instant },
    Activated,
}

/// Long-press detector for the SOS button.
///
/// The alert fires once the button has been held for the full hold
/// duration; releasing earlier cancels. After activation it stays
/// activated until `reset`.
#[derive(Debug, Clone)]
pub struct SosTrigger {
    hold: Duration,
    phase: SosPhase,
}

impl SosTrigger {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            phase: SosPhase::Idle,
        }
    }

    pub fn phase(&self) -> SosPhase {
        self.phase
    }

    pub fn press(&mut self, at: Instant) {
        if self.phase == SosPhase::Idle {
            self.phase = SosPhase::Holding { since: at };
        }
    }

    /// Fraction of the hold completed, for the fill animation
    pub fn progress(&self, at: Instant) -> f32 {
        match self.phase {
            SosPhase::Idle => 0.0,
            SosPhase::Activated => 1.0,
            SosPhase::Holding { since } => {
                if self.hold.is_zero() {
                    return 1.0;
                }
                let held = at.saturating_duration_since(since);
                (held.as_secs_f32() / self.hold.as_secs_f32()).min(1.0)
            }
        }
    }

    /// Timer tick while the button is held. Returns true on the tick that activates.
    pub fn poll(&mut self, at: Instant) -> bool {
        match self.phase {
            SosPhase::Holding { since } if at.saturating_duration_since(since) >= self.hold => {
                self.phase = SosPhase::Activated;
                true
            }
            _ => false,
        }
    }

    /// Button released. Returns true if this release completed the hold.
    pub fn release(&mut self, at: Instant) -> bool {
        let activated = self.poll(at);
        if let SosPhase::Holding { .. } = self.phase {
            self.phase = SosPhase::Idle;
        }
        activated
    }

    pub fn reset(&mut self) {
        self.phase = SosPhase::Idle;
    }
}

/// What was sent when SOS was raised
#[derive(Debug, Clone, Serialize)]
pub struct SosAlert {
    pub message: String,
    pub contact: Option<EmergencyContact>,
    pub location: Option<LocationFix>,
    pub notification: Option<NotificationHandle>,
}

#[derive(Clone)]
pub struct SosService {
    contacts: Arc<PersistedCollection<EmergencyContact>>,
    documents: Arc<PersistedCollection<EmergencyDocument>>,
    document_store: DocumentStore,
    /// Held while stored bytes are added or released, so a blob is never
    /// deleted between another document's put and its insert
    blob_guard: Arc<Mutex<()>>,
    location: Arc<Mutex<Option<LocationFix>>>,
    store: Arc<dyn CollectionStore>,
    scheduler: Arc<dyn NotificationScheduler>,
    clock: Arc<dyn Clock>,
    hold: Duration,
}

impl SosService {
    pub async fn load(
        store: Arc<dyn CollectionStore>,
        document_store: DocumentStore,
        scheduler: Arc<dyn NotificationScheduler>,
        clock: Arc<dyn Clock>,
        hold: Duration,
    ) -> Result<Self> {
        let contacts = PersistedCollection::load(CONTACTS_COLLECTION, store.clone()).await?;
        let documents = PersistedCollection::load(DOCUMENTS_COLLECTION, store.clone()).await?;
        let location = match store.load(LOCATION_SNAPSHOT).await? {
            Some(payload) => serde_json::from_str(&payload)?,
            None => None,
        };

        Ok(Self {
            contacts: Arc::new(contacts),
            documents: Arc::new(documents),
            document_store,
            blob_guard: Arc::new(Mutex::new(())),
            location: Arc::new(Mutex::new(location)),
            store,
            scheduler,
            clock,
            hold,
        })
    }

    /// A fresh long-press detector using the configured hold duration
    pub fn trigger(&self) -> SosTrigger {
        SosTrigger::new(self.hold)
    }

    // ===== Contacts =====

    /// Add a contact. The first contact becomes the primary one.
    pub async fn add_contact(
        &self,
        name: String,
        phone: String,
        relation: Option<String>,
    ) -> EmergencyContact {
        self.contacts
            .mutate_all(|contacts| {
                let contact = EmergencyContact {
                    id: Uuid::new_v4().to_string(),
                    name,
                    phone,
                    relation,
                    primary: contacts.is_empty(),
                };
                contacts.push(contact.clone());
                tracing::info!("Emergency contact added: {}", contact.id);
                contact
            })
            .await
    }

    pub async fn update_contact(
        &self,
        id: &str,
        name: Option<String>,
        phone: Option<String>,
        relation: Option<Option<String>>,
    ) -> Option<EmergencyContact> {
        self.contacts
            .update(id, |contact| {
                if let Some(name) = name {
                    contact.name = name;
                }
                if let Some(phone) = phone {
                    contact.phone = phone;
                }
                if let Some(relation) = relation {
                    contact.relation = relation;
                }
            })
            .await
    }

    /// Remove a contact; if it was primary, the next one is promoted
    pub async fn remove_contact(&self, id: &str) -> bool {
        self.contacts
            .mutate_all(|contacts| {
                let Some(index) = contacts.iter().position(|c| c.id == id) else {
                    return false;
                };
                let removed = contacts.remove(index);
                if removed.primary {
                    if let Some(next) = contacts.first_mut() {
                        next.primary = true;
                    }
                }
                true
            })
            .await
    }

    /// Make `id` the only primary contact. Unknown ids change nothing.
    pub async fn set_primary(&self, id: &str) -> bool {
        self.contacts
            .mutate_all(|contacts| {
                if !contacts.iter().any(|c| c.id == id) {
                    return false;
                }
                for contact in contacts.iter_mut() {
                    contact.primary = contact.id == id;
                }
                true
            })
            .await
    }

    pub async fn list_contacts(&self) -> Vec<EmergencyContact> {
        self.contacts.snapshot().await
    }

    pub async fn primary_contact(&self) -> Option<EmergencyContact> {
        self.contacts.snapshot().await.into_iter().find(|c| c.primary)
    }

    // ===== Documents =====

    pub async fn add_document(
        &self,
        title: String,
        filename: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<EmergencyDocument> {
        tracing::info!("Adding emergency document: {} ({} bytes)", filename, data.len());

        let _blobs = self.blob_guard.lock().await;
        let blob_hash = self.document_store.put(data).await?;

        let document = EmergencyDocument {
            id: Uuid::new_v4().to_string(),
            title,
            filename: sanitize_filename(filename),
            mime_type: mime_type.to_string(),
            size: data.len() as i64,
            blob_hash,
            created_at: self.clock.now(),
        };

        self.documents.insert(document.clone()).await;
        Ok(document)
    }

    pub async fn read_document(&self, id: &str) -> Result<Vec<u8>> {
        let document = self
            .documents
            .get(id)
            .await
            .ok_or_else(|| AppError::DocumentNotFound(id.to_string()))?;

        self.document_store.get(&document.blob_hash).await
    }

    /// Remove a document; its bytes go too unless another document shares them
    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        let _blobs = self.blob_guard.lock().await;

        let removed = self
            .documents
            .mutate_all(|documents| {
                let index = documents.iter().position(|d| d.id == id)?;
                let removed = documents.remove(index);
                let shared = documents.iter().any(|d| d.blob_hash == removed.blob_hash);
                Some((removed, shared))
            })
            .await;

        let Some((removed, shared)) = removed else {
            return Ok(false);
        };

        if !shared {
            self.document_store.remove(&removed.blob_hash).await?;
        }

        tracing::info!("Emergency document removed: {}", id);
        Ok(true)
    }

    pub async fn list_documents(&self) -> Vec<EmergencyDocument> {
        self.documents.snapshot().await
    }

    // ===== Location =====

    pub async fn record_location(
        &self,
        latitude: f64,
        longitude: f64,
        accuracy_m: Option<f64>,
    ) -> LocationFix {
        let fix = LocationFix {
            latitude,
            longitude,
            accuracy_m,
            recorded_at: self.clock.now(),
        };

        let mut location = self.location.lock().await;
        *location = Some(fix);

        match serde_json::to_string(&*location) {
            Ok(payload) => {
                if let Err(e) = self.store.save(LOCATION_SNAPSHOT, &payload).await {
                    tracing::error!("Failed to persist last location: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize last location: {}", e),
        }

        fix
    }

    pub async fn last_location(&self) -> Option<LocationFix> {
        *self.location.lock().await
    }

    // ===== Alert =====

    /// Raise the SOS alert with the primary contact and last known location
    pub async fn activate(&self) -> SosAlert {
        let contact = self.primary_contact().await;
        let location = self.last_location().await;
        let message = compose_message(contact.as_ref(), location.as_ref());

        tracing::warn!("SOS activated");

        let payload = NotificationPayload::new("SOS activated", message.clone()).with_data(
            serde_json::json!({
                "contact_phone": contact.as_ref().map(|c| c.phone.clone()),
                "latitude": location.map(|l| l.latitude),
                "longitude": location.map(|l| l.longitude),
            }),
        );

        let notification = self.scheduler.send_now(payload).await;
        if notification.is_none() {
            tracing::error!("SOS notification could not be delivered");
        }

        SosAlert {
            message,
            contact,
            location,
            notification,
        }
    }
}

fn compose_message(contact: Option<&EmergencyContact>, location: Option<&LocationFix>) -> String {
    let mut message = String::from("SOS! I need help.");

    if let Some(fix) = location {
        message.push_str(&format!(
            " My last known location: https://maps.google.com/?q={:.6},{:.6}",
            fix.latitude, fix.longitude
        ));
    }

    if let Some(contact) = contact {
        message.push_str(&format!(" Notifying {} ({}).", contact.name, contact.phone));
    }

    message
}

/// Strip path separators and NUL bytes so a filename can't escape its directory
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && *c != '\0')
        .take(255)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::services::notifications::LocalNotificationScheduler;
    use crate::store::MemoryCollectionStore;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    struct Fixture {
        service: SosService,
        scheduler: LocalNotificationScheduler,
        store: Arc<MemoryCollectionStore>,
        _temp: TempDir,
    }

    async fn create_test_service() -> Fixture {
        let temp = TempDir::new().unwrap();
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 8, 20, 18, 0, 0).unwrap()));
        let scheduler = LocalNotificationScheduler::new(clock.clone());
        let store = Arc::new(MemoryCollectionStore::new());
        let documents = DocumentStore::new(temp.path().join("documents"));
        documents.initialize().await.unwrap();

        let service = SosService::load(
            store.clone(),
            documents,
            Arc::new(scheduler.clone()),
            clock,
            Duration::from_secs(3),
        )
        .await
        .unwrap();

        Fixture {
            service,
            scheduler,
            store,
            _temp: temp,
        }
    }

    #[test]
    fn test_trigger_requires_full_hold() {
        let start = Instant::now();
        let mut trigger = SosTrigger::new(Duration::from_secs(3));

        trigger.press(start);
        assert!(!trigger.poll(start + Duration::from_secs(1)));
        assert!((trigger.progress(start + Duration::from_millis(1500)) - 0.5).abs() < 1e-6);

        assert!(!trigger.release(start + Duration::from_secs(2)));
        assert_eq!(trigger.phase(), SosPhase::Idle);
        assert_eq!(trigger.progress(start + Duration::from_secs(2)), 0.0);
    }

    #[test]
    fn test_trigger_activates_while_held() {
        let start = Instant::now();
        let mut trigger = SosTrigger::new(Duration::from_secs(3));

        trigger.press(start);
        assert!(trigger.poll(start + Duration::from_secs(3)));
        assert!(!trigger.poll(start + Duration::from_secs(4)));
        assert_eq!(trigger.phase(), SosPhase::Activated);

        assert!(!trigger.release(start + Duration::from_secs(5)));
        assert_eq!(trigger.phase(), SosPhase::Activated);

        trigger.reset();
        assert_eq!(trigger.phase(), SosPhase::Idle);
    }

    #[test]
    fn test_trigger_activates_on_late_release() {
        let start = Instant::now();
        let mut trigger = SosTrigger::new(Duration::from_secs(3));

        trigger.press(start);
        trigger.press(start + Duration::from_secs(2));

        assert!(trigger.release(start + Duration::from_secs(3)));
        assert_eq!(trigger.phase(), SosPhase::Activated);
    }

    #[tokio::test]
    async fn test_primary_contact_bookkeeping() {
        let f = create_test_service().await;

        let alice = f
            .service
            .add_contact("Alice".to_string(), "+100".to_string(), Some("sister".to_string()))
            .await;
        let bob = f.service.add_contact("Bob".to_string(), "+200".to_string(), None).await;

        assert!(alice.primary);
        assert!(!bob.primary);

        assert!(f.service.set_primary(&bob.id).await);
        assert!(!f.service.set_primary("missing").await);
        assert_eq!(f.service.primary_contact().await.unwrap().id, bob.id);

        assert!(f.service.remove_contact(&bob.id).await);
        assert_eq!(f.service.primary_contact().await.unwrap().id, alice.id);
        assert!(!f.service.remove_contact(&bob.id).await);
    }

    #[tokio::test]
    async fn test_documents_share_blobs() {
        let f = create_test_service().await;

        let first = f
            .service
            .add_document("ID".to_string(), "../id.png", "image/png", b"png-bytes")
            .await
            .unwrap();
        let second = f
            .service
            .add_document("ID copy".to_string(), "id.png", "image/png", b"png-bytes")
            .await
            .unwrap();

        assert_eq!(first.filename, "..id.png");
        assert_eq!(first.blob_hash, second.blob_hash);

        assert!(f.service.remove_document(&first.id).await.unwrap());
        assert_eq!(f.service.read_document(&second.id).await.unwrap(), b"png-bytes");

        assert!(f.service.remove_document(&second.id).await.unwrap());
        assert!(matches!(
            f.service.read_document(&second.id).await,
            Err(AppError::DocumentNotFound(_))
        ));
        assert!(!f.service.remove_document(&second.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_bytes_survive_concurrent_remove() {
        let f = create_test_service().await;

        for _ in 0..20 {
            let first = f
                .service
                .add_document("Scan".to_string(), "scan.pdf", "application/pdf", b"scan")
                .await
                .unwrap();

            let adding = {
                let service = f.service.clone();
                tokio::spawn(async move {
                    service
                        .add_document("Copy".to_string(), "scan.pdf", "application/pdf", b"scan")
                        .await
                })
            };
            let removing = {
                let service = f.service.clone();
                tokio::spawn(async move { service.remove_document(&first.id).await })
            };

            let copy = adding.await.unwrap().unwrap();
            assert!(removing.await.unwrap().unwrap());
            assert_eq!(f.service.read_document(&copy.id).await.unwrap(), b"scan");

            assert!(f.service.remove_document(&copy.id).await.unwrap());
        }

        assert!(f.service.list_documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_location_survives_reload() {
        let f = create_test_service().await;

        f.service.record_location(52.52, 13.405, Some(12.0)).await;

        let raw = f.store.load(LOCATION_SNAPSHOT).await.unwrap().unwrap();
        let restored: Option<LocationFix> = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored, f.service.last_location().await);
    }

    #[tokio::test]
    async fn test_activate_sends_alert() {
        let f = create_test_service().await;
        let mut rx = f.scheduler.subscribe();

        f.service.add_contact("Alice".to_string(), "+100".to_string(), None).await;
        f.service.record_location(48.8584, 2.2945, None).await;

        let alert = f.service.activate().await;

        assert!(alert.notification.is_some());
        assert!(alert.message.contains("48.858400,2.294500"));
        assert!(alert.message.contains("Alice (+100)"));

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.payload.title, "SOS activated");
        assert_eq!(delivered.payload.data["contact_phone"], "+100");
    }

    #[tokio::test]
    async fn test_activate_without_permission() {
        let f = create_test_service().await;
        f.scheduler.set_permission(false);

        let alert = f.service.activate().await;

        assert!(alert.notification.is_none());
        assert_eq!(alert.message, "SOS! I need help.");
    }
}
