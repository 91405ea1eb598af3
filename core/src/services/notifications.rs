//! Notification scheduling
//!
//! `NotificationScheduler` is the seam to the platform's notification
//! system. `LocalNotificationScheduler` is the in-process implementation:
//! it keeps a table of pending notifications and a background loop that
//! delivers the due ones on a broadcast channel every tick.

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

const DELIVERY_CHANNEL_CAPACITY: usize = 64;

/// Opaque id of a scheduled or sent notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationHandle(String);

impl NotificationHandle {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A notification that reached the user
#[derive(Debug, Clone, Serialize)]
pub struct DeliveredNotification {
    pub handle: NotificationHandle,
    pub payload: NotificationPayload,
    pub delivered_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    /// Schedule a notification. `None` when permission is missing or
    /// `fire_at` is not in the future.
    async fn schedule_at(
        &self,
        fire_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Option<NotificationHandle>;

    /// Cancel a scheduled notification. Unknown or already delivered handles are ignored.
    async fn cancel(&self, handle: &NotificationHandle);

    /// Deliver a notification immediately
    async fn send_now(&self, payload: NotificationPayload) -> Option<NotificationHandle>;
}

struct PendingNotification {
    fire_at: DateTime<Utc>,
    payload: NotificationPayload,
}

/// In-process scheduler with a polling dispatcher
#[derive(Clone)]
pub struct LocalNotificationScheduler {
    clock: Arc<dyn Clock>,
    permitted: Arc<AtomicBool>,
    pending: Arc<Mutex<HashMap<NotificationHandle, PendingNotification>>>,
    delivered: broadcast::Sender<DeliveredNotification>,
}

impl LocalNotificationScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (delivered, _) = broadcast::channel(DELIVERY_CHANNEL_CAPACITY);
        Self {
            clock,
            permitted: Arc::new(AtomicBool::new(true)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            delivered,
        }
    }

    /// Grant or revoke notification permission
    pub fn set_permission(&self, granted: bool) {
        self.permitted.store(granted, Ordering::SeqCst);
        tracing::info!("Notification permission {}", if granted { "granted" } else { "revoked" });
    }

    pub fn has_permission(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }

    /// Receive every delivered notification from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveredNotification> {
        self.delivered.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, handle: &NotificationHandle) -> bool {
        self.pending.lock().await.contains_key(handle)
    }

    /// Start the background dispatcher
    pub fn start_dispatcher(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Starting notification dispatcher ({:?} period)", period);

            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                self.dispatch_due().await;
            }
        })
    }

    /// Deliver every pending notification whose fire time has passed.
    /// Returns how many were delivered.
    pub async fn dispatch_due(&self) -> usize {
        let now = self.clock.now();

        let mut due: Vec<(NotificationHandle, PendingNotification)> = {
            let mut pending = self.pending.lock().await;
            let handles: Vec<NotificationHandle> = pending
                .iter()
                .filter(|(_, p)| p.fire_at <= now)
                .map(|(h, _)| h.clone())
                .collect();

            handles
                .into_iter()
                .filter_map(|h| pending.remove(&h).map(|p| (h, p)))
                .collect()
        };

        due.sort_by_key(|(_, p)| p.fire_at);

        let count = due.len();
        for (handle, pending) in due {
            self.deliver(handle, pending.payload);
        }

        count
    }

    fn deliver(&self, handle: NotificationHandle, payload: NotificationPayload) {
        tracing::info!("Notification {}: {} - {}", handle, payload.title, payload.body);

        let event = DeliveredNotification {
            handle,
            payload,
            delivered_at: self.clock.now(),
        };

        if self.delivered.send(event).is_err() {
            tracing::debug!("No notification subscribers; delivery only logged");
        }
    }
}

#[async_trait]
impl NotificationScheduler for LocalNotificationScheduler {
    async fn schedule_at(
        &self,
        fire_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Option<NotificationHandle> {
        if !self.has_permission() {
            tracing::warn!("Notification permission not granted; not scheduling '{}'", payload.title);
            return None;
        }

        if fire_at <= self.clock.now() {
            tracing::debug!("Fire time {} already passed; not scheduling", fire_at);
            return None;
        }

        let handle = NotificationHandle::generate();
        self.pending
            .lock()
            .await
            .insert(handle.clone(), PendingNotification { fire_at, payload });

        tracing::debug!("Scheduled notification {} at {}", handle, fire_at);
        Some(handle)
    }

    async fn cancel(&self, handle: &NotificationHandle) {
        if self.pending.lock().await.remove(handle).is_some() {
            tracing::debug!("Cancelled notification {}", handle);
        } else {
            tracing::debug!("Cancel ignored for unknown notification {}", handle);
        }
    }

    async fn send_now(&self, payload: NotificationPayload) -> Option<NotificationHandle> {
        if !self.has_permission() {
            tracing::warn!("Notification permission not granted; dropping '{}'", payload.title);
            return None;
        }

        let handle = NotificationHandle::generate();
        self.deliver(handle.clone(), payload);
        Some(handle)
    }
}
