use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use abi::ThumbnailNotification;
use tracing::{info, warn};

use crate::api_client::{ApiError, TaskApi};

const MIN_POLL_INTERVAL_MS: u64 = 50;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;

type Listener = Arc<dyn Fn(&ThumbnailNotification) + Send + Sync>;

/// Session-scoped fan-out of run notifications.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().expect("notification bus lock poisoned");
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() < before
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ThumbnailNotification) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .expect("notification bus lock poisoned")
            .push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Listeners run on the caller's thread, outside the bus lock.
    pub fn publish(&self, notification: &ThumbnailNotification) {
        let listeners = self
            .inner
            .listeners
            .lock()
            .expect("notification bus lock poisoned")
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(notification);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .expect("notification bus lock poisoned")
            .len()
    }
}

/// Keeps one listener registered. Dropping the handle unsubscribes it.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    pub fn release(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Clone, Debug)]
pub struct NotificationWatchConfig {
    pub poll_interval_ms: u64,
    /// Failed polls in a row before the watch gives up.
    pub max_consecutive_failures: u32,
}

impl Default for NotificationWatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_consecutive_failures: 5,
        }
    }
}

/// Why a notification watch stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    Finished,
    /// The server no longer knows the notification.
    Gone,
    /// The key was rejected with this status.
    Denied(u16),
    GaveUp,
}

pub fn spawn_notification_watch(
    api: Arc<dyn TaskApi>,
    bus: NotificationBus,
    notification_id: String,
    config: NotificationWatchConfig,
) -> tokio::task::JoinHandle<WatchOutcome> {
    tokio::spawn(async move {
        run_notification_watch(api.as_ref(), &bus, &notification_id, &config).await
    })
}

/// Polls one notification and publishes each snapshot until it finishes, the
/// server forgets it, the key is refused, or polls keep failing. Each failed
/// poll doubles the wait up to the interval ceiling.
pub async fn run_notification_watch(
    api: &dyn TaskApi,
    bus: &NotificationBus,
    notification_id: &str,
    config: &NotificationWatchConfig,
) -> WatchOutcome {
    let base_interval = sanitize_interval(config.poll_interval_ms);
    let mut failures = 0u32;
    info!("watching notification notification_id={notification_id}");

    loop {
        match api.get_notification(notification_id).await {
            Ok(notification) => {
                failures = 0;
                let finished = notification.is_finished();
                bus.publish(&notification);
                if finished {
                    info!(
                        "notification finished notification_id={notification_id} processed={} errors={}",
                        notification.processed_count,
                        notification.errors.len()
                    );
                    return WatchOutcome::Finished;
                }
            }
            Err(ApiError::Status { status: 404, .. }) => {
                warn!("notification disappeared notification_id={notification_id}");
                return WatchOutcome::Gone;
            }
            Err(ApiError::Status {
                status: status @ (401 | 403),
                ..
            }) => {
                warn!(
                    "notification watch denied notification_id={notification_id} status={status}"
                );
                return WatchOutcome::Denied(status);
            }
            Err(err) => {
                failures += 1;
                warn!(
                    "notification poll failed notification_id={notification_id} attempt={failures} err={err}"
                );
                if failures >= config.max_consecutive_failures.max(1) {
                    warn!("notification watch gave up notification_id={notification_id}");
                    return WatchOutcome::GaveUp;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(backoff_interval(base_interval, failures))).await;
    }
}

fn backoff_interval(base: u64, failures: u32) -> u64 {
    let factor = 1u64 << failures.min(16);
    base.saturating_mul(factor).min(MAX_POLL_INTERVAL_MS)
}

fn sanitize_interval(value: u64) -> u64 {
    value.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS)
}
