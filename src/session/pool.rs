use log::debug;
use moka::future::Cache;
use moka::notification::{ListenerFuture, RemovalCause};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::SessionProvider;

/// Maximum number of idle sessions kept across all devices.
const POOL_CAPACITY: u64 = 100;

/// Idle slot. Whoever takes the handle out owns it; an empty slot is inert.
type Slot<H> = Arc<Mutex<Option<H>>>;

/// Idle sessions keyed by device fingerprint.
///
/// A session is either checked out (owned by exactly one caller) or parked
/// here; it is never both. Entries that expire or are pushed out by capacity
/// are closed by the eviction listener.
pub(super) struct SessionPool<P: SessionProvider> {
    idle: Cache<String, Slot<P::Handle>>,
}

impl<P: SessionProvider> SessionPool<P> {
    pub(super) fn new(provider: Arc<P>, idle_timeout: Duration) -> Self {
        let idle = Cache::builder()
            .max_capacity(POOL_CAPACITY)
            .time_to_idle(idle_timeout)
            .async_eviction_listener(
                move |key: Arc<String>, slot: Slot<P::Handle>, cause: RemovalCause| -> ListenerFuture {
                    let provider = Arc::clone(&provider);
                    Box::pin(async move {
                        // Explicit removals are checkouts; the caller took the handle.
                        if !cause.was_evicted() {
                            return;
                        }
                        let taken = slot.lock().await.take();
                        if let Some(mut handle) = taken {
                            debug!("Closing idle session {key} ({cause:?})");
                            provider.close(&mut handle).await;
                        }
                    })
                },
            )
            .build();

        Self { idle }
    }

    /// Takes the parked session for `key`, if any.
    pub(super) async fn checkout(&self, key: &str) -> Option<P::Handle> {
        let slot = self.idle.remove(key).await?;
        let handle = slot.lock().await.take();
        if handle.is_some() {
            debug!("Pool hit: {key}");
        }
        handle
    }

    /// Parks `handle` under `key`. Hands it back when the slot is taken.
    pub(super) async fn checkin(&self, key: String, handle: P::Handle) -> Option<P::Handle> {
        let slot: Slot<P::Handle> = Arc::new(Mutex::new(Some(handle)));
        let parked = Arc::clone(&slot);
        let entry = self
            .idle
            .entry(key.clone())
            .or_insert_with(async move { parked })
            .await;

        if entry.is_fresh() {
            debug!("Session parked: {key}");
            None
        } else {
            debug!("Pool slot for {key} already occupied");
            slot.lock().await.take()
        }
    }

    /// Empties the pool and returns every parked handle.
    pub(super) async fn drain(&self) -> Vec<P::Handle> {
        let keys: Vec<Arc<String>> = self.idle.iter().map(|(key, _)| key).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = self.idle.remove(key.as_str()).await {
                if let Some(handle) = slot.lock().await.take() {
                    handles.push(handle);
                }
            }
        }
        handles
    }
}
