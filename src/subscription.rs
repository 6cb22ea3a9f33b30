use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nostr_sdk::prelude::{Event, Filter, SubscriptionId};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::RelayTransport;

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;
pub type EoseHandler = Arc<dyn Fn() + Send + Sync>;

/// Callbacks fired while a subscription is live. Handlers run on the
/// notification pump; keep them short and non-blocking.
#[derive(Clone)]
pub struct SubscriptionHandlers {
    on_event: EventHandler,
    on_eose: Option<EoseHandler>,
}

impl SubscriptionHandlers {
    pub fn new<F>(on_event: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self {
            on_event: Arc::new(on_event),
            on_eose: None,
        }
    }

    /// Called once when the relay signals that historical backfill for
    /// this subscription is complete.
    pub fn on_eose<F>(mut self, on_eose: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_eose = Some(Arc::new(on_eose));
        self
    }
}

/// Opaque handle for a tracked subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }
}

struct Tracked {
    handlers: SubscriptionHandlers,
    eose_seen: bool,
}

#[derive(Default)]
struct SubState {
    order: VecDeque<SubscriptionId>,
    tracked: HashMap<SubscriptionId, Tracked>,
}

/// Tracks live subscriptions against the current connection.
///
/// The number of tracked handles is bounded; opening one past the bound
/// force-stops the oldest tracked handle first, so forgotten handles
/// cannot grow without limit. Replacement is stop-before-start, which
/// keeps an old and its successor from ever delivering side by side.
pub struct SubscriptionManager {
    transport: Arc<dyn RelayTransport>,
    connected: Arc<AtomicBool>,
    max_tracked: usize,
    subs: Mutex<SubState>,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        max_tracked: usize,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            connected,
            max_tracked: max_tracked.max(1),
            subs: Mutex::new(SubState::default()),
        }
    }

    /// Opens a new tracked subscription. Requires a connected session.
    pub async fn subscribe(
        &self,
        filter: Filter,
        handlers: SubscriptionHandlers,
    ) -> Result<SubscriptionHandle> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::Subscription(String::from("not connected")));
        }

        let evicted = {
            let mut subs = self.lock();
            if subs.tracked.len() >= self.max_tracked {
                subs.order.pop_front()
            } else {
                None
            }
        };
        if let Some(oldest) = evicted {
            warn!(subscription = %oldest, "subscription limit reached, force-stopping oldest");
            self.stop_id(&oldest).await;
        }

        let id = SubscriptionId::generate();
        if let Err(e) = self.transport.subscribe(id.clone(), filter).await {
            return Err(Error::Subscription(e.to_string()));
        }

        let mut subs = self.lock();
        subs.order.push_back(id.clone());
        subs.tracked.insert(
            id.clone(),
            Tracked {
                handlers,
                eose_seen: false,
            },
        );
        debug!(subscription = %id, tracked = subs.tracked.len(), "subscription opened");
        Ok(SubscriptionHandle { id })
    }

    /// Replaces `prev` with a new subscription, stopping the old one
    /// before the new one starts so nothing is delivered twice.
    pub async fn replace(
        &self,
        prev: Option<&SubscriptionHandle>,
        filter: Filter,
        handlers: SubscriptionHandlers,
    ) -> Result<SubscriptionHandle> {
        if let Some(prev) = prev {
            self.stop(prev).await;
        }
        self.subscribe(filter, handlers).await
    }

    /// Stops a subscription. Safe to call repeatedly or for handles that
    /// were already stopped.
    pub async fn stop(&self, handle: &SubscriptionHandle) {
        self.stop_id(&handle.id).await;
    }

    /// Stops every tracked subscription. Used on teardown.
    pub async fn stop_all(&self) {
        let ids: Vec<SubscriptionId> = {
            let mut subs = self.lock();
            subs.tracked.clear();
            subs.order.drain(..).collect()
        };
        for id in ids {
            self.transport.unsubscribe(&id).await;
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.lock().tracked.len()
    }

    pub fn is_tracked(&self, handle: &SubscriptionHandle) -> bool {
        self.lock().tracked.contains_key(&handle.id)
    }

    /// Whether the relay has finished historical backfill for `handle`.
    pub fn has_seen_eose(&self, handle: &SubscriptionHandle) -> bool {
        self.lock()
            .tracked
            .get(&handle.id)
            .is_some_and(|tracked| tracked.eose_seen)
    }

    /// Routes an event to the handler registered for `id`. Events for
    /// unknown (stopped, stale) subscriptions are dropped.
    pub fn dispatch_event(&self, id: &SubscriptionId, event: &Event) -> bool {
        let handler = self
            .lock()
            .tracked
            .get(id)
            .map(|tracked| Arc::clone(&tracked.handlers.on_event));
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    /// Marks backfill complete for `id`, firing its EOSE handler the first
    /// time only.
    pub fn dispatch_eose(&self, id: &SubscriptionId) {
        let handler = {
            let mut subs = self.lock();
            match subs.tracked.get_mut(id) {
                Some(tracked) if !tracked.eose_seen => {
                    tracked.eose_seen = true;
                    tracked.handlers.on_eose.clone()
                }
                _ => None,
            }
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Drops tracking state for a subscription the relay closed.
    pub fn dispatch_closed(&self, id: &SubscriptionId, message: &str) {
        let mut subs = self.lock();
        if subs.tracked.remove(id).is_some() {
            subs.order.retain(|tracked| tracked != id);
            debug!(subscription = %id, message, "subscription closed by relay");
        }
    }

    async fn stop_id(&self, id: &SubscriptionId) {
        let was_tracked = {
            let mut subs = self.lock();
            subs.order.retain(|tracked| tracked != id);
            subs.tracked.remove(id).is_some()
        };
        if was_tracked {
            self.transport.unsubscribe(id).await;
            debug!(subscription = %id, "subscription stopped");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubState> {
        self.subs.lock().expect("subscription state lock poisoned")
    }
}
