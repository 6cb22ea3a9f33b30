use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nostr_sdk::prelude::{Filter, Kind, RelayUrl};
use strum::Display;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::domain::criteria::EventCriteria;
use crate::domain::relay::RelayInformation;
use crate::error::{Error, Result};
use crate::profiles::ProfileResolver;
use crate::repositories::event::{EventRepository, ExportDocument};
use crate::repositories::profile::ProfileRepository;
use crate::subscription::{SubscriptionHandle, SubscriptionHandlers, SubscriptionManager};
use crate::transport::{RelayNotification, RelayTransport};

/// Lifecycle of the single upstream connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Handshake failure or timeout, with a human-readable message.
    /// Cleared by the next connect attempt.
    Error(String),
}

#[derive(Default)]
struct ConnState {
    status: ConnectionStatus,
    url: Option<RelayUrl>,
    kinds: Vec<Kind>,
    info: Option<RelayInformation>,
    primary: Option<SubscriptionHandle>,
    cancel: Option<CancellationToken>,
    /// Bumped on every connect; late results from a superseded session
    /// compare against it and drop themselves.
    generation: u64,
    tearing_down: bool,
}

/// Owns one logical session against an upstream relay: the status
/// machine, the event cache, the profile resolver and the subscription
/// manager. At most one connection is live at a time; a new `connect`
/// tears the previous one down first, caches included.
pub struct Connection {
    transport: Arc<dyn RelayTransport>,
    settings: Settings,
    state: Arc<Mutex<ConnState>>,
    connected: Arc<AtomicBool>,
    events: Arc<EventRepository>,
    profiles: Arc<ProfileResolver>,
    subscriptions: Arc<SubscriptionManager>,
}

impl Connection {
    pub fn new(transport: Arc<dyn RelayTransport>, settings: Settings) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&transport),
            settings.subscriptions.max_tracked,
            Arc::clone(&connected),
        ));
        let events = Arc::new(EventRepository::new(settings.cache.capacity));
        let profile_repo = Arc::new(ProfileRepository::new(settings.profiles.ttl()));
        let profiles = Arc::new(ProfileResolver::new(profile_repo, settings.profiles.clone()));

        Self {
            transport,
            settings,
            state: Arc::new(Mutex::new(ConnState::default())),
            connected,
            events,
            profiles,
            subscriptions,
        }
    }

    /// Connects to `address`, subscribing to the given event kinds.
    ///
    /// A malformed address is rejected with [`Error::Validation`] before
    /// anything is touched. A valid address synchronously tears down any
    /// previous session (subscriptions, transport, caches) and starts the
    /// handshake; progress is observable through [`Connection::status`].
    pub async fn connect(&self, address: &str, kinds: Vec<Kind>) -> Result<()> {
        let url = RelayUrl::parse(address)
            .map_err(|e| Error::Validation(format!("{address}: {e}")))?;

        self.teardown().await;

        let token = CancellationToken::new();
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.status = ConnectionStatus::Connecting;
            state.url = Some(url.clone());
            state.kinds = kinds.clone();
            state.info = None;
            state.primary = None;
            state.tearing_down = false;
            state.cancel = Some(token.clone());
            state.generation
        };

        info!(relay = %url, "connecting");
        self.spawn_pump(token.clone(), generation);
        self.spawn_handshake(url, kinds, token, generation);
        Ok(())
    }

    /// Tears down the session. Idempotent.
    pub async fn disconnect(&self) {
        self.teardown().await;
        let mut state = self.lock();
        state.status = ConnectionStatus::Disconnected;
        state.url = None;
        state.kinds.clear();
        state.info = None;
        debug!("disconnected");
    }

    /// Replaces the primary subscription's filter, stop-before-start.
    pub async fn resubscribe(&self, filter: Filter) -> Result<()> {
        let prev = self.lock().primary.clone();
        let handlers = primary_handlers(Arc::clone(&self.events), Arc::clone(&self.profiles));
        let handle = self
            .subscriptions
            .replace(prev.as_ref(), filter, handlers)
            .await?;
        self.lock().primary = Some(handle);
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().status.clone()
    }

    pub fn current_url(&self) -> Option<RelayUrl> {
        self.lock().url.clone()
    }

    pub fn subscribed_kinds(&self) -> Vec<Kind> {
        self.lock().kinds.clone()
    }

    /// The relay's advertised information document, once fetched.
    pub fn relay_information(&self) -> Option<RelayInformation> {
        self.lock().info.clone()
    }

    /// Whether the primary subscription is still backfilling stored
    /// events. Flips to `false` on EOSE.
    pub fn is_loading(&self) -> bool {
        let primary = self.lock().primary.clone();
        primary
            .map(|handle| {
                self.subscriptions.is_tracked(&handle) && !self.subscriptions.has_seen_eose(&handle)
            })
            .unwrap_or(false)
    }

    pub fn events(&self) -> &EventRepository {
        &self.events
    }

    pub fn profiles(&self) -> &ProfileResolver {
        &self.profiles
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Serializes the currently filtered timeline for download.
    pub fn export_events(&self, criteria: &EventCriteria) -> ExportDocument {
        self.events.export(criteria)
    }

    /// Cancels the running session and clears everything scoped to it.
    async fn teardown(&self) {
        let token = {
            let mut state = self.lock();
            state.tearing_down = true;
            state.primary = None;
            state.cancel.take()
        };
        if let Some(token) = token {
            token.cancel();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.stop_all().await;
        self.transport.disconnect().await;
        self.events.clear();
        self.profiles.reset();
    }

    /// Routes transport notifications for one session generation.
    fn spawn_pump(&self, token: CancellationToken, generation: u64) {
        let mut notifications = self.transport.notifications();
        let subscriptions = Arc::clone(&self.subscriptions);
        let state = Arc::clone(&self.state);
        let connected = Arc::clone(&self.connected);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    notification = notifications.recv() => match notification {
                        Ok(RelayNotification::Event { subscription_id, event }) => {
                            // Events for stopped or stale subscriptions
                            // find no handler and are dropped here.
                            subscriptions.dispatch_event(&subscription_id, &event);
                        }
                        Ok(RelayNotification::EndOfStoredEvents { subscription_id }) => {
                            subscriptions.dispatch_eose(&subscription_id);
                        }
                        Ok(RelayNotification::SubscriptionClosed { subscription_id, message }) => {
                            subscriptions.dispatch_closed(&subscription_id, &message);
                        }
                        Ok(RelayNotification::Connected { url }) => {
                            debug!(relay = %url, "transport reports connected");
                        }
                        Ok(RelayNotification::Disconnected { url }) => {
                            let mut st = state.lock().expect("connection state lock poisoned");
                            if st.generation == generation
                                && !st.tearing_down
                                && st.status == ConnectionStatus::Connected
                            {
                                warn!(relay = %url, "transport disconnected");
                                st.status = ConnectionStatus::Disconnected;
                                connected.store(false, Ordering::SeqCst);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "notification stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    /// Runs the handshake with a bounded timeout, then brings up the
    /// primary subscription, the profile flusher and the metadata fetch.
    fn spawn_handshake(
        &self,
        url: RelayUrl,
        kinds: Vec<Kind>,
        token: CancellationToken,
        generation: u64,
    ) {
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        let connected = Arc::clone(&self.connected);
        let subscriptions = Arc::clone(&self.subscriptions);
        let events = Arc::clone(&self.events);
        let profiles = Arc::clone(&self.profiles);
        let timeout = self.settings.connection.handshake_timeout();

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, transport.connect(&url)).await;
            if token.is_cancelled() {
                return;
            }

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!(
                    "no response from {url} within {}s",
                    timeout.as_secs()
                )),
            };
            if let Some(message) = failure {
                warn!(relay = %url, error = %message, "connection failed");
                let mut st = state.lock().expect("connection state lock poisoned");
                if st.generation == generation {
                    st.status = ConnectionStatus::Error(message);
                }
                return;
            }

            {
                let mut st = state.lock().expect("connection state lock poisoned");
                if st.generation != generation {
                    return;
                }
                st.status = ConnectionStatus::Connected;
            }
            connected.store(true, Ordering::SeqCst);
            info!(relay = %url, "connected");

            let handlers = primary_handlers(events, Arc::clone(&profiles));
            match subscriptions.subscribe(primary_filter(&kinds), handlers).await {
                Ok(handle) => {
                    let mut st = state.lock().expect("connection state lock poisoned");
                    if st.generation == generation {
                        st.primary = Some(handle);
                    }
                }
                Err(e) => warn!(relay = %url, error = %e, "failed to open primary subscription"),
            }

            profiles.start(subscriptions, token.clone());

            tokio::select! {
                _ = token.cancelled() => {}
                info = transport.relay_information(&url) => {
                    let mut st = state.lock().expect("connection state lock poisoned");
                    if st.generation == generation {
                        st.info = info;
                    }
                }
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.state.lock().expect("connection state lock poisoned")
    }
}

fn primary_filter(kinds: &[Kind]) -> Filter {
    if kinds.is_empty() {
        Filter::new()
    } else {
        Filter::new().kinds(kinds.iter().copied())
    }
}

/// Handlers for the primary subscription: every event lands in the cache,
/// identity-bearing events additionally feed the profile resolver.
fn primary_handlers(
    events: Arc<EventRepository>,
    profiles: Arc<ProfileResolver>,
) -> SubscriptionHandlers {
    SubscriptionHandlers::new(move |event| {
        if event.kind == Kind::Metadata {
            profiles.ingest(event);
        }
        events.insert(event.clone());
    })
    .on_eose(|| debug!("historical backfill complete"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_helpers::FakeTransport;

    #[tokio::test]
    async fn test_invalid_address_is_rejected_without_state_change() {
        let transport = FakeTransport::new();
        let transport_object: Arc<dyn RelayTransport> = Arc::clone(&transport);
        let conn = Connection::new(transport_object, Settings::default());

        let result = conn.connect("http://not-a-relay.example", vec![Kind::TextNote]).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(conn.current_url(), None);
        assert!(transport.connect_attempts().is_empty());

        let result = conn.connect("not even a url", vec![]).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(
            ConnectionStatus::Error(String::from("boom")).to_string(),
            "error"
        );
    }

    #[test]
    fn test_primary_filter_with_empty_kinds_is_unconstrained() {
        let filter = primary_filter(&[]);
        assert_eq!(filter, Filter::new());

        let filter = primary_filter(&[Kind::TextNote]);
        assert_eq!(filter, Filter::new().kinds([Kind::TextNote]));
    }
}
