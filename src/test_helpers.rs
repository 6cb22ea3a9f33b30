//! Test support: event fabrication and a scripted in-memory transport.
//!
//! Lives in the library (not behind `cfg(test)`) so both unit tests and
//! the integration tests under `tests/` can drive the full stack without
//! a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::prelude::{
    Event, EventBuilder, Filter, Keys, Kind, RelayUrl, SubscriptionId, Tag, Timestamp,
};
use tokio::sync::broadcast;

use crate::domain::relay::{RelayInformation, MONITOR_ANNOUNCEMENT_KIND, RELAY_DISCOVERY_KIND};
use crate::transport::{RelayNotification, RelayTransport, TransportError};

/// A signed text note from a throwaway author.
pub fn text_note(content: &str, created_at: u64) -> Event {
    text_note_with_keys(&Keys::generate(), content, created_at)
}

pub fn text_note_with_keys(keys: &Keys, content: &str, created_at: u64) -> Event {
    EventBuilder::text_note(content)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .expect("sign text note")
}

/// A kind-0 profile event carrying `content` verbatim.
pub fn profile_event(keys: &Keys, content: &str, created_at: u64) -> Event {
    EventBuilder::new(Kind::Metadata, content)
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .expect("sign profile event")
}

/// A relay discovery report naming `relay` in its `d` tag.
pub fn relay_report(keys: &Keys, relay: &str, created_at: u64) -> Event {
    relay_report_with_payload(keys, relay, "", created_at)
}

pub fn relay_report_with_payload(keys: &Keys, relay: &str, payload: &str, created_at: u64) -> Event {
    EventBuilder::new(Kind::from(RELAY_DISCOVERY_KIND), payload)
        .tag(Tag::identifier(relay))
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .expect("sign relay report")
}

/// A monitor announcement event.
pub fn monitor_announcement(keys: &Keys, created_at: u64) -> Event {
    EventBuilder::new(Kind::from(MONITOR_ANNOUNCEMENT_KIND), "")
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .expect("sign monitor announcement")
}

/// Polls `condition` until it holds, yielding to the runtime in between.
/// Panics after a generous number of attempts so a broken test fails
/// instead of hanging.
pub async fn wait_until<F>(description: &str, condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true: {description}");
}

/// Scripted connect outcomes for [`FakeTransport`], consumed one per
/// connect call. When the script runs dry, connects are accepted.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    Accept,
    Fail(String),
    /// Never resolves; pairs with a paused clock to exercise timeouts.
    Hang,
}

#[derive(Default)]
struct FakeState {
    connect_script: VecDeque<ConnectScript>,
    fail_subscribe: bool,
    connects: Vec<RelayUrl>,
    disconnects: usize,
    subscriptions: Vec<(SubscriptionId, Filter)>,
    subscribe_times: Vec<tokio::time::Instant>,
    unsubscribed: Vec<SubscriptionId>,
    call_order: Vec<String>,
    relay_information: Option<RelayInformation>,
}

/// In-memory transport: records every call and replays whatever the test
/// feeds through [`FakeTransport::emit_event`] and friends.
pub struct FakeTransport {
    tx: broadcast::Sender<RelayNotification>,
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(4096);
        Arc::new(Self {
            tx,
            state: Mutex::new(FakeState::default()),
        })
    }

    /// Every connect attempt fails with `message`.
    pub fn failing_connect(message: &str) -> Arc<Self> {
        let transport = Self::new();
        // An empty script accepts, so keep the failure on repeat.
        for _ in 0..16 {
            transport
                .lock()
                .connect_script
                .push_back(ConnectScript::Fail(message.to_string()));
        }
        transport
    }

    /// Every subscribe attempt fails.
    pub fn failing_subscribe() -> Arc<Self> {
        let transport = Self::new();
        transport.lock().fail_subscribe = true;
        transport
    }

    /// Queues outcomes for the next connect calls, in order.
    pub fn script_connects<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = ConnectScript>,
    {
        self.lock().connect_script.extend(outcomes);
    }

    pub fn set_relay_information(&self, info: RelayInformation) {
        self.lock().relay_information = Some(info);
    }

    pub fn connect_attempts(&self) -> Vec<RelayUrl> {
        self.lock().connects.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    pub fn subscriptions(&self) -> Vec<(SubscriptionId, Filter)> {
        self.lock().subscriptions.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// One instant per subscribe call, in call order.
    pub fn subscription_times(&self) -> Vec<tokio::time::Instant> {
        self.lock().subscribe_times.clone()
    }

    /// Ids subscribed and not yet unsubscribed, oldest first.
    pub fn open_subscription_ids(&self) -> Vec<SubscriptionId> {
        let state = self.lock();
        state
            .subscriptions
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| !state.unsubscribed.contains(id))
            .collect()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.lock().unsubscribed.clone()
    }

    /// `subscribe:<id>` / `unsubscribe:<id>` / `connect:<url>` /
    /// `disconnect` entries in call order.
    pub fn call_order(&self) -> Vec<String> {
        self.lock().call_order.clone()
    }

    pub fn emit_event(&self, subscription_id: &SubscriptionId, event: Event) {
        let _ = self.tx.send(RelayNotification::Event {
            subscription_id: subscription_id.clone(),
            event: Box::new(event),
        });
    }

    pub fn emit_eose(&self, subscription_id: &SubscriptionId) {
        let _ = self.tx.send(RelayNotification::EndOfStoredEvents {
            subscription_id: subscription_id.clone(),
        });
    }

    pub fn emit_closed(&self, subscription_id: &SubscriptionId, message: &str) {
        let _ = self.tx.send(RelayNotification::SubscriptionClosed {
            subscription_id: subscription_id.clone(),
            message: message.to_string(),
        });
    }

    pub fn emit_disconnected(&self, url: &RelayUrl) {
        let _ = self.tx.send(RelayNotification::Disconnected { url: url.clone() });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake transport lock poisoned")
    }
}

#[async_trait]
impl RelayTransport for FakeTransport {
    async fn connect(&self, url: &RelayUrl) -> Result<(), TransportError> {
        let script = {
            let mut state = self.lock();
            state.connects.push(url.clone());
            state.call_order.push(format!("connect:{url}"));
            state.connect_script.pop_front()
        };
        match script.unwrap_or(ConnectScript::Accept) {
            ConnectScript::Accept => {
                let _ = self.tx.send(RelayNotification::Connected { url: url.clone() });
                Ok(())
            }
            ConnectScript::Fail(message) => Err(TransportError::Connect(message)),
            ConnectScript::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }

    async fn disconnect(&self) {
        let mut state = self.lock();
        state.disconnects += 1;
        state.call_order.push(String::from("disconnect"));
    }

    async fn subscribe(&self, id: SubscriptionId, filter: Filter) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.fail_subscribe {
            return Err(TransportError::Subscribe(String::from("scripted failure")));
        }
        state.call_order.push(format!("subscribe:{id}"));
        state.subscriptions.push((id, filter));
        state.subscribe_times.push(tokio::time::Instant::now());
        Ok(())
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        let mut state = self.lock();
        state.call_order.push(format!("unsubscribe:{id}"));
        state.unsubscribed.push(id.clone());
    }

    fn notifications(&self) -> broadcast::Receiver<RelayNotification> {
        self.tx.subscribe()
    }

    async fn relay_information(&self, _url: &RelayUrl) -> Option<RelayInformation> {
        self.lock().relay_information.clone()
    }
}
