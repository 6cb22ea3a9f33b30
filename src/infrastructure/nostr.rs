//! nostr-sdk backed implementation of [`RelayTransport`].

use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::relay::RelayInformation;
use crate::infrastructure::nip11;
use crate::transport::{RelayNotification, RelayTransport, TransportError};

const NOTIFICATION_CAPACITY: usize = 4096;
const MONITOR_CAPACITY: usize = 64;

/// How long a single transport-level connect attempt may take. The
/// supervisor arms its own, usually shorter, handshake timeout on top.
const CONNECT_WAIT: Duration = Duration::from_secs(30);

pub struct NostrTransport {
    client: Client,
    tx: broadcast::Sender<RelayNotification>,
}

impl NostrTransport {
    pub fn new() -> Self {
        let client = Client::builder().monitor(Monitor::new(MONITOR_CAPACITY)).build();
        let (tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let transport = Self { client, tx };
        transport.spawn_forwarder();
        transport
    }

    /// Forwards pool notifications and relay status changes into the
    /// transport's own notification stream.
    fn spawn_forwarder(&self) {
        let mut notifications = self.client.notifications();
        let mut statuses = self.client.monitor().map(Monitor::subscribe);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.recv() => match notification {
                        Ok(RelayPoolNotification::Shutdown) => break,
                        Ok(notification) => {
                            if let Some(translated) = translate(notification) {
                                let _ = tx.send(translated);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    status = recv_status(&mut statuses) => match status {
                        Some(MonitorNotification::StatusChanged { relay_url, status }) => {
                            if let Some(translated) = translate_status(relay_url, status) {
                                let _ = tx.send(translated);
                            }
                        }
                        None => statuses = None,
                    },
                }
            }
        });
    }
}

impl Default for NostrTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn recv_status(
    statuses: &mut Option<broadcast::Receiver<MonitorNotification>>,
) -> Option<MonitorNotification> {
    match statuses.as_mut() {
        Some(receiver) => receiver.recv().await.ok(),
        // No monitor stream: park forever so the select sticks to the
        // notification arm.
        None => std::future::pending().await,
    }
}

fn translate(notification: RelayPoolNotification) -> Option<RelayNotification> {
    match notification {
        RelayPoolNotification::Event {
            subscription_id,
            event,
            ..
        } => Some(RelayNotification::Event {
            subscription_id,
            event,
        }),
        RelayPoolNotification::Message { message, .. } => match message {
            RelayMessage::EndOfStoredEvents(subscription_id) => {
                Some(RelayNotification::EndOfStoredEvents {
                    subscription_id: subscription_id.into_owned(),
                })
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => Some(RelayNotification::SubscriptionClosed {
                subscription_id: subscription_id.into_owned(),
                message: message.into_owned(),
            }),
            _ => None,
        },
        _ => None,
    }
}

fn translate_status(url: RelayUrl, status: RelayStatus) -> Option<RelayNotification> {
    match status {
        RelayStatus::Connected => Some(RelayNotification::Connected { url }),
        RelayStatus::Disconnected | RelayStatus::Terminated | RelayStatus::Banned => {
            Some(RelayNotification::Disconnected { url })
        }
        _ => None,
    }
}

#[async_trait]
impl RelayTransport for NostrTransport {
    async fn connect(&self, url: &RelayUrl) -> Result<(), TransportError> {
        // Reconnection is the supervisor's decision, not the pool's.
        self.client
            .pool()
            .add_relay(url.clone(), RelayOptions::new().reconnect(false))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let relay = self
            .client
            .relay(url.clone())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        relay
            .try_connect(CONNECT_WAIT)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&self) {
        self.client.disconnect().await;
        debug!("transport disconnected");
    }

    async fn subscribe(&self, id: SubscriptionId, filter: Filter) -> Result<(), TransportError> {
        self.client
            .subscribe_with_id(id, filter, None)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        self.client.unsubscribe(id).await;
    }

    fn notifications(&self) -> broadcast::Receiver<RelayNotification> {
        self.tx.subscribe()
    }

    async fn relay_information(&self, url: &RelayUrl) -> Option<RelayInformation> {
        nip11::fetch(url).await
    }
}
