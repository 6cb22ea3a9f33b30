//! Seam in front of the external protocol client.
//!
//! The crate never talks to a relay directly; everything goes through
//! [`RelayTransport`]. Production uses the nostr-sdk adapter in
//! [`crate::infrastructure::nostr`], tests use the scripted fake in
//! [`crate::test_helpers`].

use async_trait::async_trait;
use nostr_sdk::prelude::{Event, Filter, RelayUrl, SubscriptionId};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::relay::RelayInformation;

/// Infrastructure-level transport failures. Contained by the components;
/// only their messages surface, wrapped in [`crate::Error`].
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Notifications emitted by a transport, in arrival order per
/// subscription.
#[derive(Debug, Clone)]
pub enum RelayNotification {
    Connected {
        url: RelayUrl,
    },
    Disconnected {
        url: RelayUrl,
    },
    Event {
        subscription_id: SubscriptionId,
        event: Box<Event>,
    },
    EndOfStoredEvents {
        subscription_id: SubscriptionId,
    },
    SubscriptionClosed {
        subscription_id: SubscriptionId,
        message: String,
    },
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Establishes the transport to `url`, resolving once the relay has
    /// accepted the connection.
    async fn connect(&self, url: &RelayUrl) -> Result<(), TransportError>;

    /// Closes the transport. Safe to call when not connected.
    async fn disconnect(&self);

    /// Opens a subscription under the caller-chosen id.
    async fn subscribe(&self, id: SubscriptionId, filter: Filter) -> Result<(), TransportError>;

    /// Closes a subscription. Safe to call for unknown ids.
    async fn unsubscribe(&self, id: &SubscriptionId);

    /// A fresh receiver over this transport's notification stream.
    fn notifications(&self) -> broadcast::Receiver<RelayNotification>;

    /// Fetches the relay's advertised information document, tolerating
    /// every failure as "no metadata".
    async fn relay_information(&self, url: &RelayUrl) -> Option<RelayInformation>;
}
