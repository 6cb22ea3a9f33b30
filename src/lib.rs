//! # Relayscope
//!
//! The ingestion, caching and discovery core of a Nostr relay inspector:
//! everything needed to watch an untrusted, unbounded relay event stream
//! while staying responsive, minus the rendering.
//!
//! ## Components
//!
//! - [`Connection`] — owns the single upstream session: status machine,
//!   teardown-before-connect, handshake timeout, notification routing.
//! - [`SubscriptionManager`] — bounded set of live filtered
//!   subscriptions with stop-before-start replacement.
//! - [`EventRepository`] — bounded, deduplicated event cache with a
//!   newest-first view, oldest-first eviction, filtering and export.
//! - [`ProfileResolver`] — debounced, batched, TTL-cached resolution of
//!   author display identity from kind-0 events.
//! - [`RelayDirectory`] — curated-plus-discovered catalog of connectable
//!   relays, confidence-ranked from monitor reports.
//!
//! The wire protocol lives behind [`RelayTransport`]; production uses the
//! nostr-sdk adapter in [`infrastructure`], tests script a fake from
//! [`test_helpers`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nostr_sdk::prelude::Kind;
//! use relayscope::{Connection, Settings};
//! use relayscope::infrastructure::NostrTransport;
//!
//! # async fn run() -> relayscope::Result<()> {
//! let transport = Arc::new(NostrTransport::new());
//! let conn = Connection::new(transport, Settings::default());
//! conn.connect("wss://relay.example.com", vec![Kind::TextNote]).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conn;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod profiles;
pub mod repositories;
pub mod subscription;
pub mod test_helpers;
pub mod text;
pub mod transport;
pub mod utils;

pub use config::Settings;
pub use conn::{Connection, ConnectionStatus};
pub use discovery::RelayDirectory;
pub use domain::criteria::EventCriteria;
pub use error::{Error, Result};
pub use profiles::ProfileResolver;
pub use repositories::event::{EventRepository, ExportDocument};
pub use repositories::profile::ProfileRepository;
pub use subscription::{SubscriptionHandle, SubscriptionHandlers, SubscriptionManager};
pub use transport::{RelayNotification, RelayTransport};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
