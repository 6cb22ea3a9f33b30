use nostr_sdk::prelude::{Event, Kind, PublicKey, RelayUrl, Timestamp};
use serde::Deserialize;
use strum::Display;

/// Kind of a relay discovery report published by a monitor.
pub const RELAY_DISCOVERY_KIND: u16 = 30166;
/// Kind of a monitor announcement.
pub const MONITOR_ANNOUNCEMENT_KIND: u16 = 10166;

/// Last observed reachability of a relay candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RelayHealth {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// One entry of the discovery catalog, suitable for a connection picker.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayCandidate {
    pub url: RelayUrl,
    pub name: Option<String>,
    pub description: Option<String>,
    pub health: RelayHealth,
    pub last_checked: Option<Timestamp>,
    pub supported_nips: Vec<u16>,
    /// Consensus score in `[0, 1]`. Curated entries carry at least the
    /// configured baseline.
    pub confidence: f64,
    /// Reporters whose reports contributed to this entry.
    pub reporters: Vec<PublicKey>,
    pub curated: bool,
}

/// Relay information document (NIP-11) advertised by a relay.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelayInformation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub supported_nips: Vec<u16>,
    #[serde(default)]
    pub limitation: Option<RelayLimits>,
}

/// Numeric limits a relay advertises in its information document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelayLimits {
    #[serde(default)]
    pub max_message_length: Option<u32>,
    #[serde(default)]
    pub max_subscriptions: Option<u32>,
    #[serde(default)]
    pub max_filters: Option<u32>,
    #[serde(default)]
    pub max_limit: Option<u32>,
}

/// Optional payload carried by a discovery report.
#[derive(Debug, Clone, Default, Deserialize)]
struct ReportPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    supported_nips: Vec<u16>,
}

/// One third-party report naming a relay candidate.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub reporter: PublicKey,
    pub url: RelayUrl,
    pub created_at: Timestamp,
    pub name: Option<String>,
    pub description: Option<String>,
    pub supported_nips: Vec<u16>,
}

impl DiscoveryReport {
    /// Parses a report event. The candidate address lives in the `d` tag;
    /// a report without a parseable address is dropped. A malformed
    /// metadata payload only loses the metadata, not the report.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != Kind::from(RELAY_DISCOVERY_KIND) {
            return None;
        }
        let address = event.tags.identifier()?;
        let url = match RelayUrl::parse(address) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(reporter = %event.pubkey, address, error = %e, "discarding report with unusable address");
                return None;
            }
        };

        let mut report = Self {
            reporter: event.pubkey,
            url,
            created_at: event.created_at,
            name: None,
            description: None,
            supported_nips: Vec::new(),
        };
        if !event.content.is_empty() {
            match serde_json::from_str::<ReportPayload>(&event.content) {
                Ok(payload) => {
                    report.name = payload.name;
                    report.description = payload.description;
                    report.supported_nips = payload.supported_nips;
                }
                Err(e) => {
                    tracing::debug!(reporter = %event.pubkey, error = %e, "ignoring malformed report payload");
                }
            }
        }
        Some(report)
    }
}

/// A monitor announcing itself as a relay-quality reporter.
#[derive(Debug, Clone)]
pub struct MonitorAnnouncement {
    pub monitor: PublicKey,
    pub created_at: Timestamp,
}

impl MonitorAnnouncement {
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != Kind::from(MONITOR_ANNOUNCEMENT_KIND) {
            return None;
        }
        Some(Self {
            monitor: event.pubkey,
            created_at: event.created_at,
        })
    }
}
