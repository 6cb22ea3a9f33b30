use nostr_sdk::prelude::{Event, Kind, PublicKey, Timestamp};
use serde::{Deserialize, Serialize};

use crate::text::shorten_hex;

/// Payload of a kind-0 (profile) event.
///
/// Every field is optional and unknown fields are ignored; the payload
/// comes from untrusted input and is parsed defensively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub picture: Option<String>,
    pub nip05: Option<String>,
}

/// Display identity for one author, stamped with the creation time of the
/// profile event it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub pubkey: PublicKey,
    pub created_at: Timestamp,
    pub metadata: ProfileMetadata,
}

impl Profile {
    pub fn new(pubkey: PublicKey, created_at: Timestamp, metadata: ProfileMetadata) -> Self {
        Self {
            pubkey,
            created_at,
            metadata,
        }
    }

    /// Parses a profile out of a kind-0 event.
    ///
    /// Returns `None` for other kinds and for malformed content; malformed
    /// payloads are logged and dropped without affecting anything else.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != Kind::Metadata {
            return None;
        }
        match serde_json::from_str::<ProfileMetadata>(&event.content) {
            Ok(metadata) => Some(Self::new(event.pubkey, event.created_at, metadata)),
            Err(e) => {
                tracing::debug!(author = %event.pubkey, error = %e, "discarding malformed profile payload");
                None
            }
        }
    }

    /// Best display name available: display name, then `@name`, then a
    /// shortened form of the hex identifier.
    pub fn name(&self) -> String {
        match (&self.metadata.display_name, &self.metadata.name) {
            (Some(display_name), _) if !display_name.is_empty() => display_name.clone(),
            (_, Some(name)) if !name.is_empty() => format!("@{name}"),
            _ => shorten_hex(&self.pubkey.to_hex()),
        }
    }

    pub fn picture(&self) -> Option<&str> {
        self.metadata.picture.as_deref()
    }
}
