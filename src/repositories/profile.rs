use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use nostr_sdk::prelude::PublicKey;
use tokio::time::Instant;

use crate::domain::profile::Profile;
use crate::text::shorten_hex;

/// Cache of display identities, one record per author.
///
/// A record is superseded only by a profile whose source event carries a
/// strictly greater creation timestamp (last write wins by source time,
/// not arrival time). Records are never evicted for space; they go stale
/// after the TTL and become eligible for re-fetch.
pub struct ProfileRepository {
    ttl: Duration,
    cache: Mutex<HashMap<PublicKey, StoredProfile>>,
}

#[derive(Debug, Clone)]
struct StoredProfile {
    profile: Profile,
    refreshed_at: Instant,
}

impl ProfileRepository {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, pubkey: &PublicKey) -> Option<Profile> {
        self.lock().get(pubkey).map(|stored| stored.profile.clone())
    }

    /// Applies a resolved profile, returning the record now cached for its
    /// author. An older or equal-timestamp profile leaves the content in
    /// place but still counts as a re-validation for TTL purposes.
    pub fn update(&self, profile: Profile) -> Profile {
        let now = Instant::now();
        let mut cache = self.lock();
        match cache.entry(profile.pubkey) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                stored.refreshed_at = now;
                if profile.created_at > stored.profile.created_at {
                    stored.profile = profile;
                }
                stored.profile.clone()
            }
            Entry::Vacant(vacant) => {
                vacant
                    .insert(StoredProfile {
                        profile: profile.clone(),
                        refreshed_at: now,
                    });
                profile
            }
        }
    }

    /// Whether a cached record exists and is younger than the TTL.
    pub fn is_fresh(&self, pubkey: &PublicKey) -> bool {
        self.lock()
            .get(pubkey)
            .is_some_and(|stored| stored.refreshed_at.elapsed() < self.ttl)
    }

    /// Cached display name, or a deterministic fallback derived from the
    /// identifier.
    pub fn display_name(&self, pubkey: &PublicKey) -> String {
        match self.get(pubkey) {
            Some(profile) => profile.name(),
            None => shorten_hex(&pubkey.to_hex()),
        }
    }

    pub fn avatar(&self, pubkey: &PublicKey) -> Option<String> {
        self.get(pubkey)
            .and_then(|profile| profile.metadata.picture)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PublicKey, StoredProfile>> {
        self.cache.lock().expect("profile cache lock poisoned")
    }
}
