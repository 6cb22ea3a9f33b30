use std::cmp::Ordering;

use nostr_sdk::prelude::{Event, EventId, Timestamp};

/// An event id paired with its creation timestamp.
///
/// Used as the element of the cache's sorted index: ordering is by
/// timestamp first, then by id so that two events sharing a timestamp
/// still have a stable total order. The event payload itself lives in the
/// id-keyed map, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortableEventId {
    pub id: EventId,
    pub created_at: Timestamp,
}

impl SortableEventId {
    pub fn new(id: EventId, created_at: Timestamp) -> Self {
        Self { id, created_at }
    }

    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.id,
            created_at: event.created_at,
        }
    }
}

impl PartialOrd for SortableEventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableEventId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.created_at.cmp(&other.created_at) {
            Ordering::Equal => self.id.cmp(&other.id),
            ordering => ordering,
        }
    }
}
