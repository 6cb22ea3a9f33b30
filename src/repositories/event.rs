use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Mutex;

use nostr_sdk::prelude::{Event, EventId};
use sorted_vec::ReverseSortedSet;

use crate::domain::criteria::EventCriteria;
use crate::domain::event::SortableEventId;

/// Bounded, deduplicated store of events received from the active
/// subscription.
///
/// Events are keyed by id for constant-time deduplication; a sorted index
/// over (timestamp, id) maintains the newest-first display order
/// incrementally, and its tail names the eviction victim, keeping
/// eviction sublinear. Insertion is a single synchronous critical
/// section, so back-to-back deliveries during backfill bursts cannot race
/// the dedup check against the write.
pub struct EventRepository {
    inner: Mutex<Store>,
}

struct Store {
    capacity: usize,
    events: HashMap<EventId, Event>,
    order: ReverseSortedSet<SortableEventId>,
}

/// A serialized snapshot of the filtered timeline, ready for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDocument {
    pub filename: String,
    pub json: String,
}

impl EventRepository {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Store {
                capacity: capacity.max(1),
                events: HashMap::new(),
                order: ReverseSortedSet::new(),
            }),
        }
    }

    /// Inserts an event, ignoring ids already present. When the bound is
    /// exceeded the event with the smallest creation timestamp is evicted.
    ///
    /// Returns `true` if the event was newly inserted.
    pub fn insert(&self, event: Event) -> bool {
        let mut store = self.lock();
        if store.events.contains_key(&event.id) {
            return false;
        }

        let sortable = SortableEventId::from_event(&event);
        store.events.insert(event.id, event);
        let _ = store.order.find_or_insert(Reverse(sortable));

        if store.events.len() > store.capacity {
            // Reverse ordering puts the oldest entry last.
            if let Some(oldest) = store.order.pop() {
                store.events.remove(&oldest.0.id);
            }
        }
        true
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.lock().events.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// The full event set in strict newest-first order.
    pub fn timeline(&self) -> Vec<Event> {
        let store = self.lock();
        store
            .order
            .iter()
            .filter_map(|entry| store.events.get(&entry.0.id))
            .cloned()
            .collect()
    }

    /// The event set narrowed by `criteria`, newest first. Pure with
    /// respect to the stored set: calling this never mutates anything and
    /// identical inputs yield identical output.
    pub fn filtered(&self, criteria: &EventCriteria) -> Vec<Event> {
        let store = self.lock();
        store
            .order
            .iter()
            .filter_map(|entry| store.events.get(&entry.0.id))
            .filter(|event| criteria.matches(event))
            .cloned()
            .collect()
    }

    /// Empties the store. Used on disconnect and explicit refetch.
    pub fn clear(&self) {
        let mut store = self.lock();
        store.events.clear();
        store.order.clear();
    }

    /// Serializes the currently filtered sequence, preserving filter and
    /// sort order at the time of the call. The filename is derived from
    /// the current UTC time.
    pub fn export(&self, criteria: &EventCriteria) -> ExportDocument {
        let events = self.filtered(criteria);
        let json = serde_json::to_string_pretty(&events).unwrap_or_else(|_| String::from("[]"));
        let filename = format!(
            "events-{}.json",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        ExportDocument { filename, json }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.inner.lock().expect("event store lock poisoned")
    }
}
