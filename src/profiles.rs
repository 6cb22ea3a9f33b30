use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nostr_sdk::prelude::{Event, Filter, Kind, PublicKey};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ProfileSettings;
use crate::domain::profile::Profile;
use crate::repositories::profile::ProfileRepository;
use crate::subscription::{SubscriptionHandlers, SubscriptionManager};

/// Resolves author identifiers to display identity without issuing one
/// lookup per event.
///
/// Interest is registered synchronously; a debounced flusher coalesces it
/// into batched kind-0 subscriptions. The planning state (what is
/// pending, what is in flight and until when, when the next flush is due)
/// is kept in [`ResolveQueue`], which is pure over explicit instants so
/// it can be tested without timers.
pub struct ProfileResolver {
    repo: Arc<ProfileRepository>,
    settings: ProfileSettings,
    queue: Mutex<ResolveQueue>,
    wakeup: Notify,
}

impl ProfileResolver {
    pub fn new(repo: Arc<ProfileRepository>, settings: ProfileSettings) -> Self {
        Self {
            repo,
            settings,
            queue: Mutex::new(ResolveQueue::new()),
            wakeup: Notify::new(),
        }
    }

    /// Registers interest in a set of authors. Authors holding a fresh
    /// cached record or already part of an in-flight batch are skipped.
    pub fn request<I>(&self, authors: I)
    where
        I: IntoIterator<Item = PublicKey>,
    {
        let now = Instant::now();
        let mut added = 0usize;
        {
            let mut queue = self.lock();
            queue.expire_in_flight(now);
            for author in authors {
                if self.repo.is_fresh(&author) || queue.is_in_flight(&author) {
                    continue;
                }
                if queue.enqueue(author, now) {
                    added += 1;
                }
            }
        }
        if added > 0 {
            debug!(added, "queued profile lookups");
            self.wakeup.notify_one();
        }
    }

    /// Feeds one received event into the cache. Non-profile kinds and
    /// malformed payloads are ignored.
    pub fn ingest(&self, event: &Event) {
        if let Some(profile) = Profile::from_event(event) {
            self.lock().acknowledge(&profile.pubkey);
            self.repo.update(profile);
        }
    }

    pub fn get(&self, author: &PublicKey) -> Option<Profile> {
        self.repo.get(author)
    }

    pub fn display_name(&self, author: &PublicKey) -> String {
        self.repo.display_name(author)
    }

    pub fn avatar(&self, author: &PublicKey) -> Option<String> {
        self.repo.avatar(author)
    }

    /// Clears all connection-scoped state: pending interest, in-flight
    /// markers and the cached records. Timers die with the session's
    /// cancellation token.
    pub fn reset(&self) {
        self.lock().clear();
        self.repo.clear();
    }

    /// Spawns the flusher for the current session. It stops when `token`
    /// is cancelled.
    pub fn start(self: &Arc<Self>, subscriptions: Arc<SubscriptionManager>, token: CancellationToken) {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            resolver.run(subscriptions, token).await;
        });
    }

    async fn run(self: Arc<Self>, subscriptions: Arc<SubscriptionManager>, token: CancellationToken) {
        loop {
            let due = {
                let queue = self.lock();
                queue.due_at(self.settings.debounce(), self.settings.max_debounce())
            };
            match due {
                None => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = self.wakeup.notified() => {}
                    }
                }
                Some(at) => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        // New arrivals reset the debounce; re-evaluate.
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep_until(at) => {
                            self.flush(&subscriptions, &token);
                        }
                    }
                }
            }
        }
    }

    /// Drains the pending set into staggered batch subscriptions.
    fn flush(self: &Arc<Self>, subscriptions: &Arc<SubscriptionManager>, token: &CancellationToken) {
        let now = Instant::now();
        let batch = {
            let mut queue = self.lock();
            queue.take_pending(now + self.settings.inflight_ceiling())
        };
        if batch.is_empty() {
            return;
        }

        let chunks = chunk(batch, self.settings.batch_size);
        debug!(chunks = chunks.len(), "flushing profile lookups");
        for (index, authors) in chunks.into_iter().enumerate() {
            let resolver = Arc::clone(self);
            let subscriptions = Arc::clone(subscriptions);
            let token = token.clone();
            let delay = self.settings.stagger() * index as u32;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                resolver.fetch_chunk(&subscriptions, &token, authors).await;
            });
        }
    }

    /// Issues one batched kind-0 subscription and closes it again once
    /// the in-flight ceiling has passed.
    async fn fetch_chunk(
        self: &Arc<Self>,
        subscriptions: &Arc<SubscriptionManager>,
        token: &CancellationToken,
        authors: Vec<PublicKey>,
    ) {
        let filter = Filter::new()
            .kind(Kind::Metadata)
            .authors(authors.iter().copied());
        let handlers = {
            let resolver = Arc::clone(self);
            SubscriptionHandlers::new(move |event| resolver.ingest(event))
        };

        match subscriptions.subscribe(filter, handlers).await {
            Ok(handle) => {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.inflight_ceiling()) => {}
                }
                subscriptions.stop(&handle).await;
                self.clear_in_flight(&authors);
            }
            Err(e) => {
                warn!(authors = authors.len(), error = %e, "profile batch subscribe failed");
                self.clear_in_flight(&authors);
            }
        }
    }

    fn clear_in_flight(&self, authors: &[PublicKey]) {
        let mut queue = self.lock();
        for author in authors {
            queue.acknowledge(author);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResolveQueue> {
        self.queue.lock().expect("resolve queue lock poisoned")
    }
}

/// Batching state for profile lookups. All methods are synchronous and
/// take explicit instants, so scheduling decisions are testable without a
/// running clock.
struct ResolveQueue {
    pending: HashSet<PublicKey>,
    first_request: Option<Instant>,
    last_request: Option<Instant>,
    in_flight: HashMap<PublicKey, Instant>,
}

impl ResolveQueue {
    fn new() -> Self {
        Self {
            pending: HashSet::new(),
            first_request: None,
            last_request: None,
            in_flight: HashMap::new(),
        }
    }

    fn enqueue(&mut self, author: PublicKey, now: Instant) -> bool {
        if !self.pending.insert(author) {
            return false;
        }
        self.first_request.get_or_insert(now);
        self.last_request = Some(now);
        true
    }

    /// When the pending set should flush: `debounce` after the most
    /// recent arrival, but never later than `max_debounce` after the
    /// first, so a steady trickle cannot starve the flush.
    fn due_at(&self, debounce: Duration, max_debounce: Duration) -> Option<Instant> {
        let first = self.first_request?;
        let last = self.last_request?;
        Some((last + debounce).min(first + max_debounce))
    }

    /// Drains the pending set, marking every drained author in flight
    /// until `deadline`.
    fn take_pending(&mut self, deadline: Instant) -> Vec<PublicKey> {
        let drained: Vec<PublicKey> = self.pending.drain().collect();
        for author in &drained {
            self.in_flight.insert(*author, deadline);
        }
        self.first_request = None;
        self.last_request = None;
        drained
    }

    fn is_in_flight(&self, author: &PublicKey) -> bool {
        self.in_flight.contains_key(author)
    }

    /// Drops in-flight markers whose ceiling has passed, bounding the
    /// staleness a silent relay can cause.
    fn expire_in_flight(&mut self, now: Instant) {
        self.in_flight.retain(|_, deadline| *deadline > now);
    }

    fn acknowledge(&mut self, author: &PublicKey) {
        self.in_flight.remove(author);
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
        self.first_request = None;
        self.last_request = None;
    }
}

/// Splits a batch into chunks no larger than `size`.
fn chunk(authors: Vec<PublicKey>, size: usize) -> Vec<Vec<PublicKey>> {
    let size = size.max(1);
    authors
        .chunks(size)
        .map(<[PublicKey]>::to_vec)
        .collect()
}
