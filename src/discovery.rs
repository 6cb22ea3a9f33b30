use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nostr_sdk::prelude::{Event, Filter, Kind, PublicKey, RelayUrl, SubscriptionId, Timestamp};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DiscoverySettings;
use crate::domain::relay::{
    DiscoveryReport, MonitorAnnouncement, RelayCandidate, RelayHealth, MONITOR_ANNOUNCEMENT_KIND,
    RELAY_DISCOVERY_KIND,
};
use crate::error::{Error, Result};
use crate::transport::{RelayNotification, RelayTransport, TransportError};

/// Starting reliability weight for a newly seen monitor.
const MONITOR_BASE_WEIGHT: f64 = 0.5;
/// Weight gained each time the same monitor is observed again.
const MONITOR_WEIGHT_STEP: f64 = 0.1;
/// Reports are capped per candidate to bound memory under a hostile
/// reporter.
const MAX_REPORTS_PER_CANDIDATE: usize = 256;

/// Produces a confidence-ranked catalog of connectable relays by merging
/// a curated list with third-party monitor reports.
///
/// The curated list is seeded synchronously and is the floor the catalog
/// can never fall below: every network or parse failure during discovery
/// degrades to "curated only", silently. Only an explicit [`refresh`]
/// reports failure, and even then the previously built catalog stays
/// visible.
///
/// [`refresh`]: RelayDirectory::refresh
pub struct RelayDirectory {
    transport: Arc<dyn RelayTransport>,
    settings: DiscoverySettings,
    book: Mutex<CandidateBook>,
    loading: AtomicBool,
    refreshing: AtomicBool,
    last_run: Mutex<Option<Instant>>,
}

impl RelayDirectory {
    pub fn new(transport: Arc<dyn RelayTransport>, settings: DiscoverySettings) -> Self {
        let book = CandidateBook::new(&settings);
        Self {
            transport,
            settings,
            book: Mutex::new(book),
            loading: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
            last_run: Mutex::new(None),
        }
    }

    /// The current catalog: curated entries first, then discovered
    /// entries sorted by descending confidence. Always renders, even
    /// before or without any discovery run. Reading the catalog past the
    /// refresh TTL triggers one background refresh.
    pub fn candidates(self: &Arc<Self>) -> Vec<RelayCandidate> {
        self.maybe_background_refresh();
        self.lock_book().candidates(Timestamp::now())
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Runs discovery and returns the resulting catalog. Failures degrade
    /// silently to the curated floor; this never errors.
    pub async fn discover(self: &Arc<Self>) -> Vec<RelayCandidate> {
        if let Err(e) = self.run_discovery().await {
            debug!(error = %e, "discovery degraded to curated list");
        }
        self.lock_book().candidates(Timestamp::now())
    }

    /// Discards all discovered (non-curated) state and re-runs discovery.
    /// On failure the previous catalog is restored and the error is
    /// surfaced; this is the only discovery path allowed to fail loudly.
    pub async fn refresh(self: &Arc<Self>) -> Result<Vec<RelayCandidate>> {
        let saved = self.lock_book().take_discovered();
        match self.run_discovery().await {
            Ok(()) => Ok(self.lock_book().candidates(Timestamp::now())),
            Err(e) => {
                self.lock_book().restore_discovered(saved);
                Err(Error::Discovery(e.to_string()))
            }
        }
    }

    async fn run_discovery(&self) -> std::result::Result<(), TransportError> {
        self.loading.store(true, Ordering::SeqCst);
        let outcome = self.run_discovery_inner().await;
        self.loading.store(false, Ordering::SeqCst);
        *self.last_run.lock().expect("last-run lock poisoned") = Some(Instant::now());
        self.transport.disconnect().await;
        outcome
    }

    async fn run_discovery_inner(&self) -> std::result::Result<(), TransportError> {
        let mut notifications = self.transport.notifications();

        let mut connected = false;
        for address in &self.settings.relays {
            let url = match RelayUrl::parse(address) {
                Ok(url) => url,
                Err(e) => {
                    warn!(address = %address, error = %e, "skipping unusable discovery relay");
                    continue;
                }
            };
            match self.transport.connect(&url).await {
                Ok(()) => {
                    info!(relay = %url, "discovery relay connected");
                    connected = true;
                    break;
                }
                Err(e) => warn!(relay = %url, error = %e, "discovery relay unreachable"),
            }
        }
        if !connected {
            return Err(TransportError::Connect(String::from(
                "no discovery relay reachable",
            )));
        }

        // Phase 1: learn which monitors exist, within a bounded window.
        let monitor_filter = Filter::new()
            .kind(Kind::from(MONITOR_ANNOUNCEMENT_KIND))
            .since(Timestamp::now() - self.settings.monitor_window())
            .limit(200);
        self.collect(&mut notifications, monitor_filter).await?;

        // Phase 2: gather candidate reports. Once any monitors are known
        // the query is scoped to them; otherwise any reporter is accepted
        // so discovery can bootstrap.
        let mut report_filter = Filter::new()
            .kind(Kind::from(RELAY_DISCOVERY_KIND))
            .since(Timestamp::now() - self.settings.report_window());
        let monitors = self.lock_book().monitor_keys();
        if !monitors.is_empty() {
            report_filter = report_filter.authors(monitors);
        }
        self.collect(&mut notifications, report_filter).await?;

        Ok(())
    }

    /// Opens one subscription and ingests its events until EOSE or the
    /// finalize timeout, whichever comes first. Aggregation is
    /// incremental: the catalog improves report by report, not at stream
    /// end.
    async fn collect(
        &self,
        notifications: &mut broadcast::Receiver<RelayNotification>,
        filter: Filter,
    ) -> std::result::Result<(), TransportError> {
        let id = SubscriptionId::generate();
        self.transport.subscribe(id.clone(), filter).await?;

        let deadline = Instant::now() + self.settings.finalize_timeout();
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(subscription = %id, "discovery window elapsed before EOSE");
                    break;
                }
                notification = notifications.recv() => match notification {
                    Ok(RelayNotification::Event { subscription_id, event }) if subscription_id == id => {
                        self.ingest(&event);
                    }
                    Ok(RelayNotification::EndOfStoredEvents { subscription_id }) if subscription_id == id => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "discovery notification stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        self.transport.unsubscribe(&id).await;
        Ok(())
    }

    fn ingest(&self, event: &Event) {
        if let Some(announcement) = MonitorAnnouncement::from_event(event) {
            self.lock_book().note_monitor(announcement.monitor);
        } else if let Some(report) = DiscoveryReport::from_event(event) {
            self.lock_book().ingest_report(report);
        } else {
            debug!(kind = %event.kind, "ignoring unrecognized discovery event");
        }
    }

    fn maybe_background_refresh(self: &Arc<Self>) {
        let stale = self
            .last_run
            .lock()
            .expect("last-run lock poisoned")
            .is_some_and(|at| at.elapsed() >= self.settings.refresh_ttl());
        if !stale {
            return;
        }
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }
        let directory = Arc::clone(self);
        tokio::spawn(async move {
            debug!("catalog past its TTL, refreshing in the background");
            let _ = directory.discover().await;
            directory.refreshing.store(false, Ordering::SeqCst);
        });
    }

    fn lock_book(&self) -> std::sync::MutexGuard<'_, CandidateBook> {
        self.book.lock().expect("candidate book lock poisoned")
    }
}

/// Pure aggregation state behind the directory: curated entries, monitor
/// weights and the report log. All scoring lives here so it can be tested
/// without a transport.
struct CandidateBook {
    baseline_confidence: f64,
    min_confidence: f64,
    report_window_secs: u64,
    curated: Vec<RelayUrl>,
    monitors: HashMap<PublicKey, f64>,
    reports: HashMap<RelayUrl, Vec<DiscoveryReport>>,
}

impl CandidateBook {
    fn new(settings: &DiscoverySettings) -> Self {
        let curated = settings
            .curated
            .iter()
            .filter_map(|address| match RelayUrl::parse(address) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(address = %address, error = %e, "skipping unusable curated relay");
                    None
                }
            })
            .collect();
        Self {
            baseline_confidence: settings.baseline_confidence.clamp(0.0, 1.0),
            min_confidence: settings.min_confidence.clamp(0.0, 1.0),
            report_window_secs: settings.report_window().as_secs(),
            curated,
            monitors: HashMap::new(),
            reports: HashMap::new(),
        }
    }

    /// Observes a monitor. First sighting starts at the base weight,
    /// repeat sightings step toward 1.0.
    fn note_monitor(&mut self, monitor: PublicKey) {
        self.monitors
            .entry(monitor)
            .and_modify(|weight| *weight = (*weight + MONITOR_WEIGHT_STEP).min(1.0))
            .or_insert(MONITOR_BASE_WEIGHT);
    }

    fn monitor_keys(&self) -> Vec<PublicKey> {
        self.monitors.keys().copied().collect()
    }

    fn ingest_report(&mut self, report: DiscoveryReport) {
        let entries = self.reports.entry(report.url.clone()).or_default();
        let duplicate = entries
            .iter()
            .any(|entry| entry.reporter == report.reporter && entry.created_at == report.created_at);
        if duplicate || entries.len() >= MAX_REPORTS_PER_CANDIDATE {
            return;
        }
        entries.push(report);
    }

    /// Confidence for one candidate's report log at time `now`:
    /// reports within the window over `max(distinct reporters, 3)`.
    ///
    /// The raw formula exceeds 1.0 when a single reporter repeats inside
    /// the window; it is clamped to 1.0 here.
    fn confidence(&self, entries: &[DiscoveryReport], now: Timestamp) -> f64 {
        let cutoff = now.as_u64().saturating_sub(self.report_window_secs);
        let recent: Vec<&DiscoveryReport> = entries
            .iter()
            .filter(|entry| entry.created_at.as_u64() >= cutoff)
            .collect();
        if recent.is_empty() {
            return 0.0;
        }
        let mut reporters: Vec<PublicKey> = recent.iter().map(|entry| entry.reporter).collect();
        reporters.sort();
        reporters.dedup();
        let distinct = reporters.len().max(3);
        (recent.len() as f64 / distinct as f64).min(1.0)
    }

    /// The merged catalog. Curated entries always come first, keep at
    /// least the baseline confidence and are never displaced by a
    /// discovered duplicate of the same address. Discovered entries below
    /// the confidence threshold are not surfaced.
    fn candidates(&self, now: Timestamp) -> Vec<RelayCandidate> {
        let mut catalog = Vec::new();

        for url in &self.curated {
            let entries = self.reports.get(url).map(Vec::as_slice).unwrap_or(&[]);
            let mut candidate = self.candidate_from_reports(url.clone(), entries, now);
            candidate.curated = true;
            candidate.confidence = candidate.confidence.max(self.baseline_confidence);
            catalog.push(candidate);
        }

        let mut discovered: Vec<RelayCandidate> = self
            .reports
            .iter()
            .filter(|(url, _)| !self.curated.contains(*url))
            .map(|(url, entries)| self.candidate_from_reports(url.clone(), entries, now))
            .filter(|candidate| candidate.confidence >= self.min_confidence)
            .collect();
        discovered.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.url.as_str().cmp(b.url.as_str()))
        });

        catalog.extend(discovered);
        catalog
    }

    fn candidate_from_reports(
        &self,
        url: RelayUrl,
        entries: &[DiscoveryReport],
        now: Timestamp,
    ) -> RelayCandidate {
        let confidence = self.confidence(entries, now);
        let last_checked = entries.iter().map(|entry| entry.created_at).max();
        let newest = entries.iter().max_by_key(|entry| entry.created_at);
        let mut reporters: Vec<PublicKey> = entries.iter().map(|entry| entry.reporter).collect();
        reporters.sort();
        reporters.dedup();

        let cutoff = now.as_u64().saturating_sub(self.report_window_secs);
        let health = match last_checked {
            Some(at) if at.as_u64() >= cutoff => RelayHealth::Online,
            Some(_) => RelayHealth::Offline,
            None => RelayHealth::Unknown,
        };

        RelayCandidate {
            url,
            name: newest.and_then(|entry| entry.name.clone()),
            description: newest.and_then(|entry| entry.description.clone()),
            health,
            last_checked,
            supported_nips: newest.map(|entry| entry.supported_nips.clone()).unwrap_or_default(),
            confidence,
            reporters,
            curated: false,
        }
    }

    /// Rips out the discovered half of the book, leaving curated entries
    /// and monitor weights intact. The return value can be restored if
    /// the re-run fails.
    fn take_discovered(&mut self) -> HashMap<RelayUrl, Vec<DiscoveryReport>> {
        std::mem::take(&mut self.reports)
    }

    fn restore_discovered(&mut self, reports: HashMap<RelayUrl, Vec<DiscoveryReport>>) {
        self.reports = reports;
    }
}

#[cfg(test)]
mod tests {
    use nostr_sdk::prelude::Keys;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Settings;

    fn book() -> CandidateBook {
        CandidateBook::new(&test_settings())
    }

    fn test_settings() -> DiscoverySettings {
        let mut settings = Settings::default().discovery;
        settings.curated = vec![
            String::from("wss://curated-one.example"),
            String::from("wss://curated-two.example"),
        ];
        settings.baseline_confidence = 0.6;
        settings.min_confidence = 0.2;
        settings
    }

    fn report(reporter: &Keys, url: &str, created_at: u64) -> DiscoveryReport {
        DiscoveryReport {
            reporter: reporter.public_key(),
            url: RelayUrl::parse(url).expect("valid url"),
            created_at: Timestamp::from(created_at),
            name: None,
            description: None,
            supported_nips: Vec::new(),
        }
    }

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_curated_entries_render_before_any_discovery() {
        let catalog = book().candidates(Timestamp::from(NOW));
        assert_eq!(catalog.len(), 2);
        assert!(catalog.iter().all(|c| c.curated));
        assert!(catalog.iter().all(|c| c.confidence == 0.6));
        assert!(catalog.iter().all(|c| c.health == RelayHealth::Unknown));
    }

    #[test]
    fn test_confidence_is_clamped_by_distinct_reporters() {
        let mut book = book();
        let reporter = Keys::generate();
        // Five reports from one reporter inside the window: the raw
        // formula would give 5/3; it must clamp to 1.0 at most, and the
        // bound says confidence <= count / max(distinct, 3).
        for i in 0..5 {
            book.ingest_report(report(&reporter, "wss://spam.example", NOW - i));
        }
        let entries = book.reports[&RelayUrl::parse("wss://spam.example").expect("url")].clone();
        let confidence = book.confidence(&entries, Timestamp::from(NOW));
        assert_eq!(confidence, 1.0);

        // A single report from a single reporter: 1 / max(1, 3) = 1/3.
        let mut book2 = self::book();
        let lone = Keys::generate();
        book2.ingest_report(report(&lone, "wss://lone.example", NOW));
        let entries = book2.reports[&RelayUrl::parse("wss://lone.example").expect("url")].clone();
        assert_eq!(book2.confidence(&entries, Timestamp::from(NOW)), 1.0 / 3.0);
    }

    #[test]
    fn test_confidence_ignores_reports_outside_window() {
        let mut book = book();
        let reporter = Keys::generate();
        let day = 24 * 60 * 60;
        book.ingest_report(report(&reporter, "wss://old.example", NOW - 2 * day));

        let catalog = book.candidates(Timestamp::from(NOW));
        // Stale-only candidates score 0.0 and fall under the threshold.
        assert!(catalog.iter().all(|c| c.url.as_str() != "wss://old.example/"));
    }

    #[test]
    fn test_low_confidence_candidates_are_not_surfaced() {
        let mut book = book();
        book.min_confidence = 0.4;
        let reporter = Keys::generate();
        book.ingest_report(report(&reporter, "wss://faint.example", NOW));

        // 1/3 < 0.4: hidden.
        let catalog = book.candidates(Timestamp::from(NOW));
        assert_eq!(catalog.len(), 2, "only curated entries remain");
    }

    #[test]
    fn test_discovered_sorted_by_descending_confidence() {
        let mut book = book();
        let reporters: Vec<Keys> = (0..4).map(|_| Keys::generate()).collect();

        for reporter in &reporters {
            book.ingest_report(report(reporter, "wss://strong.example", NOW - 10));
        }
        book.ingest_report(report(&reporters[0], "wss://weak.example", NOW - 10));

        let catalog = book.candidates(Timestamp::from(NOW));
        let discovered: Vec<&RelayCandidate> =
            catalog.iter().filter(|c| !c.curated).collect();
        assert_eq!(discovered.len(), 2);
        assert_eq!(discovered[0].url.as_str(), "wss://strong.example/");
        assert_eq!(discovered[0].confidence, 1.0);
        assert_eq!(discovered[1].confidence, 1.0 / 3.0);
        assert_eq!(discovered[0].reporters.len(), 4);
    }

    #[test]
    fn test_curated_wins_identity_collisions() {
        let mut book = book();
        let reporters: Vec<Keys> = (0..4).map(|_| Keys::generate()).collect();
        for reporter in &reporters {
            book.ingest_report(report(reporter, "wss://curated-one.example", NOW - 10));
        }

        let catalog = book.candidates(Timestamp::from(NOW));
        let matches: Vec<&RelayCandidate> = catalog
            .iter()
            .filter(|c| c.url.as_str() == "wss://curated-one.example/")
            .collect();
        assert_eq!(matches.len(), 1, "no discovered duplicate of a curated url");
        assert!(matches[0].curated);
        // Reports still enrich the curated entry.
        assert_eq!(matches[0].health, RelayHealth::Online);
        assert_eq!(matches[0].reporters.len(), 4);
        assert!(matches[0].confidence >= 0.6);
    }

    #[test]
    fn test_monitor_weights_step_toward_one() {
        let mut book = book();
        let monitor = Keys::generate().public_key();

        book.note_monitor(monitor);
        assert_eq!(book.monitors.get(&monitor).copied(), Some(0.5));

        for _ in 0..10 {
            book.note_monitor(monitor);
        }
        assert_eq!(book.monitors.get(&monitor).copied(), Some(1.0));
    }

    #[test]
    fn test_duplicate_reports_are_ignored() {
        let mut book = book();
        let reporter = Keys::generate();
        book.ingest_report(report(&reporter, "wss://dup.example", NOW));
        book.ingest_report(report(&reporter, "wss://dup.example", NOW));

        let url = RelayUrl::parse("wss://dup.example").expect("url");
        assert_eq!(book.reports[&url].len(), 1);
    }

    #[test]
    fn test_take_discovered_keeps_curated_and_monitors() {
        let mut book = book();
        let reporter = Keys::generate();
        book.note_monitor(reporter.public_key());
        book.ingest_report(report(&reporter, "wss://gone.example", NOW));

        let saved = book.take_discovered();
        assert_eq!(book.candidates(Timestamp::from(NOW)).len(), 2);
        assert_eq!(book.monitor_keys().len(), 1);

        book.restore_discovered(saved);
        assert!(book
            .candidates(Timestamp::from(NOW))
            .iter()
            .any(|c| c.url.as_str() == "wss://gone.example/"));
    }
}
