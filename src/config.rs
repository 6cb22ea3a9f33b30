use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../.config/config.json5");

/// Tunables for every component, loadable from a config file and falling
/// back to the embedded defaults.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub cache: CacheSettings,
    pub subscriptions: SubscriptionSettings,
    pub profiles: ProfileSettings,
    pub discovery: DiscoverySettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionSettings {
    pub handshake_timeout_secs: u64,
}

impl ConnectionSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheSettings {
    /// Upper bound on cached events; beyond it the oldest event is
    /// evicted.
    pub capacity: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubscriptionSettings {
    /// Upper bound on concurrently tracked subscription handles.
    pub max_tracked: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileSettings {
    pub ttl_secs: u64,
    pub debounce_ms: u64,
    /// Cap on total debounce delay so a steady trickle of requests cannot
    /// postpone flushing forever.
    pub max_debounce_ms: u64,
    pub batch_size: usize,
    pub stagger_ms: u64,
    pub inflight_ceiling_secs: u64,
}

impl ProfileSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_debounce(&self) -> Duration {
        Duration::from_millis(self.max_debounce_ms)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn inflight_ceiling(&self) -> Duration {
        Duration::from_secs(self.inflight_ceiling_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DiscoverySettings {
    /// Relays queried for monitor announcements and reports.
    pub relays: Vec<String>,
    /// Hand-maintained candidates, always present in the catalog.
    pub curated: Vec<String>,
    pub baseline_confidence: f64,
    pub min_confidence: f64,
    pub report_window_hours: u64,
    pub monitor_window_days: u64,
    pub finalize_timeout_secs: u64,
    pub refresh_ttl_secs: u64,
}

impl DiscoverySettings {
    pub fn report_window(&self) -> Duration {
        Duration::from_secs(self.report_window_hours * 60 * 60)
    }

    pub fn monitor_window(&self) -> Duration {
        Duration::from_secs(self.monitor_window_days * 24 * 60 * 60)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        json5::from_str(DEFAULT_CONFIG).expect("embedded default config is valid")
    }
}

impl Settings {
    /// Loads settings from the platform config directory, layered over the
    /// embedded defaults. Missing files are fine; a file that exists but
    /// fails to parse is an error.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Json5));

        if let Some(config_dir) = Self::config_dir() {
            let config_files = [
                ("config.json5", config::FileFormat::Json5),
                ("config.json", config::FileFormat::Json),
                ("config.yaml", config::FileFormat::Yaml),
                ("config.toml", config::FileFormat::Toml),
            ];
            for (file, format) in &config_files {
                builder = builder.add_source(
                    config::File::from(config_dir.join(file))
                        .format(*format)
                        .required(false),
                );
            }
        }

        builder.build()?.try_deserialize()
    }

    fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "relayscope", "relayscope")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }
}
