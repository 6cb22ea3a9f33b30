//! Logging utilities

use tracing_subscriber::EnvFilter;

/// Installs a global tracing subscriber writing to stderr.
///
/// `RUST_LOG` overrides the default filter, which keeps this crate at
/// `info` and quiets the protocol stack. Calling this more than once is
/// harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}=info,nostr_sdk=warn,tokio_tungstenite=warn,tungstenite=warn",
            env!("CARGO_CRATE_NAME")
        ))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
