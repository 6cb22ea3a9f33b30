//! Relay information document fetch (NIP-11).

use std::time::Duration;

use nostr_sdk::prelude::RelayUrl;
use tracing::debug;

use crate::domain::relay::RelayInformation;

const FETCH_TIMEOUT: Duration = Duration::from_secs(7);

/// Fetches the relay's information document over HTTP: same address with
/// the scheme swapped (`wss` to `https`, `ws` to `http`) and an
/// `application/nostr+json` accept header. Every failure, including a
/// non-200 response, is treated as "no metadata".
pub async fn fetch(url: &RelayUrl) -> Option<RelayInformation> {
    // "ws..." and "wss..." both become "http..." by replacing the two
    // leading characters.
    let http_url = format!("http{}", &url.as_str()[2..]);

    let client = match reqwest::Client::builder().timeout(FETCH_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "could not build http client for relay information");
            return None;
        }
    };

    let response = match client
        .get(&http_url)
        .header("Accept", "application/nostr+json")
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %http_url, error = %e, "relay information request failed");
            return None;
        }
    };

    if !response.status().is_success() {
        debug!(url = %http_url, status = %response.status(), "relay advertises no information document");
        return None;
    }

    match response.json::<RelayInformation>().await {
        Ok(info) => Some(info),
        Err(e) => {
            debug!(url = %http_url, error = %e, "malformed relay information document");
            None
        }
    }
}
