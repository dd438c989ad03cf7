//! Process-wide HTTP client.
//!
//! All providers share one `reqwest::Client`, and with it one connection
//! pool with idle-connection reuse. The first call fixes the timeouts;
//! later calls get the same client regardless of their config.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use crate::config::HttpConfig;

static CLIENT: OnceLock<Client> = OnceLock::new();

/// The shared pooled client, built from `config` on first use.
pub fn shared_client(config: &HttpConfig) -> Result<Client> {
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let client = build_client(config)?;
    // A concurrent caller may have won the race; either client is fine.
    Ok(CLIENT.get_or_init(|| client).clone())
}

fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .build()
        .context("Failed to create HTTP client")
}

/// Whether a failed request is worth retrying: rate limits and server
/// errors are, other client errors are not.
pub fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Exponential backoff before retry `attempt` (1-based): 1s, 2s, 4s, … 32s.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}
