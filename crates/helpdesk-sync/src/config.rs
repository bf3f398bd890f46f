use std::time::Duration;

use anyhow::{Context, Result};

use crate::ingress::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST API, without a trailing slash.
    pub api_url: String,
    /// WebSocket URL of the change feed.
    pub feed_url: String,
    pub retry: RetryPolicy,
    /// `None` disables periodic reconciliation.
    pub reconcile_interval: Option<Duration>,
    /// Skip increments for the room the user is currently viewing.
    pub suppress_open_room: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".into(),
            feed_url: "ws://127.0.0.1:3000/realtime".into(),
            retry: RetryPolicy::default(),
            reconcile_interval: Some(Duration::from_secs(60)),
            suppress_open_room: true,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let api_url = std::env::var("HELPDESK_API_URL").unwrap_or(defaults.api_url);
        let feed_url = std::env::var("HELPDESK_FEED_URL").unwrap_or(defaults.feed_url);

        let max_attempts: u32 = std::env::var("HELPDESK_SUBSCRIBE_ATTEMPTS")
            .unwrap_or_else(|_| defaults.retry.max_attempts.to_string())
            .parse()
            .context("HELPDESK_SUBSCRIBE_ATTEMPTS must be a number")?;
        let step_ms: u64 = std::env::var("HELPDESK_RETRY_STEP_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .context("HELPDESK_RETRY_STEP_MS must be a number of milliseconds")?;
        let reconcile_secs: u64 = std::env::var("HELPDESK_RECONCILE_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .context("HELPDESK_RECONCILE_SECS must be a number of seconds")?;
        let suppress_open_room = parse_flag(
            &std::env::var("HELPDESK_SUPPRESS_OPEN_ROOM").unwrap_or_else(|_| "true".into()),
        )
        .context("HELPDESK_SUPPRESS_OPEN_ROOM must be true or false")?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            feed_url,
            retry: RetryPolicy {
                max_attempts,
                step: Duration::from_millis(step_ms),
            },
            reconcile_interval: (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs)),
            suppress_open_room,
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {}", other),
    }
}
