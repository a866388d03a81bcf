//! k-anonymity range lookups against a Pwned Passwords compatible API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::APP_USER_AGENT;

pub const DEFAULT_API_URL: &str = "https://api.pwnedpasswords.com";

/// Fetches the `SUFFIX:COUNT` rows for a five character SHA-1 prefix.
#[async_trait]
pub trait BreachClient: Send + Sync {
    async fn range(&self, prefix: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HibpClient {
    client: reqwest::Client,
    api_url: String,
}

impl HibpClient {
    /// The timeout is clamped to 1..=5 seconds.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let timeout = timeout.clamp(Duration::from_secs(1), Duration::from_secs(5));
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build breach API client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, prefix: &str) -> Result<String> {
        let url = format!("{}/range/{prefix}", self.api_url);
        let response = self
            .client
            .get(&url)
            .header("Add-Padding", "true")
            .send()
            .await
            .with_context(|| format!("breach API request to {url} failed"))?
            .error_for_status()
            .context("breach API returned an error status")?;
        response
            .text()
            .await
            .context("breach API response read failed")
    }
}

#[async_trait]
impl BreachClient for HibpClient {
    async fn range(&self, prefix: &str) -> Result<String> {
        match self.fetch(prefix).await {
            Ok(body) => Ok(body),
            Err(err) => {
                warn!("Breach lookup failed, retrying once: {err:#}");
                self.fetch(prefix).await
            }
        }
    }
}

/// Parse a range response into `(full uppercase hash, count)` pairs.
pub(crate) fn parse_range(prefix: &str, body: &str) -> Vec<(String, u64)> {
    body.lines()
        .filter_map(|line| {
            let (suffix, count) = line.trim().split_once(':')?;
            let count = count.trim().parse::<u64>().ok()?;
            Some((format!("{prefix}{}", suffix.trim().to_uppercase()), count))
        })
        .collect()
}
