// src/fetch/client.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::{parse_response, SeriesRequest, SeriesSource};
use crate::config::Settings;
use crate::series::AnnualSeries;

/// HTTP client for the CCKP timeseries API.
#[derive(Clone)]
pub struct CckpClient {
    client: Client,
    base: String,
    max_retries: u32,
    initial_backoff_ms: u64,
}

impl CckpClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .gzip(true)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            base: settings.api_base.clone(),
            max_retries: settings.max_retries,
            initial_backoff_ms: settings.initial_backoff_ms,
        })
    }

    async fn get_text_core(&self, url: &Url) -> Result<String> {
        debug!("Fetching text from {}", url);
        self.client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Non-success status {}", url))?
            .text()
            .await
            .with_context(|| format!("Reading text from {}", url))
    }

    async fn get_text_with_retry(&self, url: &Url) -> Result<String> {
        let mut attempts = 0;
        loop {
            match self.get_text_core(url).await {
                Ok(t) => return Ok(t),
                Err(e) if attempts < self.max_retries => {
                    attempts += 1;
                    let backoff = backoff_ms(self.initial_backoff_ms, attempts);
                    warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "Retrying");
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    error!(%url, error = %e, "Exhausted retries");
                    return Err(e);
                }
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based), doubling each time.
fn backoff_ms(initial_ms: u64, attempt: u32) -> u64 {
    initial_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[async_trait]
impl SeriesSource for CckpClient {
    #[instrument(level = "info", skip(self, request), fields(series = %request))]
    async fn fetch(&self, request: &SeriesRequest) -> Result<AnnualSeries> {
        let url = request.url(&self.base)?;
        let body = self.get_text_with_retry(&url).await?;
        parse_response(&body, request).with_context(|| format!("parsing response from {}", url))
    }
}
