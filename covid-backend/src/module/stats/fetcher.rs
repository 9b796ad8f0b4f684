//! Scraping provider client
//!
//! Posts the fixed scraping payload to the provider and turns the answer
//! into a stamped [`Dataset`].

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use covid_common::Dataset;

use super::error::FetchError;
use super::parser::parse_dataset;
use crate::config::BackendConfig;

/// Longest provider error body kept for the log line
const MAX_ERROR_BODY: usize = 512;

/// Something that can produce a fresh dataset.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch(&self) -> Result<Dataset, FetchError>;
}

/// Fetches statistics from the scraping provider over HTTP.
pub struct ScraperClient {
    client: Client,
    endpoint: String,
    api_key: String,
    payload: String,
}

impl ScraperClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        payload: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("covid-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            payload: payload.into(),
        })
    }

    /// Build the client from configuration, reading the payload file once.
    pub fn from_config(config: &BackendConfig) -> anyhow::Result<Self> {
        let payload_path = &config.scraper.payload_path;
        let payload = std::fs::read_to_string(payload_path)
            .with_context(|| format!("Failed to read scraping payload file '{}'", payload_path))?;

        if config.scraper.api_key.is_empty() {
            tracing::warn!("No scraping provider API key configured, requests will be sent without one");
        }

        Self::new(
            config.scraper.endpoint.as_str(),
            config.scraper.api_key.as_str(),
            payload,
            config.request_timeout(),
        )
        .context("Failed to build scraping provider client")
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DatasetSource for ScraperClient {
    async fn fetch(&self) -> Result<Dataset, FetchError> {
        tracing::info!("Fetching statistics from {}", self.endpoint);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(self.payload.clone());
        if !self.api_key.is_empty() {
            request = request.query(&[("api_key", self.api_key.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(FetchError::Protocol {
                status: status.as_u16(),
                body: truncate(body, MAX_ERROR_BODY),
            });
        }

        let dataset = parse_dataset(&body, Utc::now())?;
        tracing::debug!("Provider returned {} records ({} bytes)", dataset.len(), body.len());
        Ok(dataset)
    }
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}
