//! Periodic self-check that keeps a serverless GPU instance resident.
//!
//! Every tick hits `health` and then `generate` over plain HTTP, exactly like
//! an external client would. Failures are logged and dropped; the next tick
//! is the retry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::auth::{Credential, API_KEY_HEADER};
use crate::health::HealthStatus;

pub const DEFAULT_KEEP_WARM_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_KEEP_WARM_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_KEEP_WARM_PROMPT: &str = "a lighthouse at dusk";

#[derive(Debug, Clone)]
pub struct KeepWarmConfig {
    pub health_url: String,
    pub generate_url: String,
    pub credential: Option<Credential>,
    pub prompt: String,
    pub interval: Duration,
    /// Per-request timeout; generate may sit behind a cold start.
    pub request_timeout: Duration,
}

impl KeepWarmConfig {
    pub fn new(health_url: impl Into<String>, generate_url: impl Into<String>) -> Self {
        Self {
            health_url: health_url.into(),
            generate_url: generate_url.into(),
            credential: None,
            prompt: DEFAULT_KEEP_WARM_PROMPT.to_string(),
            interval: DEFAULT_KEEP_WARM_INTERVAL,
            request_timeout: DEFAULT_KEEP_WARM_TIMEOUT,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckFailure {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("undecodable health body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOutcome {
    pub bytes: usize,
    pub completed_at: DateTime<Utc>,
}

/// Outcome of one tick. Each call succeeds or fails on its own.
#[derive(Debug)]
pub struct TickReport {
    pub health: Result<HealthStatus, CheckFailure>,
    pub generate: Result<GenerateOutcome, CheckFailure>,
}

impl TickReport {
    pub fn is_ok(&self) -> bool {
        self.health.is_ok() && self.generate.is_ok()
    }
}

pub struct KeepWarmJob {
    client: Client,
    config: KeepWarmConfig,
}

impl KeepWarmJob {
    pub fn new(config: KeepWarmConfig) -> Result<Self> {
        ensure!(!config.interval.is_zero(), "keep-warm interval must be non-zero");
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build keep-warm HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &KeepWarmConfig {
        &self.config
    }

    /// One stateless round of calls.
    pub async fn tick(&self) -> TickReport {
        let health = self.check_health().await;
        match &health {
            Ok(status) => info!(timestamp = %status.timestamp.to_rfc3339(), "health check ok"),
            Err(e) => warn!(url = %self.config.health_url, error = %e, "health check failed"),
        }

        let generate = self.check_generate().await;
        match &generate {
            Ok(outcome) => info!(
                completed_at = %outcome.completed_at.to_rfc3339(),
                bytes = outcome.bytes,
                "generate endpoint warmed"
            ),
            Err(e) => warn!(url = %self.config.generate_url, error = %e, "generate call failed"),
        }

        TickReport { health, generate }
    }

    /// Runs forever on wall-clock aligned ticks. Stop it by aborting the task.
    pub async fn run(self) {
        let first = next_aligned_delay(SystemTime::now(), self.config.interval);
        info!(
            interval_secs = self.config.interval.as_secs(),
            first_tick_in_secs = first.as_secs(),
            health_url = %self.config.health_url,
            generate_url = %self.config.generate_url,
            "keep-warm job scheduled"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + first, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn check_health(&self) -> Result<HealthStatus, CheckFailure> {
        let response = self.client.get(&self.config.health_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CheckFailure::Status(status));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn check_generate(&self) -> Result<GenerateOutcome, CheckFailure> {
        let mut request = self
            .client
            .get(&self.config.generate_url)
            .query(&[("prompt", self.config.prompt.as_str())]);
        if let Some(credential) = &self.config.credential {
            request = request.header(API_KEY_HEADER, credential.expose());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CheckFailure::Status(status));
        }
        let body = response.bytes().await?;
        Ok(GenerateOutcome {
            bytes: body.len(),
            completed_at: Utc::now(),
        })
    }
}

/// Delay until the next multiple of `interval` since the Unix epoch, so a
/// 5 minute interval fires like `*/5 * * * *`.
pub fn next_aligned_delay(now: SystemTime, interval: Duration) -> Duration {
    let period = interval.as_nanos();
    if period == 0 {
        return Duration::ZERO;
    }
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    match since_epoch % period {
        0 => Duration::ZERO,
        rem => Duration::from_nanos((period - rem) as u64),
    }
}
