use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use rand::{thread_rng, Rng};
use tracing::{debug, warn};

use crate::cli::config::FetchSettings;
use crate::utils::metrics::MetricsCollector;
use super::{FetchFailure, PageFetcher};

/// Attempt limits and waits applied around every fetch
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub rate_limit_backoff: Duration,
    pub delay_range: (Duration, Duration),
}

impl RetryPolicy {
    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            attempt_timeout: settings.timeout(),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            rate_limit_backoff: Duration::from_millis(settings.rate_limit_backoff_ms),
            delay_range: (
                Duration::from_millis(settings.delay_range_ms.0),
                Duration::from_millis(settings.delay_range_ms.1),
            ),
        }
    }

    /// Wait before retrying after the given zero-based attempt:
    /// `base * 2^attempt * jitter` with jitter in [1, 2)
    pub fn backoff(&self, attempt: u32, failure: &FetchFailure) -> Duration {
        let exp = self.backoff_base.saturating_mul(1u32 << attempt.min(16));
        let jitter: f64 = thread_rng().gen_range(1.0..2.0);
        let wait = exp.mul_f64(jitter);

        match failure {
            FetchFailure::RateLimited => wait.max(self.rate_limit_backoff),
            _ => wait,
        }
    }

    /// Politeness pause after a successful fetch
    pub fn politeness_delay(&self) -> Duration {
        let (min, max) = self.delay_range;
        if max <= min {
            return min;
        }
        let millis = thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Wraps a fetcher with per-attempt timeouts, bounded retries and pacing
pub struct RetryingFetcher {
    inner: Arc<dyn PageFetcher>,
    policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl RetryingFetcher {
    pub fn new(inner: Arc<dyn PageFetcher>, policy: RetryPolicy, metrics: MetricsCollector) -> Self {
        Self { inner, policy, metrics }
    }

    async fn attempt(&self, url: &str) -> Result<String, FetchFailure> {
        match tokio::time::timeout(self.policy.attempt_timeout, self.inner.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::Timeout),
        }
    }
}

#[async_trait]
impl PageFetcher for RetryingFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let mut attempt = 0;

        loop {
            let timer = self.metrics.start_timer();
            let result = self.attempt(url).await;

            match result {
                Ok(body) => {
                    self.metrics.record_request(true, timer.end(), body.len()).await;
                    tokio::time::sleep(self.policy.politeness_delay()).await;
                    return Ok(body);
                }
                Err(failure) => {
                    self.metrics.record_request(false, timer.end(), 0).await;

                    let retrying = failure.is_transient() && attempt + 1 < self.policy.max_attempts;
                    self.metrics.record_failure(failure.kind(), retrying).await;

                    if !retrying {
                        warn!("Giving up on {} after {} attempt(s): {}", url, attempt + 1, failure);
                        return Err(failure);
                    }

                    let wait = self.policy.backoff(attempt, &failure);
                    debug!("Attempt {} for {} failed ({}), retrying in {:?}", attempt + 1, url, failure, wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
