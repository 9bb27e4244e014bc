pub mod fingerprint;
pub mod http;
pub mod retry;
#[cfg(feature = "browser")]
pub mod session;

use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::cli::config::{FetchMode, FetchSettings};
use crate::utils::metrics::MetricsCollector;

// Re-export common types
pub use fingerprint::ProfileRotator;
pub use http::HttpFetcher;
pub use retry::{RetryPolicy, RetryingFetcher};

/// Why a page could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP error {0}")]
    HttpError(u16),

    #[error("anti-bot challenge page")]
    Challenge,

    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchFailure {
    /// Whether another attempt may succeed. Client errors other than 429 are final.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::HttpError(status) => !(400..500).contains(status),
            _ => true,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Timeout => "timeout",
            FetchFailure::HttpError(_) => "http_error",
            FetchFailure::Challenge => "challenge",
            FetchFailure::RateLimited => "rate_limited",
            FetchFailure::Transport(_) => "transport",
        }
    }
}

/// Returns the raw HTML of a page, or why it could not
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchFailure>;
}

/// Markers of interstitial anti-bot pages served instead of content
pub fn looks_like_challenge(body: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "Just a moment...",
        "cf-browser-verification",
        "challenge-platform",
        "Checking your browser before accessing",
    ];

    MARKERS.iter().any(|marker| body.contains(marker))
}

/// Build the configured fetcher wrapped in timeout/retry handling
pub fn build_fetcher(settings: &FetchSettings, metrics: MetricsCollector) -> Result<Arc<dyn PageFetcher>> {
    let inner: Arc<dyn PageFetcher> = match settings.mode {
        FetchMode::Http => Arc::new(HttpFetcher::new(settings)?),
        #[cfg(feature = "browser")]
        FetchMode::Browser => Arc::new(session::BrowserFetcher::new(settings)?),
        #[cfg(not(feature = "browser"))]
        FetchMode::Browser => {
            anyhow::bail!("Browser fetch mode requires the `browser` feature");
        }
    };

    Ok(Arc::new(RetryingFetcher::new(inner, RetryPolicy::from_settings(settings), metrics)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_final() {
        assert!(!FetchFailure::HttpError(404).is_transient());
        assert!(!FetchFailure::HttpError(403).is_transient());
        assert!(FetchFailure::HttpError(503).is_transient());
        assert!(FetchFailure::RateLimited.is_transient());
        assert!(FetchFailure::Timeout.is_transient());
        assert!(FetchFailure::Challenge.is_transient());
    }

    #[test]
    fn detects_cloudflare_interstitial() {
        assert!(looks_like_challenge("<title>Just a moment...</title>"));
        assert!(!looks_like_challenge("<article class=\"message\">ok</article>"));
    }
}
