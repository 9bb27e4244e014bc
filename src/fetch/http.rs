use anyhow::{Result, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::cli::config::FetchSettings;
use super::{looks_like_challenge, FetchFailure, PageFetcher, ProfileRotator};

/// Plain HTTP fetcher with a shared cookie jar and rotating headers
pub struct HttpFetcher {
    client: Client,
    profiles: ProfileRotator,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .timeout(settings.timeout());

        if let Some(proxy) = &settings.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .context(format!("Invalid proxy URL: {}", proxy))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            profiles: ProfileRotator::new(settings.profiles.clone())?,
        })
    }
}

fn classify_transport(error: &reqwest::Error) -> FetchFailure {
    if error.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Transport(error.to_string())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let mut request = self.client.get(url);
        for (key, value) in self.profiles.headers() {
            request = request.header(key, value);
        }

        let response = request.send().await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        debug!("GET {} -> {}", url, status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchFailure::RateLimited);
        }

        let body = response.text().await
            .map_err(|e| classify_transport(&e))?;

        // Challenge pages often arrive with 403/503, so check them first
        if looks_like_challenge(&body) {
            return Err(FetchFailure::Challenge);
        }

        if !status.is_success() {
            return Err(FetchFailure::HttpError(status.as_u16()));
        }

        Ok(body)
    }
}
