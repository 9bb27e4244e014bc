use std::sync::Mutex;
use std::time::Duration;
use anyhow::{Result, Context};
use async_trait::async_trait;
use thirtyfour::prelude::*;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info};

use crate::cli::config::FetchSettings;
use super::{looks_like_challenge, FetchFailure, PageFetcher, ProfileRotator};

/// Fetches pages through a bounded pool of WebDriver sessions, for sites
/// that only serve content to a real browser
pub struct BrowserFetcher {
    settings: FetchSettings,
    profiles: ProfileRotator,

    /// Sessions not currently lent out
    idle: Mutex<Vec<WebDriver>>,

    /// Caps live sessions at `browser_sessions`
    permits: Semaphore,
}

/// A session lent to one fetch. Returned to the pool on drop unless discarded.
struct SessionLease<'a> {
    driver: Option<WebDriver>,
    pool: &'a Mutex<Vec<WebDriver>>,
    _permit: SemaphorePermit<'a>,
}

impl<'a> SessionLease<'a> {
    fn driver(&self) -> Option<&WebDriver> {
        self.driver.as_ref()
    }

    /// Drop a session that is in an unknown state instead of reusing it
    async fn discard(mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                debug!("Error closing discarded browser session: {}", e);
            }
        }
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            if let Ok(mut idle) = self.pool.lock() {
                idle.push(driver);
            }
        }
    }
}

impl BrowserFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        if settings.browser_sessions == 0 {
            anyhow::bail!("fetch.browser_sessions must be at least 1");
        }

        info!("Browser fetcher using WebDriver at {}", settings.webdriver_url);

        Ok(Self {
            settings: settings.clone(),
            profiles: ProfileRotator::new(settings.profiles.clone())?,
            idle: Mutex::new(Vec::new()),
            permits: Semaphore::new(settings.browser_sessions),
        })
    }

    /// Start a new WebDriver session with a random header profile
    async fn open_session(&self) -> Result<WebDriver> {
        let profile = self.profiles.random_profile();

        let mut caps = DesiredCapabilities::chrome();
        caps.add_chrome_arg(&format!("--user-agent={}", profile.user_agent))?;
        caps.add_chrome_arg(&format!(
            "--lang={}",
            profile.accept_language.split(',').next().unwrap_or("vi-VN")
        ))?;

        if self.settings.headless {
            caps.set_headless()?;
        }

        if let Some(proxy) = &self.settings.proxy {
            caps.add_chrome_arg(&format!("--proxy-server={}", proxy))?;
        }

        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;

        let driver = WebDriver::new(&self.settings.webdriver_url, caps).await
            .context("Failed to connect to WebDriver")?;

        driver.set_page_load_timeout(Duration::from_secs(self.settings.timeout_secs)).await
            .context("Failed to set page load timeout")?;

        debug!("Browser session opened with profile: {}", profile.name);

        Ok(driver)
    }

    async fn lease(&self) -> Result<SessionLease<'_>, FetchFailure> {
        let permit = self.permits.acquire().await
            .map_err(|_| FetchFailure::Transport("browser pool closed".to_string()))?;

        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let driver = match pooled {
            Some(driver) => driver,
            None => self.open_session().await
                .map_err(|e| FetchFailure::Transport(format!("{:#}", e)))?,
        };

        Ok(SessionLease {
            driver: Some(driver),
            pool: &self.idle,
            _permit: permit,
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let lease = self.lease().await?;
        let driver = lease.driver()
            .ok_or_else(|| FetchFailure::Transport("browser session missing".to_string()))?;

        debug!("Navigating to: {}", url);
        let navigated = driver.goto(url).await;
        if let Err(e) = navigated {
            lease.discard().await;
            return Err(FetchFailure::Transport(e.to_string()));
        }

        let source = driver.source().await;
        let body = match source {
            Ok(body) => body,
            Err(e) => {
                lease.discard().await;
                return Err(FetchFailure::Transport(e.to_string()));
            }
        };

        if looks_like_challenge(&body) {
            // Next attempt starts from a fresh session
            lease.discard().await;
            return Err(FetchFailure::Challenge);
        }

        Ok(body)
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        let drivers: Vec<WebDriver> = match self.idle.get_mut() {
            Ok(idle) => idle.drain(..).collect(),
            Err(_) => return,
        };

        if drivers.is_empty() {
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for driver in drivers {
                    if let Err(e) = driver.quit().await {
                        error!("Error closing browser session during drop: {}", e);
                    }
                }
            });
        }
    }
}
