use std::collections::HashMap;
use anyhow::Result;
use rand::{thread_rng, Rng};
use tracing::debug;

use crate::cli::config::HeaderProfile;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Rotates the request header profiles presented to the sites
#[derive(Debug, Clone)]
pub struct ProfileRotator {
    profiles: Vec<HeaderProfile>,
}

impl ProfileRotator {
    pub fn new(profiles: Vec<HeaderProfile>) -> Result<Self> {
        if profiles.is_empty() {
            anyhow::bail!("No header profiles configured");
        }

        Ok(Self { profiles })
    }

    /// Select a random profile
    pub fn random_profile(&self) -> &HeaderProfile {
        let mut rng = thread_rng();
        &self.profiles[rng.gen_range(0..self.profiles.len())]
    }

    /// Complete header set for one request
    pub fn headers(&self) -> HashMap<String, String> {
        let profile = self.random_profile();
        debug!("Using header profile: {}", profile.name);

        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), profile.user_agent.clone());
        headers.insert("Accept-Language".to_string(), profile.accept_language.clone());
        headers.insert("Accept".to_string(), ACCEPT_HTML.to_string());
        headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());

        // Profile headers override the defaults
        for (key, value) in &profile.extra_headers {
            headers.insert(key.clone(), value.clone());
        }

        headers
    }
}
