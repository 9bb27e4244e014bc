use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, debug, error};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrawlerConfig {
    pub crawler: CrawlerSettings,
    pub fetch: FetchSettings,
    pub storage: StorageSettings,
    pub sources: Vec<SourceSettings>,
}

/// Crawl loop settings, applied to every source
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrawlerSettings {
    pub target_docs: u64,            // Per source
    pub workers: usize,              // Units processed concurrently per source
    pub batch_size: usize,           // Units dispatched per batch
    pub max_unit_pages: u32,         // Page cap for one thread/article
    pub pages_per_round: u32,        // Listing pages per category before rotating
    #[serde(default = "default_max_listing_pages")]
    pub max_listing_pages: u32,      // Listing page cap per category
    pub min_words: usize,
    pub checkpoint_interval_secs: u64,
    pub checkpoint_unit_threshold: usize,
    pub report_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub max_listing_failures: u32,   // Consecutive listing fetch failures before giving up a category
}

fn default_max_listing_pages() -> u32 {
    2000
}

/// How pages are fetched
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Http,
    Browser,
}

/// Page fetcher settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchSettings {
    pub mode: FetchMode,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub delay_range_ms: (u64, u64),  // Min and max politeness delay after a fetch
    pub proxy: Option<String>,
    pub profiles: Vec<HeaderProfile>,
    pub webdriver_url: String,
    pub headless: bool,
    pub browser_sessions: usize,
}

/// Request header set presented to the sites
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HeaderProfile {
    pub name: String,
    pub user_agent: String,
    pub accept_language: String,
    pub extra_headers: HashMap<String, String>,
}

/// Output and checkpoint locations
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageSettings {
    pub output_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub sync_writes: bool,  // fsync every record instead of flushing to the OS
}

/// Page structure family of a site
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SiteLayout {
    Xenforo,
    Spiderum,
}

/// One crawled site
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourceSettings {
    pub name: String,
    pub base_url: String,
    pub layout: SiteLayout,
    pub categories: Vec<CategorySettings>,
}

/// A forum or category listing within a site
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CategorySettings {
    pub id: String,
    pub name: String,
    pub path: String,
}

impl CategorySettings {
    fn new(id: &str, name: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
        }
    }
}

impl SourceSettings {
    /// Absolute URL of a category's first listing page
    pub fn category_url(&self, category: &CategorySettings) -> String {
        if category.path.starts_with("http://") || category.path.starts_with("https://") {
            return category.path.clone();
        }
        format!("{}{}", self.base_url.trim_end_matches('/'), category.path)
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            crawler: CrawlerSettings {
                target_docs: 250_000,
                workers: 10,
                batch_size: 20,
                max_unit_pages: 10,
                pages_per_round: 50,
                max_listing_pages: default_max_listing_pages(),
                min_words: 50,
                checkpoint_interval_secs: 60,
                checkpoint_unit_threshold: 200,
                report_interval_secs: 60,
                shutdown_grace_secs: 30,
                max_listing_failures: 3,
            },
            fetch: FetchSettings {
                mode: FetchMode::Http,
                timeout_secs: 30,
                max_attempts: 3,
                backoff_base_ms: 1000,
                rate_limit_backoff_ms: 30_000,
                delay_range_ms: (100, 300),
                proxy: None,
                profiles: vec![
                    HeaderProfile {
                        name: "windows_chrome".to_string(),
                        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                        accept_language: "vi-VN,vi;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
                        extra_headers: HashMap::new(),
                    },
                    HeaderProfile {
                        name: "mac_safari".to_string(),
                        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15".to_string(),
                        accept_language: "vi-VN,vi;q=0.9,en;q=0.8".to_string(),
                        extra_headers: HashMap::new(),
                    },
                    HeaderProfile {
                        name: "windows_firefox".to_string(),
                        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
                        accept_language: "vi-VN,vi;q=0.8,en-US;q=0.5,en;q=0.3".to_string(),
                        extra_headers: HashMap::new(),
                    },
                ],
                webdriver_url: "http://localhost:4444".to_string(),
                headless: true,
                browser_sessions: 4,
            },
            storage: StorageSettings {
                output_dir: PathBuf::from("data"),
                checkpoint_dir: PathBuf::from("checkpoints"),
                sync_writes: false,
            },
            sources: vec![
                SourceSettings {
                    name: "voz".to_string(),
                    base_url: "https://voz.vn".to_string(),
                    layout: SiteLayout::Xenforo,
                    categories: vec![
                        CategorySettings::new("f17", "Chuyện trò linh tinh", "/f/chuyen-tro-linh-tinh.17/"),
                        CategorySettings::new("f33", "Thế giới game", "/f/the-gioi-game.33/"),
                        CategorySettings::new("f10", "Máy tính", "/f/may-tinh.10/"),
                        CategorySettings::new("f11", "Điện thoại", "/f/dien-thoai.11/"),
                        CategorySettings::new("f249", "Một góc riêng", "/f/mot-goc-rieng.249/"),
                        CategorySettings::new("f594", "Kinh tế tài chính", "/f/kinh-te-tai-chinh.594/"),
                    ],
                },
                SourceSettings {
                    name: "otofun".to_string(),
                    base_url: "https://www.otofun.net".to_string(),
                    layout: SiteLayout::Xenforo,
                    categories: vec![
                        CategorySettings::new("o-to", "Ô tô", "/forums/o-to.17/"),
                        CategorySettings::new("tam-su-biker", "Tâm sự của biker", "/forums/tam-su-cua-biker.70/"),
                    ],
                },
                SourceSettings {
                    name: "tinhte".to_string(),
                    base_url: "https://tinhte.vn".to_string(),
                    layout: SiteLayout::Xenforo,
                    categories: vec![
                        CategorySettings::new("phan-cung", "Thiết bị số - Phần cứng", "/forums/thiet-bi-so-phan-cung.75/"),
                        CategorySettings::new("tin-tuc", "Tin tức công nghệ", "/forums/tin-tuc-cong-nghe.65/"),
                        CategorySettings::new("doi-song-so", "Đời sống số", "/forums/doi-song-so.194/"),
                    ],
                },
                SourceSettings {
                    name: "spiderum".to_string(),
                    base_url: "https://spiderum.com".to_string(),
                    layout: SiteLayout::Spiderum,
                    categories: vec![
                        CategorySettings::new("tam-su", "Tâm sự", "/chuyen-muc/tam-su"),
                        CategorySettings::new("cong-nghe", "Công nghệ", "/chuyen-muc/cong-nghe"),
                        CategorySettings::new("van-hoa", "Văn hóa", "/chuyen-muc/van-hoa"),
                        CategorySettings::new("khoa-hoc", "Khoa học", "/chuyen-muc/khoa-hoc"),
                    ],
                },
            ],
        }
    }
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "forum-harvester", "forum-harvester") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path
    }

    /// Path of the default configuration file
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("default.yaml")
    }

    /// Load the default configuration, creating it on first use
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_path();

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating {}", config_path.display());
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Look up a source by name
    pub fn source(&self, name: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Reject settings the crawl loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let c = &self.crawler;
        if c.workers == 0 {
            anyhow::bail!("crawler.workers must be at least 1");
        }
        if c.batch_size == 0 {
            anyhow::bail!("crawler.batch_size must be at least 1");
        }
        if c.max_unit_pages == 0 || c.pages_per_round == 0 || c.max_listing_pages == 0 {
            anyhow::bail!("crawler.max_unit_pages, crawler.pages_per_round and crawler.max_listing_pages must be at least 1");
        }
        if self.fetch.max_attempts == 0 {
            anyhow::bail!("fetch.max_attempts must be at least 1");
        }
        if self.fetch.delay_range_ms.0 > self.fetch.delay_range_ms.1 {
            anyhow::bail!("fetch.delay_range_ms must be (min, max)");
        }
        if self.sources.is_empty() {
            anyhow::bail!("No sources configured");
        }
        for source in &self.sources {
            if source.categories.is_empty() {
                anyhow::bail!("Source '{}' has no categories", source.name);
            }
            url::Url::parse(&source.base_url)
                .context(format!("Invalid base_url for source '{}'", source.name))?;
        }

        Ok(())
    }
}
