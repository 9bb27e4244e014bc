use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cli::config::{CrawlerConfig, FetchMode, SourceSettings};
use crate::crawler::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::crawler::{Collaborators, CrawlSupervisor, SourceError, SourceReport};
use crate::extract::{extractor_for, MinWordsFilter};
use crate::fetch::build_fetcher;
use crate::storage::{CheckpointStore, OutputSink};
use crate::utils::metrics::format_duration;
use crate::utils::MetricsCollector;

/// Command line values that take precedence over the configuration file
#[derive(Debug, Default, Clone)]
pub struct CrawlOverrides {
    pub target: Option<u64>,
    pub workers: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    pub min_words: Option<usize>,
    pub fresh: bool,
    pub sources: Vec<String>,
    pub mode: Option<FetchMode>,
}

impl CrawlOverrides {
    pub fn apply(&self, config: &mut CrawlerConfig) {
        if let Some(target) = self.target {
            config.crawler.target_docs = target;
        }
        if let Some(workers) = self.workers {
            config.crawler.workers = workers;
        }
        if let Some(dir) = &self.output_dir {
            config.storage.output_dir = dir.clone();
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.storage.checkpoint_dir = dir.clone();
        }
        if let Some(min_words) = self.min_words {
            config.crawler.min_words = min_words;
        }
        if let Some(mode) = self.mode {
            config.fetch.mode = mode;
        }
    }
}

/// Sources named on the command line, or every configured source
fn select_sources(config: &CrawlerConfig, names: &[String]) -> Result<Vec<SourceSettings>> {
    if names.is_empty() {
        return Ok(config.sources.clone());
    }

    names
        .iter()
        .map(|name| {
            config
                .source(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Unknown source: {}", name))
        })
        .collect()
}

fn sink_path(config: &CrawlerConfig, source: &str) -> PathBuf {
    config.storage.output_dir.join(format!("{}.jsonl", source))
}

fn stats_path(config: &CrawlerConfig, source: &str) -> PathBuf {
    config.storage.output_dir.join(format!("{}_stats.json", source))
}

/// Fire the shutdown trigger on Ctrl-C
fn watch_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, finishing in-flight work and saving checkpoints");
                trigger.trigger();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

/// Build and open the supervisor of one source
fn open_supervisor(
    config: &CrawlerConfig,
    source: &SourceSettings,
    fresh: bool,
    shutdown: Shutdown,
) -> Result<CrawlSupervisor> {
    let metrics = MetricsCollector::new();
    let collaborators = Collaborators {
        fetcher: build_fetcher(&config.fetch, metrics.clone())?,
        extractor: extractor_for(source.layout),
        filter: Arc::new(MinWordsFilter::new(config.crawler.min_words)),
    };

    CrawlSupervisor::open(
        source.clone(),
        config.crawler.clone(),
        &config.storage,
        collaborators,
        fresh,
        metrics,
        shutdown,
    )
    .context(format!("Failed to start source {}", source.name))
}

/// Crawl every selected source concurrently. Returns false when any source
/// failed to start or became unreachable.
pub async fn crawl(mut config: CrawlerConfig, overrides: CrawlOverrides) -> Result<bool> {
    overrides.apply(&mut config);
    config.validate()?;

    let sources = select_sources(&config, &overrides.sources)?;
    info!(
        "Crawling {} source(s) with {} workers each, target {} documents per source",
        sources.len(),
        config.crawler.workers,
        config.crawler.target_docs
    );

    let (trigger, shutdown) = shutdown::channel();
    watch_ctrl_c(trigger);

    let mut all_ok = true;
    let mut handles: Vec<(String, JoinHandle<Result<SourceReport, SourceError>>)> = Vec::new();

    for source in &sources {
        let supervisor = match open_supervisor(&config, source, overrides.fresh, shutdown.clone()) {
            Ok(supervisor) => supervisor,
            Err(e) => {
                error!("{:#}", e);
                all_ok = false;
                continue;
            }
        };

        let span = info_span!("source", name = %source.name, run_id = %supervisor.run_id());
        handles.push((source.name.clone(), tokio::spawn(supervisor.run().instrument(span))));
    }

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(report)) => {
                info!(
                    "{}: {} with {} documents ({} this run) in {}",
                    name,
                    report.state,
                    report.stats.documents_total,
                    report.stats.documents_this_run,
                    format_duration(report.stats.elapsed_secs)
                );

                let path = stats_path(&config, &name);
                if let Err(e) = report.stats.write_to(&path) {
                    warn!("Failed to write stats for {}: {:#}", name, e);
                }
            }
            Ok(Err(e)) => {
                error!("{}: {}", name, e);
                all_ok = false;
            }
            Err(e) => {
                error!("{}: crawl task panicked: {}", name, e);
                all_ok = false;
            }
        }
    }

    Ok(all_ok)
}

/// Print checkpoint progress and sink size of every configured source
pub fn status(config: &CrawlerConfig) -> Result<()> {
    let store = CheckpointStore::new(&config.storage.checkpoint_dir)?;

    for source in &config.sources {
        let sink = sink_path(config, &source.name);
        let records = if sink.exists() {
            OutputSink::count_records(&sink)?
        } else {
            0
        };

        println!("Source: {}", source.name);
        println!("  Output: {} ({} documents)", sink.display(), records);

        match store.load(&source.name) {
            Some(progress) => {
                println!(
                    "  Documents: {}/{}",
                    progress.total_documents_emitted, config.crawler.target_docs
                );
                println!("  Visited units: {}", progress.visited_unit_ids.len());
                println!("  Fingerprints: {}", progress.seen_fingerprints.len());
                for (category, page) in &progress.last_listing_page {
                    println!("  Category {}: listing page {}", category, page);
                }
                if !progress.failed_urls.is_empty() {
                    println!("  Failed URLs: {}", progress.failed_urls.len());
                }
                println!("  Last checkpoint: {}", progress.last_checkpoint_time);
            }
            None => println!("  No checkpoint"),
        }
    }

    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path).context(format!("Failed to delete {}", path.display()))?;
    Ok(true)
}

/// Delete a source's checkpoint, and its output when `purge_output` is set
pub fn reset(config: &CrawlerConfig, source: &str, purge_output: bool) -> Result<()> {
    if config.source(source).is_none() {
        warn!("{} is not a configured source", source);
    }

    let store = CheckpointStore::new(&config.storage.checkpoint_dir)?;
    if store.delete(source)? {
        info!("Deleted checkpoint {}", store.path_for(source).display());
    } else {
        info!("No checkpoint for {}", source);
    }

    if purge_output {
        for path in [sink_path(config, source), stats_path(config, source)] {
            if remove_if_exists(&path)? {
                info!("Deleted {}", path.display());
            }
        }
    }

    Ok(())
}

/// Print the configuration as YAML, or write it to `write`
pub fn show_config(config: &CrawlerConfig, write: Option<&Path>) -> Result<()> {
    match write {
        Some(path) => {
            config.save_to_file(path)?;
            info!("Configuration written to {}", path.display());
        }
        None => {
            let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
            println!("{}", yaml);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CrawlProgress;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> CrawlerConfig {
        let mut config = CrawlerConfig::default();
        config.storage.output_dir = dir.join("data");
        config.storage.checkpoint_dir = dir.join("checkpoints");
        config
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = CrawlerConfig::default();
        let overrides = CrawlOverrides {
            target: Some(42),
            workers: Some(3),
            min_words: Some(20),
            mode: Some(FetchMode::Browser),
            ..Default::default()
        };

        overrides.apply(&mut config);

        assert_eq!(config.crawler.target_docs, 42);
        assert_eq!(config.crawler.workers, 3);
        assert_eq!(config.crawler.min_words, 20);
        assert_eq!(config.fetch.mode, FetchMode::Browser);
    }

    #[test]
    fn source_selection() {
        let config = CrawlerConfig::default();

        assert_eq!(select_sources(&config, &[]).unwrap().len(), config.sources.len());

        let picked = select_sources(&config, &["voz".to_string()]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "voz");

        assert!(select_sources(&config, &["nope".to_string()]).is_err());
    }

    #[test]
    fn reset_removes_checkpoint_and_output() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        let store = CheckpointStore::new(&config.storage.checkpoint_dir).unwrap();
        store.save("voz", &CrawlProgress::default()).unwrap();
        fs::create_dir_all(&config.storage.output_dir).unwrap();
        fs::write(sink_path(&config, "voz"), "").unwrap();

        reset(&config, "voz", false).unwrap();
        assert!(store.load("voz").is_none());
        assert!(sink_path(&config, "voz").exists());

        reset(&config, "voz", true).unwrap();
        assert!(!sink_path(&config, "voz").exists());
    }

    #[test]
    fn config_is_written_as_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.yaml");

        show_config(&CrawlerConfig::default(), Some(&path)).unwrap();

        let loaded = CrawlerConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.sources.len(), CrawlerConfig::default().sources.len());
    }

    #[test]
    fn status_without_progress() {
        let dir = tempdir().unwrap();
        assert!(status(&config_in(dir.path())).is_ok());
    }
}
