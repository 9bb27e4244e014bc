use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use futures::{future, stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cli::config::{CrawlerSettings, SourceSettings, StorageSettings};
use crate::crawler::dedup::DedupIndex;
use crate::crawler::discovery::WorkDiscovery;
use crate::crawler::executor::{UnitOutcome, WorkExecutor};
use crate::crawler::shutdown::Shutdown;
use crate::crawler::task::WorkUnit;
use crate::extract::{ContentExtractor, QualityFilter};
use crate::fetch::{FetchFailure, PageFetcher};
use crate::storage::{CheckpointStore, CrawlProgress, OutputSink};
use crate::utils::metrics::{format_duration, MetricsCollector, StatsReport};

/// Lifecycle of one source crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Idle,
    Discovering,
    Dispatching,
    /// Every category reached the end of its pagination or was given up
    Exhausted,
    TargetReached,
    /// Stopped by a shutdown request
    Interrupted,
    Failed,
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlState::Idle => "idle",
            CrawlState::Discovering => "discovering",
            CrawlState::Dispatching => "dispatching",
            CrawlState::Exhausted => "exhausted",
            CrawlState::TargetReached => "target reached",
            CrawlState::Interrupted => "interrupted",
            CrawlState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Failures that end a source crawl early
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {name} is unreachable: {failure}")]
    Unreachable { name: String, failure: FetchFailure },

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Site-specific collaborators plugged into a supervisor
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn PageFetcher>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub filter: Arc<dyn QualityFilter>,
}

/// Final result of a source crawl
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub state: CrawlState,

    #[serde(flatten)]
    pub stats: StatsReport,
}

/// Listing position of one category
#[derive(Debug)]
struct CategoryCursor {
    id: String,
    url: String,
    next_page: u32,
    consecutive_failures: u32,
    done: bool,
}

/// How a dispatch pass ended
enum Dispatch {
    Completed,
    Stopped,
}

/// Drives discovery and execution for one source until its target is
/// reached, its categories are exhausted, or shutdown is requested
pub struct CrawlSupervisor {
    source: SourceSettings,
    settings: CrawlerSettings,
    run_id: String,
    state: CrawlState,

    fetcher: Arc<dyn PageFetcher>,
    discovery: WorkDiscovery,
    executor: Arc<WorkExecutor>,
    dedup: Arc<DedupIndex>,

    progress: CrawlProgress,
    checkpoints: CheckpointStore,
    sink: OutputSink,

    metrics: MetricsCollector,
    shutdown: Shutdown,

    last_save: Instant,
    units_since_save: usize,
    next_report: Instant,
}

impl CrawlSupervisor {
    /// Load the checkpoint, open the sink and reconcile the two
    pub fn open(
        source: SourceSettings,
        settings: CrawlerSettings,
        storage: &StorageSettings,
        collaborators: Collaborators,
        fresh: bool,
        metrics: MetricsCollector,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let checkpoints = CheckpointStore::new(&storage.checkpoint_dir)?;

        let mut progress = if fresh {
            if checkpoints.delete(&source.name)? {
                info!("Fresh run: discarded checkpoint for {}", source.name);
            }
            CrawlProgress::default()
        } else {
            checkpoints.load(&source.name).unwrap_or_default()
        };

        let sink_path = storage.output_dir.join(format!("{}.jsonl", source.name));
        let (sink, scan) = OutputSink::open(&sink_path, fresh, storage.sync_writes)?;

        let dedup = Arc::new(DedupIndex::from_progress(&progress));
        let restored = scan
            .fingerprints
            .iter()
            .filter(|fp| dedup.mark_fingerprint_seen(fp))
            .count();
        if restored > 0 {
            info!("Recovered {} fingerprints from {} missing in the checkpoint", restored, sink_path.display());
        }

        // The sink is the durable truth for the document count
        if progress.total_documents_emitted != scan.records {
            warn!(
                "Checkpoint for {} counts {} documents but the sink holds {}; using the sink count",
                source.name, progress.total_documents_emitted, scan.records
            );
            progress.total_documents_emitted = scan.records;
        }

        let executor = Arc::new(WorkExecutor::new(
            &source.name,
            collaborators.fetcher.clone(),
            collaborators.extractor.clone(),
            collaborators.filter.clone(),
            dedup.clone(),
            settings.max_unit_pages,
        ));
        let discovery = WorkDiscovery::new(
            collaborators.fetcher.clone(),
            collaborators.extractor,
            dedup.clone(),
        );

        let now = Instant::now();
        let report_interval = Duration::from_secs(settings.report_interval_secs);

        Ok(Self {
            source,
            settings,
            run_id: Uuid::new_v4().to_string(),
            state: CrawlState::Idle,
            fetcher: collaborators.fetcher,
            discovery,
            executor,
            dedup,
            progress,
            checkpoints,
            sink,
            metrics,
            shutdown,
            last_save: now,
            units_since_save: 0,
            next_report: now + report_interval,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Documents durably written, across runs
    fn documents_total(&self) -> u64 {
        self.sink.records()
    }

    fn target_reached(&self) -> bool {
        self.documents_total() >= self.settings.target_docs
    }

    /// Run the crawl to a terminal state
    pub async fn run(mut self) -> Result<SourceReport, SourceError> {
        info!(
            "Starting crawl of {}: {} documents so far, target {}",
            self.source.name,
            self.documents_total(),
            self.settings.target_docs
        );

        if !self.target_reached() {
            if let Err(failure) = self.probe().await {
                self.state = CrawlState::Failed;
                error!("Source {} is unreachable: {}", self.source.name, failure);
                return Err(SourceError::Unreachable {
                    name: self.source.name.clone(),
                    failure,
                });
            }
        }

        let mut cursors: Vec<CategoryCursor> = self
            .source
            .categories
            .iter()
            .map(|category| CategoryCursor {
                id: category.id.clone(),
                url: self.source.category_url(category),
                next_page: self.progress.last_listing_page.get(&category.id).map_or(1, |page| page + 1),
                consecutive_failures: 0,
                done: false,
            })
            .collect();

        self.state = self.crawl_categories(&mut cursors).await?;

        info!("Crawl of {} finished: {}", self.source.name, self.state);
        self.save_checkpoint();

        let stats = self.report().await;
        self.log_report(&stats, "Final");

        Ok(SourceReport {
            state: self.state,
            stats,
        })
    }

    /// Fetch the first listing page to make sure the source answers at all
    async fn probe(&self) -> Result<(), FetchFailure> {
        let Some(first) = self.source.categories.first() else {
            return Ok(());
        };

        let url = self.source.category_url(first);
        debug!("Probing {}", url);
        self.fetcher.fetch(&url).await.map(|_| ())
    }

    /// Round-robin over the categories, `pages_per_round` listing pages at a time
    async fn crawl_categories(&mut self, cursors: &mut [CategoryCursor]) -> Result<CrawlState, SourceError> {
        loop {
            if let Some(state) = self.stop_state() {
                return Ok(state);
            }
            if cursors.iter().all(|cursor| cursor.done) {
                return Ok(CrawlState::Exhausted);
            }

            for cursor in cursors.iter_mut().filter(|cursor| !cursor.done) {
                for _ in 0..self.settings.pages_per_round {
                    if let Some(state) = self.stop_state() {
                        return Ok(state);
                    }

                    match self.crawl_listing_page(cursor).await? {
                        Some(Dispatch::Completed) => {}
                        Some(Dispatch::Stopped) => {
                            return Ok(self.stop_state().unwrap_or(CrawlState::Interrupted));
                        }
                        // Category finished or set aside for this round
                        None => break,
                    }
                }
            }
        }
    }

    /// Discover and dispatch one listing page. `None` means move on to the
    /// next category.
    async fn crawl_listing_page(&mut self, cursor: &mut CategoryCursor) -> Result<Option<Dispatch>, SourceError> {
        self.state = CrawlState::Discovering;
        let page = cursor.next_page;

        if page > self.settings.max_listing_pages {
            info!("Category {} reached the listing page cap of {}", cursor.id, self.settings.max_listing_pages);
            cursor.done = true;
            return Ok(None);
        }

        let discovered = tokio::select! {
            result = self.discovery.next_page(&cursor.url, page) => result,
            _ = self.shutdown.triggered() => return Ok(Some(Dispatch::Stopped)),
        };

        let listing = match discovered {
            Ok(listing) => listing,
            Err(failure) => {
                cursor.consecutive_failures += 1;
                warn!(
                    "Listing page {} of {} failed ({}), attempt {}/{}",
                    page, cursor.id, failure, cursor.consecutive_failures, self.settings.max_listing_failures
                );
                if cursor.consecutive_failures >= self.settings.max_listing_failures {
                    warn!("Giving up on category {} for this run at page {}", cursor.id, page);
                    cursor.done = true;
                }
                return Ok(None);
            }
        };
        cursor.consecutive_failures = 0;

        if listing.is_terminal() {
            info!("Category {} exhausted at page {}", cursor.id, page);
            cursor.done = true;
            return Ok(None);
        }

        debug!(
            "Category {} page {}: {} of {} units are new",
            cursor.id, page, listing.units.len(), listing.total_seen
        );

        self.state = CrawlState::Dispatching;
        let dispatch = self.dispatch(listing.units).await?;

        if let Dispatch::Completed = dispatch {
            self.progress.last_listing_page.insert(cursor.id.clone(), page);
            cursor.next_page = page + 1;
        }

        Ok(Some(dispatch))
    }

    /// Run the units of one listing page in batches of `batch_size`
    async fn dispatch(&mut self, units: Vec<WorkUnit>) -> Result<Dispatch, SourceError> {
        for batch in units.chunks(self.settings.batch_size.max(1)) {
            if self.stop_state().is_some() {
                return Ok(Dispatch::Stopped);
            }

            self.run_batch(batch.to_vec()).await?;
            self.maybe_checkpoint();
            self.maybe_report().await;
        }

        if self.shutdown.is_triggered() {
            return Ok(Dispatch::Stopped);
        }
        Ok(Dispatch::Completed)
    }

    /// Process a batch on up to `workers` concurrent units, committing each
    /// outcome as it completes. After a shutdown request no new unit starts
    /// and in-flight units get `shutdown_grace_secs` to finish.
    async fn run_batch(&mut self, units: Vec<WorkUnit>) -> Result<(), SourceError> {
        let executor = self.executor.clone();
        let admit = self.shutdown.clone();

        let mut outcomes = stream::iter(units)
            .take_while(move |_| future::ready(!admit.is_triggered()))
            .map(move |unit| {
                let executor = executor.clone();
                async move { executor.process(unit).await }
            })
            .buffer_unordered(self.settings.workers.max(1));

        let grace = Duration::from_secs(self.settings.shutdown_grace_secs);
        let mut deadline: Option<Instant> = None;

        loop {
            let next = match deadline {
                None => tokio::select! {
                    next = outcomes.next() => next,
                    _ = self.shutdown.triggered() => {
                        info!("Shutdown requested, waiting up to {}s for in-flight units", grace.as_secs());
                        deadline = Some(Instant::now() + grace);
                        continue;
                    }
                },
                Some(deadline) => match tokio::time::timeout_at(deadline, outcomes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Grace period elapsed, abandoning in-flight units");
                        break;
                    }
                },
            };

            match next {
                Some(outcome) => self.commit(outcome).await?,
                None => break,
            }
        }

        Ok(())
    }

    /// Write an outcome's documents, then mark its unit visited
    async fn commit(&mut self, outcome: UnitOutcome) -> Result<(), SourceError> {
        let UnitOutcome {
            unit,
            documents,
            mut claims,
            failed_urls,
            rejected,
            duplicates,
            ..
        } = outcome;

        for doc in &documents {
            if let Err(e) = self.sink.append(doc) {
                error!("Failed to write document from unit {}: {:#}", unit.unit_id, e);
                return Err(SourceError::Storage(e));
            }
            claims.commit(&doc.fingerprint);
            self.progress.total_documents_emitted = self.sink.records();
            self.metrics.record_document(doc.word_count, &doc.author).await;
        }

        for url in failed_urls {
            self.progress.record_failed_url(url);
        }

        if !self.dedup.mark_unit_visited(&unit.unit_id) {
            debug!("Unit {} was already visited", unit.unit_id);
        }
        self.metrics.record_unit(duplicates, rejected).await;
        self.units_since_save += 1;

        Ok(())
    }

    /// Terminal state demanded by the target or a shutdown request, if any
    fn stop_state(&self) -> Option<CrawlState> {
        if self.target_reached() {
            Some(CrawlState::TargetReached)
        } else if self.shutdown.is_triggered() {
            Some(CrawlState::Interrupted)
        } else {
            None
        }
    }

    fn maybe_checkpoint(&mut self) {
        let interval = Duration::from_secs(self.settings.checkpoint_interval_secs);
        if self.last_save.elapsed() >= interval || self.units_since_save >= self.settings.checkpoint_unit_threshold {
            self.save_checkpoint();
        }
    }

    /// Snapshot progress. A failed save is logged and retried at the next
    /// opportunity; the sink stays authoritative for the count.
    fn save_checkpoint(&mut self) {
        self.progress.visited_unit_ids = self.dedup.visited_unit_ids();
        self.progress.seen_fingerprints = self.dedup.seen_fingerprints();
        self.progress.total_documents_emitted = self.sink.records();
        self.progress.last_checkpoint_time = chrono::Utc::now();

        match self.checkpoints.save(&self.source.name, &self.progress) {
            Ok(()) => {
                info!(
                    "Checkpoint saved for {}: {} docs, {} visited units",
                    self.source.name,
                    self.progress.total_documents_emitted,
                    self.progress.visited_unit_ids.len()
                );
                self.last_save = Instant::now();
                self.units_since_save = 0;
            }
            Err(e) => error!("Failed to save checkpoint for {}: {:#}", self.source.name, e),
        }
    }

    async fn report(&self) -> StatsReport {
        self.metrics
            .report(&self.source.name, &self.run_id, self.documents_total(), self.settings.target_docs)
            .await
    }

    async fn maybe_report(&mut self) {
        if Instant::now() < self.next_report {
            return;
        }
        self.next_report = Instant::now() + Duration::from_secs(self.settings.report_interval_secs);

        let stats = self.report().await;
        self.log_report(&stats, "Progress");
    }

    fn log_report(&self, stats: &StatsReport, label: &str) {
        let eta = match stats.eta {
            Some(eta) => eta.format("%Y-%m-%d %H:%M").to_string(),
            None => "unknown".to_string(),
        };

        info!(
            "{} [{}]: {}/{} docs ({:.1}%), {} this run, {:.1} docs/min, {} authors, elapsed {}, ETA {}",
            label,
            self.source.name,
            stats.documents_total,
            stats.target,
            stats.progress_percent,
            stats.documents_this_run,
            stats.docs_per_minute,
            stats.unique_authors,
            format_duration(stats.elapsed_secs),
            eta
        );
    }
}
