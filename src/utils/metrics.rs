use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use anyhow::{Result, Context};
use tokio::sync::Mutex;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Serialize, Deserialize};

/// Crawl statistics collector, shared by the fetcher, workers and supervisor of one source
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Fetch attempts made
    pub total_requests: usize,

    pub successful_requests: usize,

    pub failed_requests: usize,

    /// Attempts that were followed by a retry
    pub retries: usize,

    /// Summed request durations in milliseconds
    pub total_request_ms: u64,

    pub bytes_downloaded: usize,

    /// Failure counts per fetch failure kind
    pub failures_by_kind: BTreeMap<String, usize>,

    /// Work units fully processed
    pub units_processed: usize,

    /// Documents written this run
    pub documents: usize,

    pub total_words: usize,

    /// Posts dropped because their fingerprint was already taken
    pub duplicates_skipped: usize,

    /// Posts dropped by the quality filter
    pub rejected_short: usize,

    #[serde(skip)]
    pub authors: HashSet<String>,
}

/// Point-in-time summary for progress logs and the final stats file
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub source: String,
    pub run_id: String,
    pub documents_total: u64,
    pub documents_this_run: usize,
    pub target: u64,
    pub progress_percent: f64,
    pub total_words: usize,
    pub avg_doc_length: f64,
    pub unique_authors: usize,
    pub units_processed: usize,
    pub requests_made: usize,
    pub requests_failed: usize,
    pub retries: usize,
    pub duplicates_skipped: usize,
    pub rejected_short: usize,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub elapsed_secs: i64,
    pub docs_per_minute: f64,
    pub eta: Option<DateTime<Utc>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record one fetch attempt
    pub async fn record_request(&self, success: bool, duration_ms: u64, bytes: usize) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_requests += 1;
        if success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }

        metrics.total_request_ms += duration_ms;
        metrics.bytes_downloaded += bytes;
    }

    /// Record a failed attempt by kind, and whether it will be retried
    pub async fn record_failure(&self, kind: &str, retrying: bool) {
        let mut metrics = self.metrics.lock().await;

        *metrics.failures_by_kind.entry(kind.to_string()).or_default() += 1;
        if retrying {
            metrics.retries += 1;
        }
    }

    /// Record the filtering tallies of one processed unit
    pub async fn record_unit(&self, duplicates: usize, rejected: usize) {
        let mut metrics = self.metrics.lock().await;

        metrics.units_processed += 1;
        metrics.duplicates_skipped += duplicates;
        metrics.rejected_short += rejected;
    }

    /// Record a document that has been written to the sink
    pub async fn record_document(&self, word_count: usize, author: &str) {
        let mut metrics = self.metrics.lock().await;

        metrics.documents += 1;
        metrics.total_words += word_count;
        if !metrics.authors.contains(author) {
            metrics.authors.insert(author.to_string());
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }

    /// Build a report. `documents_total` is the durable count, which
    /// includes documents written by earlier runs.
    pub async fn report(&self, source: &str, run_id: &str, documents_total: u64, target: u64) -> StatsReport {
        let metrics = self.metrics.lock().await;
        let now = Utc::now();
        let elapsed = (now - metrics.start_time).num_seconds().max(0);

        let docs_per_minute = if elapsed > 0 {
            metrics.documents as f64 / elapsed as f64 * 60.0
        } else {
            0.0
        };

        let remaining = target.saturating_sub(documents_total);
        let eta = if remaining == 0 {
            Some(now)
        } else if docs_per_minute > 0.0 {
            let secs = remaining as f64 / docs_per_minute * 60.0;
            Some(now + ChronoDuration::seconds(secs as i64))
        } else {
            None
        };

        let progress_percent = if target > 0 {
            (documents_total as f64 / target as f64 * 100.0).min(100.0)
        } else {
            100.0
        };

        StatsReport {
            source: source.to_string(),
            run_id: run_id.to_string(),
            documents_total,
            documents_this_run: metrics.documents,
            target,
            progress_percent,
            total_words: metrics.total_words,
            avg_doc_length: if metrics.documents > 0 {
                metrics.total_words as f64 / metrics.documents as f64
            } else {
                0.0
            },
            unique_authors: metrics.authors.len(),
            units_processed: metrics.units_processed,
            requests_made: metrics.total_requests,
            requests_failed: metrics.failed_requests,
            retries: metrics.retries,
            duplicates_skipped: metrics.duplicates_skipped,
            rejected_short: metrics.rejected_short,
            failures_by_kind: metrics.failures_by_kind.clone(),
            elapsed_secs: elapsed,
            docs_per_minute,
            eta,
        }
    }

    /// Start timing a request
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsReport {
    /// Write the report as pretty JSON
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize stats report")?;
        std::fs::write(path, contents)
            .context(format!("Failed to write stats report: {}", path.display()))?;
        Ok(())
    }
}

/// Format seconds as "1h 2m 3s"
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Request timer for measuring request durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_aggregates_documents() {
        let metrics = MetricsCollector::new();
        metrics.record_request(true, 120, 2048).await;
        metrics.record_request(false, 30_000, 0).await;
        metrics.record_failure("timeout", true).await;
        metrics.record_unit(2, 3).await;
        metrics.record_document(60, "alice").await;
        metrics.record_document(40, "alice").await;

        let report = metrics.report("voz", "run", 12, 10).await;

        assert_eq!(report.documents_this_run, 2);
        assert_eq!(report.documents_total, 12);
        assert_eq!(report.total_words, 100);
        assert_eq!(report.avg_doc_length, 50.0);
        assert_eq!(report.unique_authors, 1);
        assert_eq!(report.requests_made, 2);
        assert_eq!(report.requests_failed, 1);
        assert_eq!(report.retries, 1);
        assert_eq!(report.duplicates_skipped, 2);
        assert_eq!(report.rejected_short, 3);
        assert_eq!(report.failures_by_kind.get("timeout"), Some(&1));
        assert_eq!(report.progress_percent, 100.0);
        assert!(report.eta.is_some());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(65), "1m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }
}
