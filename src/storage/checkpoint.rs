use anyhow::{Result, Context};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Upper bound on failed URLs remembered in a checkpoint
pub const MAX_FAILED_URLS: usize = 10_000;

/// Persisted crawl progress for one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlProgress {
    /// Units that must never be revisited
    pub visited_unit_ids: Vec<String>,

    /// Fingerprints of every emitted document
    pub seen_fingerprints: Vec<String>,

    /// Documents durably written to the sink at save time
    pub total_documents_emitted: u64,

    /// Last fully dispatched listing page per category id
    pub last_listing_page: BTreeMap<String, u32>,

    pub last_checkpoint_time: DateTime<Utc>,

    /// Pages that exhausted their retries, kept for later inspection
    #[serde(default)]
    pub failed_urls: VecDeque<String>,
}

impl CrawlProgress {
    /// Remember a failed URL, dropping the oldest once the cap is hit
    pub fn record_failed_url(&mut self, url: String) {
        if self.failed_urls.len() >= MAX_FAILED_URLS {
            self.failed_urls.pop_front();
        }
        self.failed_urls.push_back(url);
    }
}

/// Directory of per-source JSON checkpoints with crash-safe saves
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open a store, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .context(format!("Failed to create checkpoint directory: {}", dir.display()))?;

        Ok(Self { dir })
    }

    /// Path of the checkpoint file for a source
    pub fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}_checkpoint.json", source))
    }

    fn temp_path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}_checkpoint.json.tmp", source))
    }

    /// Load the last good checkpoint. Missing or unreadable checkpoints
    /// mean a fresh start, never an error.
    pub fn load(&self, source: &str) -> Option<CrawlProgress> {
        let path = self.path_for(source);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No checkpoint found for {}, starting fresh", source);
                return None;
            }
            Err(e) => {
                warn!("Failed to read checkpoint {}: {}; starting fresh", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<CrawlProgress>(&contents) {
            Ok(progress) => {
                info!(
                    "Checkpoint loaded for {}: {} docs, {} visited units, saved {}",
                    source,
                    progress.total_documents_emitted,
                    progress.visited_unit_ids.len(),
                    progress.last_checkpoint_time.to_rfc3339()
                );
                Some(progress)
            }
            Err(e) => {
                warn!("Corrupt checkpoint {}: {}; starting fresh", path.display(), e);

                // Keep the bad file around for inspection
                let aside = path.with_extension("json.corrupt");
                if let Err(e) = fs::rename(&path, &aside) {
                    debug!("Could not move corrupt checkpoint aside: {}", e);
                }
                None
            }
        }
    }

    /// Write a checkpoint atomically: temp file, fsync, rename over the old one
    pub fn save(&self, source: &str, progress: &CrawlProgress) -> Result<()> {
        let path = self.path_for(source);
        let tmp_path = self.temp_path_for(source);

        let file = fs::File::create(&tmp_path)
            .context(format!("Failed to create temporary checkpoint: {}", tmp_path.display()))?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, progress)
            .context("Failed to serialize checkpoint")?;
        writer.flush()
            .context("Failed to flush temporary checkpoint")?;

        let file = writer.into_inner()
            .map_err(|e| e.into_error())
            .context("Failed to finish temporary checkpoint")?;
        file.sync_all()
            .context("Failed to sync temporary checkpoint")?;

        fs::rename(&tmp_path, &path)
            .context(format!("Failed to replace checkpoint: {}", path.display()))?;

        // Persist the rename itself where the platform allows it
        if let Ok(dir) = fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!("Checkpoint written: {}", path.display());

        Ok(())
    }

    /// Delete a source's checkpoint. Returns whether one existed.
    pub fn delete(&self, source: &str) -> Result<bool> {
        let path = self.path_for(source);

        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Checkpoint deleted: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context(format!("Failed to delete checkpoint: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_progress(docs: u64) -> CrawlProgress {
        let mut last_listing_page = BTreeMap::new();
        last_listing_page.insert("f17".to_string(), 4);

        CrawlProgress {
            visited_unit_ids: vec!["100".to_string(), "101".to_string()],
            seen_fingerprints: vec!["aa".to_string()],
            total_documents_emitted: docs,
            last_listing_page,
            last_checkpoint_time: Utc::now(),
            failed_urls: VecDeque::new(),
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let progress = sample_progress(7);

        store.save("voz", &progress).unwrap();
        let loaded = store.load("voz").unwrap();

        assert_eq!(loaded, progress);
        assert!(!store.temp_path_for("voz").exists());
    }

    #[test]
    fn persisted_layout_uses_documented_keys() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.save("voz", &sample_progress(3)).unwrap();

        let raw = fs::read_to_string(store.path_for("voz")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["total_documents_emitted"], 3);
        assert_eq!(value["last_listing_page"]["f17"], 4);
        assert!(value["visited_unit_ids"].is_array());
        assert!(value["seen_fingerprints"].is_array());
        assert!(value["last_checkpoint_time"].is_string());
    }

    #[test]
    fn missing_checkpoint_is_fresh_start() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();

        assert!(store.load("otofun").is_none());
    }

    #[test]
    fn corrupt_checkpoint_is_fresh_start() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        fs::write(store.path_for("voz"), "{\"visited_unit_ids\": [\"1\", ").unwrap();

        assert!(store.load("voz").is_none());
        assert!(!store.path_for("voz").exists());
    }

    #[test]
    fn crash_before_rename_keeps_last_good_checkpoint() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let good = sample_progress(10);
        store.save("voz", &good).unwrap();

        // A crash after writing half of the next checkpoint but before the rename
        let next = serde_json::to_string(&sample_progress(20)).unwrap();
        fs::write(store.temp_path_for("voz"), &next[..next.len() / 2]).unwrap();

        let loaded = store.load("voz").unwrap();
        assert_eq!(loaded.total_documents_emitted, 10);

        // The next save replaces the stale temp file
        store.save("voz", &sample_progress(30)).unwrap();
        assert_eq!(store.load("voz").unwrap().total_documents_emitted, 30);
    }

    #[test]
    fn delete_reports_existence() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.save("voz", &sample_progress(1)).unwrap();

        assert!(store.delete("voz").unwrap());
        assert!(!store.delete("voz").unwrap());
    }

    #[test]
    fn failed_urls_are_capped() {
        let mut progress = CrawlProgress::default();
        for i in 0..(MAX_FAILED_URLS + 5) {
            progress.record_failed_url(format!("https://voz.vn/t/{}", i));
        }

        assert_eq!(progress.failed_urls.len(), MAX_FAILED_URLS);
        assert_eq!(progress.failed_urls[0], "https://voz.vn/t/5");
        assert_eq!(
            progress.failed_urls.back().map(String::as_str),
            Some(format!("https://voz.vn/t/{}", MAX_FAILED_URLS + 4).as_str())
        );
    }

    #[test]
    fn failed_urls_keep_list_layout() {
        let mut progress = CrawlProgress::default();
        progress.record_failed_url("https://voz.vn/t/a.1/page-2".to_string());
        progress.record_failed_url("https://voz.vn/t/b.2/page-3".to_string());

        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(
            value["failed_urls"],
            serde_json::json!(["https://voz.vn/t/a.1/page-2", "https://voz.vn/t/b.2/page-3"])
        );

        let restored: CrawlProgress = serde_json::from_value(value).unwrap();
        assert_eq!(restored.failed_urls, progress.failed_urls);
    }
}
