use std::sync::Arc;
use dashmap::DashSet;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::storage::checkpoint::CrawlProgress;

/// Compute the dedup fingerprint of cleaned document text
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Visited work units and emitted fingerprints for one source.
///
/// Every `mark_*` call is a test-and-set: it returns `true` only for the
/// caller that inserted the key, so two workers racing on the same
/// fingerprint can never both see it as new.
#[derive(Debug, Default)]
pub struct DedupIndex {
    /// Units fully processed (never revisited)
    visited_units: DashSet<String>,

    /// Fingerprints of documents emitted or currently claimed by a worker
    seen_fingerprints: DashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from a loaded checkpoint
    pub fn from_progress(progress: &CrawlProgress) -> Self {
        let index = Self::new();

        for unit_id in &progress.visited_unit_ids {
            index.visited_units.insert(unit_id.clone());
        }

        for fp in &progress.seen_fingerprints {
            index.seen_fingerprints.insert(fp.clone());
        }

        debug!(
            "Dedup index restored: {} units, {} fingerprints",
            index.visited_units.len(),
            index.seen_fingerprints.len()
        );

        index
    }

    pub fn is_new_unit(&self, unit_id: &str) -> bool {
        !self.visited_units.contains(unit_id)
    }

    /// Mark a unit visited. Returns `false` if it already was.
    pub fn mark_unit_visited(&self, unit_id: &str) -> bool {
        self.visited_units.insert(unit_id.to_string())
    }

    pub fn is_new_fingerprint(&self, fp: &str) -> bool {
        !self.seen_fingerprints.contains(fp)
    }

    /// Mark a fingerprint seen. Returns `false` if it already was.
    pub fn mark_fingerprint_seen(&self, fp: &str) -> bool {
        self.seen_fingerprints.insert(fp.to_string())
    }

    fn forget_fingerprint(&self, fp: &str) {
        self.seen_fingerprints.remove(fp);
    }

    pub fn fingerprint_count(&self) -> usize {
        self.seen_fingerprints.len()
    }

    /// Sorted copy of the visited unit ids
    pub fn visited_unit_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.visited_units.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Sorted copy of the seen fingerprints
    pub fn seen_fingerprints(&self) -> Vec<String> {
        let mut fps: Vec<String> = self.seen_fingerprints.iter().map(|r| r.key().clone()).collect();
        fps.sort();
        fps
    }
}

/// Fingerprints claimed by one worker but not yet durably written.
///
/// Claims that are never committed (the unit was abandoned, or the sink
/// failed) are released on drop so a later run can emit them.
pub struct FingerprintClaims {
    index: Arc<DedupIndex>,
    pending: Vec<String>,
}

impl FingerprintClaims {
    pub fn new(index: Arc<DedupIndex>) -> Self {
        Self {
            index,
            pending: Vec::new(),
        }
    }

    /// Atomically claim a fingerprint. Returns `false` if another document
    /// already holds it.
    pub fn try_claim(&mut self, fp: &str) -> bool {
        if self.index.mark_fingerprint_seen(fp) {
            self.pending.push(fp.to_string());
            true
        } else {
            false
        }
    }

    /// Keep the claim permanently: the document has been written
    pub fn commit(&mut self, fp: &str) {
        self.pending.retain(|pending| pending != fp);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for FingerprintClaims {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        debug!("Releasing {} uncommitted fingerprint claims", self.pending.len());
        for fp in self.pending.drain(..) {
            self.index.forget_fingerprint(&fp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use chrono::Utc;

    #[test]
    fn test_and_set_semantics() {
        let index = DedupIndex::new();

        assert!(index.is_new_unit("t1"));
        assert!(index.mark_unit_visited("t1"));
        assert!(!index.mark_unit_visited("t1"));
        assert!(!index.is_new_unit("t1"));

        assert!(index.is_new_fingerprint("fp"));
        assert!(index.mark_fingerprint_seen("fp"));
        assert!(!index.mark_fingerprint_seen("fp"));
        assert!(!index.is_new_fingerprint("fp"));
    }

    #[test]
    fn fingerprint_is_stable_hex_sha256() {
        let fp = fingerprint("xin chào các bác");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint("xin chào các bác"));
        assert_ne!(fp, fingerprint("xin chào các bạn"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_admit_exactly_one_winner() {
        let index = Arc::new(DedupIndex::new());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                let mut claims = FingerprintClaims::new(index);
                let won = claims.try_claim("same-content");
                if won {
                    claims.commit("same-content");
                }
                won
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(index.fingerprint_count(), 1);
    }

    #[test]
    fn uncommitted_claims_are_released_on_drop() {
        let index = Arc::new(DedupIndex::new());

        {
            let mut claims = FingerprintClaims::new(index.clone());
            assert!(claims.try_claim("written"));
            assert!(claims.try_claim("abandoned"));
            claims.commit("written");
            assert_eq!(claims.pending_count(), 1);
        }

        assert!(!index.is_new_fingerprint("written"));
        assert!(index.is_new_fingerprint("abandoned"));
    }

    #[test]
    fn restores_from_progress() {
        let progress = CrawlProgress {
            visited_unit_ids: vec!["a".to_string(), "b".to_string()],
            seen_fingerprints: vec!["f1".to_string()],
            total_documents_emitted: 1,
            last_listing_page: BTreeMap::new(),
            last_checkpoint_time: Utc::now(),
            failed_urls: Default::default(),
        };

        let index = DedupIndex::from_progress(&progress);
        assert!(!index.is_new_unit("a"));
        assert!(!index.is_new_unit("b"));
        assert!(!index.is_new_fingerprint("f1"));
        assert_eq!(index.visited_unit_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
