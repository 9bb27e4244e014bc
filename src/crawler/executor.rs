use std::sync::Arc;
use chrono::Utc;
use tracing::{debug, warn};

use crate::crawler::dedup::{fingerprint, DedupIndex, FingerprintClaims};
use crate::crawler::task::{Document, RawPost, WorkUnit};
use crate::extract::{ContentExtractor, QualityFilter};
use crate::fetch::PageFetcher;

/// Result of processing one work unit
pub struct UnitOutcome {
    pub unit: WorkUnit,

    /// Accepted documents, each holding a claimed fingerprint
    pub documents: Vec<Document>,

    /// Fingerprint claims to commit as documents are written
    pub claims: FingerprintClaims,

    pub pages_fetched: u32,

    /// Pages that could not be fetched after retries
    pub failed_urls: Vec<String>,

    /// Posts rejected by the quality filter
    pub rejected: usize,

    /// Posts whose fingerprint was already taken
    pub duplicates: usize,
}

/// Turns a work unit into documents: paginates the unit, cleans and
/// filters every post, and claims fingerprints in the dedup index
pub struct WorkExecutor {
    source: String,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    filter: Arc<dyn QualityFilter>,
    dedup: Arc<DedupIndex>,
    max_pages: u32,
}

impl WorkExecutor {
    pub fn new(
        source: &str,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        filter: Arc<dyn QualityFilter>,
        dedup: Arc<DedupIndex>,
        max_pages: u32,
    ) -> Self {
        Self {
            source: source.to_string(),
            fetcher,
            extractor,
            filter,
            dedup,
            max_pages: max_pages.max(1),
        }
    }

    /// Process a unit. Page failures are recorded, never propagated: the
    /// outcome carries whatever the reachable pages yielded.
    ///
    /// The unit is not marked visited here; that happens when the outcome is
    /// committed, so a unit abandoned before its documents are written stays
    /// eligible for the next run.
    pub async fn process(&self, unit: WorkUnit) -> UnitOutcome {
        let mut outcome = UnitOutcome {
            claims: FingerprintClaims::new(self.dedup.clone()),
            unit,
            documents: Vec::new(),
            pages_fetched: 0,
            failed_urls: Vec::new(),
            rejected: 0,
            duplicates: 0,
        };

        let mut last_known_page: Option<u32> = None;
        let mut page = 1;

        while page <= self.max_pages {
            let url = self.extractor.unit_page_url(&outcome.unit.url, page);

            let has_more = match self.fetcher.fetch(&url).await {
                Ok(html) => {
                    outcome.pages_fetched += 1;

                    if let Some(count) = self.extractor.page_count(&html) {
                        last_known_page = Some(last_known_page.map_or(count, |known| known.max(count)));
                    }

                    match self.extractor.extract_documents(&html) {
                        Ok(posts) => {
                            for post in posts {
                                self.accept(post, &mut outcome);
                            }
                        }
                        Err(e) => debug!("No posts on {}: {}", url, e),
                    }

                    self.extractor.has_next_page(&html)
                        || last_known_page.map_or(false, |last| last > page)
                }
                Err(failure) => {
                    warn!("Failed to fetch {}: {}", url, failure);
                    outcome.failed_urls.push(url);

                    // Skip past the failed page only when a later page is known to exist
                    last_known_page.map_or(false, |last| last > page)
                }
            };

            if !has_more {
                break;
            }
            page += 1;
        }

        if page > self.max_pages {
            debug!("Unit {} hit the page cap of {}", outcome.unit.unit_id, self.max_pages);
        }

        debug!(
            "Unit {}: {} pages, {} documents, {} rejected, {} duplicates",
            outcome.unit.unit_id,
            outcome.pages_fetched,
            outcome.documents.len(),
            outcome.rejected,
            outcome.duplicates
        );

        outcome
    }

    /// Clean, filter, fingerprint and claim one post
    fn accept(&self, post: RawPost, outcome: &mut UnitOutcome) {
        let text = self.filter.clean(&post.body_text);
        if !self.filter.is_acceptable(&text) {
            outcome.rejected += 1;
            return;
        }

        let fp = fingerprint(&text);
        if !outcome.claims.try_claim(&fp) {
            outcome.duplicates += 1;
            return;
        }

        outcome.documents.push(Document {
            fingerprint: fp,
            source: self.source.clone(),
            parent_unit_id: outcome.unit.unit_id.clone(),
            author: post.author,
            timestamp: post.timestamp,
            word_count: self.filter.word_count(&text),
            body_text: text,
            collected_at: Utc::now(),
        });
    }
}
