use std::sync::Arc;
use tracing::debug;

use crate::crawler::dedup::DedupIndex;
use crate::crawler::task::ListingPage;
use crate::extract::ContentExtractor;
use crate::fetch::{FetchFailure, PageFetcher};

/// Walks the paginated listings of one source
pub struct WorkDiscovery {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    dedup: Arc<DedupIndex>,
}

impl WorkDiscovery {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        dedup: Arc<DedupIndex>,
    ) -> Self {
        Self { fetcher, extractor, dedup }
    }

    /// Fetch listing page `page` of a category and drop units already visited.
    ///
    /// `total_seen` counts every unit on the page, so a page whose units
    /// were all visited is distinguishable from the end of pagination.
    pub async fn next_page(&self, category_url: &str, page: u32) -> Result<ListingPage, FetchFailure> {
        let url = self.extractor.listing_page_url(category_url, page);

        let html = match self.fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(FetchFailure::HttpError(404)) if page > 1 => {
                debug!("Listing page {} does not exist, end of category", url);
                return Ok(ListingPage::default());
            }
            Err(failure) => return Err(failure),
        };

        // Some forums serve the last page for any page number past the end
        match self.extractor.listing_last_page(&html) {
            Some(last) if page > last => {
                debug!("Listing page {} is past the last page ({})", url, last);
                return Ok(ListingPage::default());
            }
            None if page > 1 && self.extractor.redirects_past_last_page() => {
                debug!("Listing page {} has no pagination, category has a single page", url);
                return Ok(ListingPage::default());
            }
            _ => {}
        }

        let all = self.extractor.extract_units(&html, &url);
        let total_seen = all.len();
        let units: Vec<_> = all
            .into_iter()
            .filter(|unit| self.dedup.is_new_unit(&unit.unit_id))
            .collect();

        debug!("Listing {}: {} units, {} new", url, total_seen, units.len());

        Ok(ListingPage { units, total_seen })
    }
}
