//! Paginated, novelty-filtered paper search.
//!
//! Pages through a `PaperSource` until `max_results` novel candidates are
//! collected. The record store is read once per search, not once per page.

use std::sync::Arc;

use paperdrop_common::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::dedup::{DedupResult, NoveltyFilter};
use crate::models::PaperCandidate;
use crate::sources::PaperSource;
use crate::store::RecordStore;

/// Pagination caps. Without them a query with fewer novel hits than
/// `max_results` would page forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationLimits {
    /// Hard cap on pages fetched per search.
    pub max_pages: usize,
    /// Stop after this many consecutive pages contributed no novel title.
    pub max_empty_pages: usize,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self { max_pages: 10, max_empty_pages: 3 }
    }
}

/// Why pagination ended; logged and exposed for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QuotaReached,
    SourceExhausted,
    EmptyPages,
    PageCap,
    FetchFailed,
}

pub struct SearchClient {
    source: Arc<dyn PaperSource>,
    store: Arc<dyn RecordStore>,
    limits: PaginationLimits,
}

impl SearchClient {
    pub fn new(source: Arc<dyn PaperSource>, store: Arc<dyn RecordStore>) -> Self {
        Self { source, store, limits: PaginationLimits::default() }
    }

    pub fn with_limits(mut self, limits: PaginationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Return at most `max_results` candidates whose titles are absent from the store.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<PaperCandidate>> {
        self.search_with_reason(query, max_results).await.map(|(papers, _)| papers)
    }

    #[instrument(skip(self))]
    pub async fn search_with_reason(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<(Vec<PaperCandidate>, StopReason)> {
        if max_results == 0 {
            return Ok((Vec::new(), StopReason::QuotaReached));
        }

        let mut filter = NoveltyFilter::new(self.store.list_all_titles().await?);
        debug!(known = filter.known_count(), "Known-title snapshot loaded");

        let mut papers: Vec<PaperCandidate> = Vec::new();
        let mut start = 0usize;
        let mut pages = 0usize;
        let mut empty_streak = 0usize;

        let reason = loop {
            let page = match self.source.fetch_page(query, start, max_results).await {
                Ok(page) => page,
                // Nothing collected yet: the caller should see the failure
                Err(e) if papers.is_empty() => return Err(e),
                Err(e) => {
                    warn!(start, error = %e, "Search page failed; keeping candidates collected so far");
                    break StopReason::FetchFailed;
                }
            };
            pages += 1;

            // A page of only malformed entries is not the end of the feed
            if page.entries.is_empty() && page.skipped == 0 {
                break StopReason::SourceExhausted;
            }

            let mut novel = 0usize;
            let mut known = 0usize;
            for candidate in page.entries {
                match filter.admit(&candidate) {
                    DedupResult::New => {
                        novel += 1;
                        papers.push(candidate);
                    }
                    DedupResult::Known => known += 1,
                    DedupResult::Repeated => {}
                }
            }
            debug!(start, novel, known, "Search page filtered");

            start += max_results;
            empty_streak = if novel == 0 { empty_streak + 1 } else { 0 };

            if papers.len() >= max_results {
                break StopReason::QuotaReached;
            }
            if page.total_results.is_some_and(|total| start >= total) {
                break StopReason::SourceExhausted;
            }
            if empty_streak >= self.limits.max_empty_pages {
                break StopReason::EmptyPages;
            }
            if pages >= self.limits.max_pages {
                break StopReason::PageCap;
            }
        };

        papers.truncate(max_results);
        if papers.is_empty() {
            info!(?reason, "No papers matched the query that are not already stored");
        } else {
            info!(n = papers.len(), pages, ?reason, "Search complete");
        }
        Ok((papers, reason))
    }
}
