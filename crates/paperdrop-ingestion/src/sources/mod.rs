//! Paper-search source clients.

pub mod arxiv;

use async_trait::async_trait;
use paperdrop_common::Result;
use crate::models::FeedPage;

/// A paginated paper-search API.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch `max_results` entries starting at offset `start`.
    async fn fetch_page(
        &self,
        query: &str,
        start: usize,
        max_results: usize,
    ) -> Result<FeedPage>;
}
