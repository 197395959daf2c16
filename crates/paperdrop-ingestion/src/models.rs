//! Data models for the ingestion pipeline.

use serde::{Deserialize, Serialize};

/// A paper discovered via search, not yet confirmed novel or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperCandidate {
    pub title: String,
    /// Direct link to the full-text PDF.
    pub document_link: String,
    /// RFC 3339 timestamp as published by the feed.
    pub published: String,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub entries: Vec<PaperCandidate>,
    /// Total number of hits reported by the feed, when present.
    pub total_results: Option<usize>,
    /// Entries present in the feed but dropped as malformed.
    pub skipped: usize,
}

/// A record written to the record store. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedRecord {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: String,
}

impl IngestedRecord {
    pub fn from_candidate(candidate: &PaperCandidate, summary: String) -> Self {
        Self {
            title: candidate.title.clone(),
            link: candidate.document_link.clone(),
            summary,
            published: candidate.published.clone(),
        }
    }
}

/// Identifier assigned by the record store to a newly created record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapse runs of whitespace (arXiv wraps long titles over several lines).
pub fn normalize_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
