//! Title-based novelty filtering against the record store snapshot.

use std::collections::HashSet;

use crate::models::{normalize_title, PaperCandidate};

/// Result of a novelty check.
#[derive(Debug, PartialEq, Eq)]
pub enum DedupResult {
    /// Title never seen; proceed with ingestion.
    New,
    /// Title already present in the record store.
    Known,
    /// Title already accepted earlier in this search (repeated across pages).
    Repeated,
}

/// Strict novelty filter: a candidate is admitted only if its title is in
/// neither the store snapshot nor the set already admitted in this pass.
///
/// The daily job this replaces also admitted known titles while its quota was
/// unmet; that let duplicates through, so it is deliberately not reproduced.
///
/// Titles are compared after whitespace normalisation on both sides: rows
/// written by earlier versions of the job still carry arXiv's line wrapping.
#[derive(Debug, Default)]
pub struct NoveltyFilter {
    known: HashSet<String>,
    admitted: HashSet<String>,
}

impl NoveltyFilter {
    pub fn new(known: HashSet<String>) -> Self {
        let known = known.iter().map(|t| normalize_title(t)).collect();
        Self { known, admitted: HashSet::new() }
    }

    /// Check a candidate and, if new, remember its title.
    pub fn admit(&mut self, candidate: &PaperCandidate) -> DedupResult {
        let title = normalize_title(&candidate.title);
        if self.known.contains(&title) {
            return DedupResult::Known;
        }
        if !self.admitted.insert(title) {
            return DedupResult::Repeated;
        }
        DedupResult::New
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}
