//! End-to-end ingestion pipeline.
//!
//! Orchestrates one pass of the daily job:
//!   1. Search for papers not yet in the record store (paginated, deduplicated)
//!   2. For each candidate, download the PDF and extract its text
//!   3. Summarize the text (no-op unless a summarizer is configured)
//!   4. Create one record per paper in the store
//!   5. Emit progress events via broadcast channel
//!
//! Per-candidate failures never abort the pass: they are logged, counted and
//! the next candidate is processed. A candidate that failed is still absent
//! from the store, so it is picked up again on the next run.

use std::sync::Arc;
use std::time::Instant;

use paperdrop_common::{PaperdropError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::extract::TextExtractor;
use crate::models::{IngestedRecord, PaperCandidate};
use crate::search::SearchClient;
use crate::store::RecordStore;
use crate::summarize::Summarizer;

// ── Settings ──────────────────────────────────────────────────────────────────

/// Parameters for every pass of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub query: String,
    pub max_results: usize,
    /// System instruction handed to the summarizer.
    pub system_prompt: String,
}

// ── State & progress events ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Searching,
    ExtractingAndSummarizing,
    Done,
}

/// Progress event emitted during a pass (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct IngestionProgress {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub title: Option<String>,
    pub message: String,
}

// ── Result summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Search,
    Extract,
    Summarize,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search    => "search",
            Stage::Extract   => "extract",
            Stage::Summarize => "summarize",
            Stage::Persist   => "persist",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    /// Empty for failures that precede any candidate (search).
    pub title: String,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub query: String,
    /// Novel candidates returned by search.
    pub found: usize,
    pub attempted: usize,
    pub succeeded: usize,
    /// Candidates dropped before persisting (text extraction failed).
    pub skipped: usize,
    /// Candidates whose record could not be written.
    pub failed: usize,
    /// Records persisted with an empty summary because summarization failed.
    pub summary_fallbacks: usize,
    pub errors: Vec<StageFailure>,
    pub duration_ms: u64,
}

impl IngestionReport {
    fn new(run_id: Uuid, query: &str) -> Self {
        Self {
            run_id,
            query: query.to_string(),
            found: 0,
            attempted: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            summary_fallbacks: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    fn record_failure(&mut self, title: &str, stage: Stage, err: &PaperdropError) {
        warn!(title, stage = stage.as_str(), error = %err, "Candidate stage failed");
        self.errors.push(StageFailure {
            title: title.to_string(),
            stage,
            message: err.to_string(),
        });
    }
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

enum Outcome {
    Persisted,
    Skipped,
    Failed,
}

pub struct IngestionPipeline {
    search: SearchClient,
    extractor: Arc<dyn TextExtractor>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn RecordStore>,
    settings: PipelineSettings,
    progress_tx: Option<broadcast::Sender<IngestionProgress>>,
    /// Single-flight guard: at most one pass per pipeline at a time.
    running: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        search: SearchClient,
        extractor: Arc<dyn TextExtractor>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn RecordStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            search,
            extractor,
            summarizer,
            store,
            settings,
            progress_tx: None,
            running: Mutex::new(()),
        }
    }

    /// Progress events are sent on `tx` if provided.
    pub fn with_progress(mut self, tx: broadcast::Sender<IngestionProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn emit(&self, run_id: Uuid, state: PipelineState, title: Option<&str>, message: String) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(IngestionProgress {
                run_id,
                state,
                title: title.map(String::from),
                message,
            });
        }
    }

    /// Run one pass: search → extract → summarize → persist.
    ///
    /// Fails only when another pass is in progress or the record store cannot
    /// be read; every per-candidate failure is reported, not returned.
    #[instrument(skip_all, fields(query = %self.settings.query, max_results = self.settings.max_results))]
    pub async fn run_ingestion_cycle(&self) -> Result<IngestionReport> {
        let _running = self.running.try_lock().map_err(|_| PaperdropError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let t0 = Instant::now();
        let mut report = IngestionReport::new(run_id, &self.settings.query);
        info!(run_id = %run_id, "Starting ingestion pass");

        // ── 1. Search ─────────────────────────────────────────────────────────
        self.emit(run_id, PipelineState::Searching, None, format!("Searching: {}", self.settings.query));
        let candidates = match self.search.search(&self.settings.query, self.settings.max_results).await {
            Ok(c) => c,
            // Store snapshot unreadable: nothing can be deduplicated safely
            Err(e @ PaperdropError::Store(_)) => return Err(e),
            Err(e) => {
                report.record_failure("", Stage::Search, &e);
                Vec::new()
            }
        };
        report.found = candidates.len();

        // ── 2–4. Per candidate ───────────────────────────────────────────────
        for candidate in &candidates {
            self.emit(
                run_id,
                PipelineState::ExtractingAndSummarizing,
                Some(&candidate.title),
                format!("Processing {}", candidate.document_link),
            );
            report.attempted += 1;
            match self.process_candidate(candidate, &mut report).await {
                Outcome::Persisted => report.succeeded += 1,
                Outcome::Skipped   => report.skipped += 1,
                Outcome::Failed    => report.failed += 1,
            }
        }

        report.duration_ms = t0.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            found       = report.found,
            attempted   = report.attempted,
            succeeded   = report.succeeded,
            skipped     = report.skipped,
            failed      = report.failed,
            fallbacks   = report.summary_fallbacks,
            duration_ms = report.duration_ms,
            "Ingestion pass complete"
        );
        self.emit(run_id, PipelineState::Done, None, format!(
            "Done. {} of {} papers stored, {} skipped, {} failed.",
            report.succeeded, report.attempted, report.skipped, report.failed
        ));

        Ok(report)
    }

    async fn process_candidate(&self, paper: &PaperCandidate, report: &mut IngestionReport) -> Outcome {
        info!(title = %paper.title, link = %paper.document_link, published = %paper.published, "Processing paper");

        let text = match self.extractor.extract(&paper.document_link).await {
            Ok(t) => t,
            Err(e) => {
                report.record_failure(&paper.title, Stage::Extract, &e);
                return Outcome::Skipped;
            }
        };
        debug!(title = %paper.title, chars = text.len(), "Text extracted");

        let summary = match self.summarizer.summarize(&self.settings.system_prompt, &text).await {
            Ok(s) => s,
            Err(e) => {
                report.record_failure(&paper.title, Stage::Summarize, &e);
                report.summary_fallbacks += 1;
                String::new()
            }
        };

        let record = IngestedRecord::from_candidate(paper, summary);
        match self.store.create_record(&record).await {
            Ok(id) => {
                info!(title = %paper.title, record_id = %id, "Paper ingested");
                Outcome::Persisted
            }
            Err(e) => {
                report.record_failure(&paper.title, Stage::Persist, &e);
                Outcome::Failed
            }
        }
    }
}

// ── Query builder ─────────────────────────────────────────────────────────────

/// Build an arXiv query matching any of `terms`. Multi-word terms are quoted.
pub fn build_query(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| if t.contains(' ') { format!("all:\"{}\"", t) } else { format!("all:{}", t) })
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::models::{FeedPage, RecordId};
    use crate::sources::PaperSource;
    use crate::store::InMemoryStore;
    use crate::summarize::NoopSummarizer;

    fn paper(title: &str) -> PaperCandidate {
        PaperCandidate {
            title: title.to_string(),
            document_link: format!("http://arxiv.org/pdf/{}", title.replace(' ', "-")),
            published: "2024-01-15T18:59:59Z".to_string(),
        }
    }

    struct ListSource(Vec<String>);

    #[async_trait]
    impl PaperSource for ListSource {
        async fn fetch_page(&self, _q: &str, start: usize, max: usize) -> Result<FeedPage> {
            let end = (start + max).min(self.0.len());
            let entries = if start < end {
                self.0[start..end].iter().map(|t| paper(t)).collect()
            } else {
                vec![]
            };
            Ok(FeedPage { entries, total_results: Some(self.0.len()), ..Default::default() })
        }
    }

    struct DownSource;

    #[async_trait]
    impl PaperSource for DownSource {
        async fn fetch_page(&self, _q: &str, _s: usize, _m: usize) -> Result<FeedPage> {
            Err(PaperdropError::Fetch("HTTP 503 Service Unavailable".to_string()))
        }
    }

    /// Returns "text of <link>", failing for links containing any of `fail_on`.
    #[derive(Default)]
    struct FakeExtractor {
        fail_on: Vec<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl TextExtractor for FakeExtractor {
        async fn extract(&self, link: &str) -> Result<String> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail_on.iter().any(|f| link.contains(f.as_str())) {
                return Err(PaperdropError::Parse("Not a readable PDF".to_string()));
            }
            Ok(format!("text of {link}"))
        }
    }

    struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(&self, prompt: &str, text: &str) -> Result<String> {
            Ok(format!("{prompt}: {text}"))
        }
    }

    struct DownSummarizer;

    #[async_trait]
    impl Summarizer for DownSummarizer {
        async fn summarize(&self, _p: &str, _t: &str) -> Result<String> {
            Err(PaperdropError::Summarization("API error [429]: quota".to_string()))
        }
    }

    /// In-memory store whose n-th create call (1-based) fails.
    struct FailingNthStore {
        inner: InMemoryStore,
        fail_at: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FailingNthStore {
        async fn list_all_titles(&self) -> Result<HashSet<String>> {
            self.inner.list_all_titles().await
        }
        async fn create_record(&self, record: &IngestedRecord) -> Result<RecordId> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_at {
                return Err(PaperdropError::Store("Notion API [409]: conflict".to_string()));
            }
            self.inner.create_record(record).await
        }
    }

    struct UnreachableStore;

    #[async_trait]
    impl RecordStore for UnreachableStore {
        async fn list_all_titles(&self) -> Result<HashSet<String>> {
            Err(PaperdropError::Store("Notion API [401]: API token is invalid.".to_string()))
        }
        async fn create_record(&self, _r: &IngestedRecord) -> Result<RecordId> {
            unreachable!()
        }
    }

    fn titles(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Paper {i}")).collect()
    }

    fn settings(max_results: usize) -> PipelineSettings {
        PipelineSettings {
            query: "all:llm".to_string(),
            max_results,
            system_prompt: "Summarize".to_string(),
        }
    }

    fn pipeline(
        source: Arc<dyn PaperSource>,
        store: Arc<dyn RecordStore>,
        extractor: FakeExtractor,
        summarizer: Arc<dyn Summarizer>,
        max_results: usize,
    ) -> IngestionPipeline {
        IngestionPipeline::new(
            SearchClient::new(source, store.clone()),
            Arc::new(extractor),
            summarizer,
            store,
            settings(max_results),
        )
    }

    #[tokio::test]
    async fn test_store_failure_for_second_of_five_is_not_fatal() {
        let store = Arc::new(FailingNthStore {
            inner: InMemoryStore::new(),
            fail_at: 2,
            calls: AtomicUsize::new(0),
        });
        let p = pipeline(
            Arc::new(ListSource(titles(5))),
            store.clone(),
            FakeExtractor::default(),
            Arc::new(NoopSummarizer),
            5,
        );

        let report = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);

        let stored: Vec<String> = store.inner.records().into_iter().map(|r| r.title).collect();
        assert_eq!(stored, vec!["Paper 1", "Paper 3", "Paper 4", "Paper 5"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].title, "Paper 2");
        assert_eq!(report.errors[0].stage, Stage::Persist);
    }

    #[tokio::test]
    async fn test_summarization_disabled_persists_empty_summaries() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(
            Arc::new(ListSource(titles(3))),
            store.clone(),
            FakeExtractor::default(),
            Arc::new(NoopSummarizer),
            10,
        );

        let report = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(report.succeeded, 3);
        let records = store.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.summary.is_empty()));
        assert!(records.iter().all(|r| r.link.starts_with("http://arxiv.org/pdf/")));
    }

    #[tokio::test]
    async fn test_summary_uses_prompt_and_extracted_text() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(
            Arc::new(ListSource(titles(1))),
            store.clone(),
            FakeExtractor::default(),
            Arc::new(EchoSummarizer),
            1,
        );
        p.run_ingestion_cycle().await.unwrap();
        assert_eq!(
            store.records()[0].summary,
            "Summarize: text of http://arxiv.org/pdf/Paper-1"
        );
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_candidate() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(
            Arc::new(ListSource(titles(3))),
            store.clone(),
            FakeExtractor { fail_on: vec!["Paper-2".to_string()], delay: None },
            Arc::new(NoopSummarizer),
            3,
        );

        let report = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.errors[0].stage, Stage::Extract);
        assert!(store.records().iter().all(|r| r.title != "Paper 2"));
    }

    #[tokio::test]
    async fn test_summarization_failure_falls_back_to_empty_summary() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(
            Arc::new(ListSource(titles(2))),
            store.clone(),
            FakeExtractor::default(),
            Arc::new(DownSummarizer),
            2,
        );

        let report = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.summary_fallbacks, 2);
        assert!(store.records().iter().all(|r| r.summary.is_empty()));
        assert!(report.errors.iter().all(|e| e.stage == Stage::Summarize));
    }

    #[tokio::test]
    async fn test_second_run_without_new_papers_adds_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(
            Arc::new(ListSource(titles(4))),
            store.clone(),
            FakeExtractor::default(),
            Arc::new(NoopSummarizer),
            10,
        );

        let first = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(first.succeeded, 4);

        let second = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(second.found, 0);
        assert_eq!(second.attempted, 0);
        assert_eq!(store.records().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_candidate_is_retried_next_run() {
        let store = Arc::new(FailingNthStore {
            inner: InMemoryStore::new(),
            fail_at: 1,
            calls: AtomicUsize::new(0),
        });
        let p = pipeline(
            Arc::new(ListSource(titles(2))),
            store.clone(),
            FakeExtractor::default(),
            Arc::new(NoopSummarizer),
            10,
        );

        p.run_ingestion_cycle().await.unwrap();
        let second = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(second.attempted, 1);
        assert_eq!(second.succeeded, 1);
        assert_eq!(store.inner.records().len(), 2);
    }

    #[tokio::test]
    async fn test_search_failure_reports_and_completes() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(
            Arc::new(DownSource),
            store.clone(),
            FakeExtractor::default(),
            Arc::new(NoopSummarizer),
            10,
        );

        let report = p.run_ingestion_cycle().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].stage, Stage::Search);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_the_run() {
        let p = pipeline(
            Arc::new(ListSource(titles(2))),
            Arc::new(UnreachableStore),
            FakeExtractor::default(),
            Arc::new(NoopSummarizer),
            10,
        );
        assert!(matches!(p.run_ingestion_cycle().await, Err(PaperdropError::Store(_))));
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(
            Arc::new(ListSource(titles(1))),
            store.clone(),
            FakeExtractor { fail_on: vec![], delay: Some(Duration::from_millis(20)) },
            Arc::new(NoopSummarizer),
            1,
        );

        let (a, b) = tokio::join!(p.run_ingestion_cycle(), p.run_ingestion_cycle());
        assert!(a.is_ok());
        assert!(matches!(b, Err(PaperdropError::AlreadyRunning)));
        assert_eq!(store.records().len(), 1);

        // Guard released once the first pass finished
        assert!(p.run_ingestion_cycle().await.is_ok());
    }

    #[tokio::test]
    async fn test_progress_events_follow_state_machine() {
        let (tx, mut rx) = broadcast::channel(16);
        let p = pipeline(
            Arc::new(ListSource(titles(2))),
            Arc::new(InMemoryStore::new()),
            FakeExtractor::default(),
            Arc::new(NoopSummarizer),
            2,
        )
        .with_progress(tx);

        p.run_ingestion_cycle().await.unwrap();

        let mut states = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            states.push(ev.state);
        }
        assert_eq!(
            states,
            vec![
                PipelineState::Searching,
                PipelineState::ExtractingAndSummarizing,
                PipelineState::ExtractingAndSummarizing,
                PipelineState::Done,
            ]
        );
    }

    #[test]
    fn test_build_query_quotes_phrases() {
        let terms = vec![
            "deep learning".to_string(),
            "prompt".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(build_query(&terms), "all:\"deep learning\" OR all:prompt");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Persist.as_str(), "persist");
        assert_eq!(
            serde_json::to_string(&PipelineState::ExtractingAndSummarizing).unwrap(),
            "\"extracting_and_summarizing\""
        );
    }
}
