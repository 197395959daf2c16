//! paperdrop-ingestion: Daily paper ingestion pipeline.
//! - Paper discovery (arXiv Atom feed), paginated until enough novel titles are found
//! - Novelty filtering against the titles already in the record store
//! - Full-text retrieval and PDF text extraction
//! - Optional LLM summarization
//! - Record persistence (Notion database, in-memory for dry runs and tests)

pub mod sources;
pub mod dedup;
pub mod models;
pub mod search;
pub mod extract;
pub mod summarize;
pub mod store;
pub mod pipeline;
