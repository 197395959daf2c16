//! Record store adapters.
//!
//! The store is the single piece of persistent state: one entry per ingested
//! paper. Reads snapshot every title; writes create one entry per call with
//! no batching and no transaction across records.

pub mod notion;

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use paperdrop_common::Result;

use crate::models::{IngestedRecord, RecordId};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every title currently present in the store.
    async fn list_all_titles(&self) -> Result<HashSet<String>>;

    /// Create one new entry. Each call is a single remote write.
    async fn create_record(&self, record: &IngestedRecord) -> Result<RecordId>;
}

/// Process-local store. Backs `--dry-run` and the pipeline tests.
/// Titles of created records are visible to later `list_all_titles` calls.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    seeded: HashSet<String>,
    records: Mutex<Vec<IngestedRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store with titles that exist elsewhere.
    pub fn with_titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeded: titles.into_iter().map(Into::into).collect(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Records created through this store, in write order.
    pub fn records(&self) -> Vec<IngestedRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn list_all_titles(&self) -> Result<HashSet<String>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut titles = self.seeded.clone();
        titles.extend(records.iter().map(|r| r.title.clone()));
        Ok(titles)
    }

    async fn create_record(&self, record: &IngestedRecord) -> Result<RecordId> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record.clone());
        Ok(RecordId(format!("mem-{}", records.len())))
    }
}
