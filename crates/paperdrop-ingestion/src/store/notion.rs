//! Notion database adapter.
//!
//! Endpoints used:
//!   POST /v1/databases/{id}/query   paginated read of every row
//!   POST /v1/pages                  create one row with a paragraph body

use std::collections::HashSet;

use async_trait::async_trait;
use paperdrop_common::{PaperdropError, Result, SandboxClient};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::RecordStore;
use crate::models::{IngestedRecord, RecordId};

const NOTION_API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
/// Notion rejects rich-text items longer than this.
const RICH_TEXT_LIMIT: usize = 2000;
const QUERY_PAGE_SIZE: u32 = 100;

/// Names of the database properties records are written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionProperties {
    pub title: String,
    pub url: String,
    pub date: String,
}

impl Default for NotionProperties {
    fn default() -> Self {
        Self {
            title: "名前".to_string(),
            url: "URL".to_string(),
            date: "公開日".to_string(),
        }
    }
}

pub struct NotionStore {
    client: SandboxClient,
    api_key: SecretString,
    database_id: String,
    properties: NotionProperties,
}

impl NotionStore {
    pub fn new(
        client: SandboxClient,
        api_key: SecretString,
        database_id: impl Into<String>,
        properties: NotionProperties,
    ) -> Self {
        Self {
            client,
            api_key,
            database_id: database_id.into(),
            properties,
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self.client
            .post(url)?
            .bearer_auth(self.api_key.expose_secret())
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await
            .map_err(PaperdropError::store)?;

        let status = resp.status();
        let text = resp.text().await.map_err(PaperdropError::store)?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| PaperdropError::Store(format!("Notion returned invalid JSON: {}", e)))
    }
}

#[async_trait]
impl RecordStore for NotionStore {
    #[instrument(skip(self), fields(database_id = %self.database_id))]
    async fn list_all_titles(&self) -> Result<HashSet<String>> {
        let url = format!("{}/databases/{}/query", NOTION_API_URL, self.database_id);
        let mut titles = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let resp = self.post(&url, &query_body(cursor.as_deref())).await?;
            pages += 1;
            titles.extend(extract_titles(&resp, &self.properties.title));

            cursor = next_cursor(&resp);
            if cursor.is_none() {
                break;
            }
        }

        debug!(pages, titles = titles.len(), "Notion database snapshot read");
        Ok(titles)
    }

    #[instrument(skip(self, record), fields(title = %record.title))]
    async fn create_record(&self, record: &IngestedRecord) -> Result<RecordId> {
        let url = format!("{}/pages", NOTION_API_URL);
        let body = page_payload(&self.database_id, &self.properties, record);
        let resp = self.post(&url, &body).await?;

        let id = resp["id"]
            .as_str()
            .ok_or_else(|| PaperdropError::Store("Notion response carried no page id".to_string()))?;
        info!(page_id = id, "Notion database entry created");
        Ok(RecordId(id.to_string()))
    }
}

/// Database query body for one page of rows.
pub fn query_body(start_cursor: Option<&str>) -> Value {
    let mut body = json!({ "page_size": QUERY_PAGE_SIZE });
    if let Some(c) = start_cursor {
        body["start_cursor"] = Value::String(c.to_string());
    }
    body
}

/// Cursor of the next page, or `None` once the database is exhausted.
pub fn next_cursor(resp: &Value) -> Option<String> {
    match (resp["has_more"].as_bool(), resp["next_cursor"].as_str()) {
        (Some(true), Some(next)) if !next.is_empty() => Some(next.to_string()),
        _ => None,
    }
}

/// Store error for a non-2xx response. Notion's JSON `message` is used when
/// present, otherwise the start of the raw body (proxies answer with HTML).
pub fn api_error(status: u16, body: &str) -> PaperdropError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .unwrap_or_else(|| {
            let snippet: String = body.trim().chars().take(200).collect();
            if snippet.is_empty() { "empty response body".to_string() } else { snippet }
        });
    PaperdropError::Store(format!("Notion API [{}]: {}", status, message))
}

/// Pull the title of every row in one query response.
/// Rows whose title property is missing or empty are skipped.
pub fn extract_titles(resp: &Value, title_property: &str) -> Vec<String> {
    resp["results"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let parts = row["properties"][title_property]["title"].as_array()?;
                    let title: String = parts
                        .iter()
                        .filter_map(|p| p["plain_text"].as_str().or_else(|| p["text"]["content"].as_str()))
                        .collect();
                    (!title.is_empty()).then_some(title)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Split text into rich-text items no longer than Notion's per-item limit.
pub fn rich_text_chunks(text: &str) -> Vec<Value> {
    if text.is_empty() {
        return vec![json!({ "type": "text", "text": { "content": "" } })];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(RICH_TEXT_LIMIT)
        .map(|chunk| {
            let content: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": content } })
        })
        .collect()
}

/// Create-page payload: title, URL and date properties plus one paragraph holding the summary.
pub fn page_payload(database_id: &str, props: &NotionProperties, record: &IngestedRecord) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        props.title.clone(),
        json!({ "title": [{ "text": { "content": record.title } }] }),
    );
    properties.insert(props.url.clone(), json!({ "url": record.link }));
    properties.insert(props.date.clone(), json!({ "date": { "start": record.published } }));

    json!({
        "parent": { "database_id": database_id },
        "properties": properties,
        "children": [{
            "object": "block",
            "type": "paragraph",
            "paragraph": { "rich_text": rich_text_chunks(&record.summary) }
        }]
    })
}
