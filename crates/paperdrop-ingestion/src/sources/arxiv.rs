//! arXiv API client.
//!
//! Endpoint: http://export.arxiv.org/api/query
//!   params: search_query, start, max_results (+ optional sortBy / sortOrder)
//!
//! The response is an Atom feed; each <entry> carries the title, an
//! "alternate" link to the abstract page and the publication timestamp.

use async_trait::async_trait;
use chrono::DateTime;
use paperdrop_common::{PaperdropError, Result, SandboxClient};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, instrument, warn};

use crate::models::{normalize_title, FeedPage, PaperCandidate};
use super::PaperSource;

pub const ARXIV_API_ENDPOINT: &str = "http://export.arxiv.org/api/query";

pub struct ArxivClient {
    client: SandboxClient,
    endpoint: String,
    /// "relevance" | "lastUpdatedDate" | "submittedDate"; API default when None.
    sort_by: Option<String>,
}

impl ArxivClient {
    pub fn new(client: SandboxClient) -> Self {
        Self {
            client,
            endpoint: ARXIV_API_ENDPOINT.to_string(),
            sort_by: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_sort_by(mut self, sort_by: Option<String>) -> Self {
        self.sort_by = sort_by;
        self
    }

    fn params(&self, query: &str, start: usize, max_results: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("search_query", query.to_string()),
            ("start", start.to_string()),
            ("max_results", max_results.to_string()),
        ];
        if let Some(sort_by) = &self.sort_by {
            params.push(("sortBy", sort_by.clone()));
            params.push(("sortOrder", "descending".to_string()));
        }
        params
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    #[instrument(skip(self))]
    async fn fetch_page(&self, query: &str, start: usize, max_results: usize) -> Result<FeedPage> {
        let resp = self.client
            .get(&self.endpoint)?
            .query(&self.params(query, start, max_results))
            .send()
            .await
            .map_err(PaperdropError::fetch)?;

        if !resp.status().is_success() {
            return Err(PaperdropError::Fetch(format!(
                "arXiv query failed: HTTP {}",
                resp.status()
            )));
        }

        let xml = resp.text().await.map_err(PaperdropError::fetch)?;
        let page = parse_atom_feed(&xml)?;
        debug!(
            start,
            entries = page.entries.len(),
            total = ?page.total_results,
            "arXiv page fetched"
        );
        Ok(page)
    }
}

/// Rewrite an abstract-page link into the direct PDF link.
pub fn to_document_link(abstract_link: &str) -> String {
    abstract_link.replacen("/abs/", "/pdf/", 1)
}

/// Per-entry scratch state while walking the feed.
#[derive(Default)]
struct EntryState {
    id: String,
    title: String,
    summary: String,
    published: String,
    alternate: Option<String>,
    pdf: Option<String>,
}

impl EntryState {
    fn record_link(&mut self, e: &BytesStart<'_>) {
        let mut href = None;
        let mut rel = None;
        let mut title = None;
        for attr in e.attributes().flatten() {
            let value = attr.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
            match attr.key.as_ref() {
                b"href"  => href = Some(value),
                b"rel"   => rel = Some(value),
                b"title" => title = Some(value),
                _ => {}
            }
        }
        let Some(href) = href else { return };
        if title.as_deref() == Some("pdf") {
            self.pdf.get_or_insert(href);
        } else if rel.as_deref().unwrap_or("alternate") == "alternate" {
            self.alternate.get_or_insert(href);
        }
    }

    fn into_candidate(self) -> Option<PaperCandidate> {
        let title = normalize_title(&self.title);
        if title.is_empty() {
            warn!(id = %self.id, "Skipping arXiv entry with empty title");
            return None;
        }

        let document_link = match (self.alternate, self.pdf) {
            (Some(alt), _) => to_document_link(&alt),
            (None, Some(pdf)) => pdf,
            (None, None) => {
                warn!(%title, "Skipping arXiv entry without a link");
                return None;
            }
        };

        let published = self.published.trim().to_string();
        if DateTime::parse_from_rfc3339(&published).is_err() {
            warn!(%title, %published, "Skipping arXiv entry with malformed publication date");
            return None;
        }

        Some(PaperCandidate { title, document_link, published })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    TotalResults,
}

/// Parse an arXiv Atom feed into a page of candidates.
/// Malformed entries are skipped; an arXiv error entry fails the whole page.
pub fn parse_atom_feed(xml: &str) -> Result<FeedPage> {
    let mut page = FeedPage::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<EntryState> = None;
    let mut field = Field::None;
    let mut total_text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                field = match e.name().as_ref() {
                    b"entry" => {
                        current = Some(EntryState::default());
                        Field::None
                    }
                    b"opensearch:totalResults" => Field::TotalResults,
                    // Feed-level <id>/<title> are ignored outside an entry
                    b"id"        if current.is_some() => Field::Id,
                    b"title"     if current.is_some() => Field::Title,
                    b"summary"   if current.is_some() => Field::Summary,
                    b"published" if current.is_some() => Field::Published,
                    b"link" => {
                        if let Some(ref mut entry) = current {
                            entry.record_link(e);
                        }
                        Field::None
                    }
                    _ => Field::None,
                };
            }
            Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"link" {
                    if let Some(ref mut entry) = current {
                        entry.record_link(e);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default();
                let target = match (field, current.as_mut()) {
                    (Field::TotalResults, _) => Some(&mut total_text),
                    (Field::Id, Some(entry)) => Some(&mut entry.id),
                    (Field::Title, Some(entry)) => Some(&mut entry.title),
                    (Field::Summary, Some(entry)) => Some(&mut entry.summary),
                    (Field::Published, Some(entry)) => Some(&mut entry.published),
                    _ => None,
                };
                if let Some(target) = target {
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"entry" {
                    if let Some(entry) = current.take() {
                        if entry.id.contains("/api/errors") {
                            return Err(PaperdropError::Parse(format!(
                                "arXiv API error: {}",
                                normalize_title(&entry.summary)
                            )));
                        }
                        match entry.into_candidate() {
                            Some(candidate) => page.entries.push(candidate),
                            None => page.skipped += 1,
                        }
                    }
                }
                field = Field::None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PaperdropError::Parse(format!(
                    "Malformed Atom feed at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    page.total_results = total_text.trim().parse().ok();
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <id>http://arxiv.org/api/cHxbiOdZaP56ODnBPIenZhzg5f8</id>
  <title type="html">ArXiv Query: search_query=all:llm&amp;id_list=&amp;start=0&amp;max_results=2</title>
  <updated>2024-01-20T00:00:00-05:00</updated>
  <opensearch:totalResults>1742</opensearch:totalResults>
  <opensearch:startIndex>0</opensearch:startIndex>
  <opensearch:itemsPerPage>2</opensearch:itemsPerPage>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <updated>2024-01-15T18:59:59Z</updated>
    <published>2024-01-15T18:59:59Z</published>
    <title>Scaling Laws for
      Generative Models &amp; Prompts</title>
    <summary>We study things.</summary>
    <author><name>Ada Lovelace</name></author>
    <link href="http://arxiv.org/abs/2401.00001v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.00001v1" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.00002v2</id>
    <published>2024-01-14T10:00:00Z</published>
    <title>Quantum Mechanics of Large Language Models</title>
    <link href="http://arxiv.org/abs/2401.00002v2" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_entries_and_total() {
        let page = parse_atom_feed(FEED).unwrap();
        assert_eq!(page.total_results, Some(1742));
        assert_eq!(page.entries.len(), 2);

        let first = &page.entries[0];
        assert_eq!(first.title, "Scaling Laws for Generative Models & Prompts");
        assert_eq!(first.document_link, "http://arxiv.org/pdf/2401.00001v1");
        assert_eq!(first.published, "2024-01-15T18:59:59Z");

        assert_eq!(page.entries[1].document_link, "http://arxiv.org/pdf/2401.00002v2");
    }

    #[test]
    fn test_feed_title_is_not_an_entry_title() {
        let page = parse_atom_feed(FEED).unwrap();
        assert!(page.entries.iter().all(|p| !p.title.starts_with("ArXiv Query")));
    }

    #[test]
    fn test_link_rewrite_only_touches_path_segment() {
        assert_eq!(
            to_document_link("http://arxiv.org/abs/2401.00001v1"),
            "http://arxiv.org/pdf/2401.00001v1"
        );
        assert_eq!(
            to_document_link("http://arxiv.org/abs/math/0501001v2"),
            "http://arxiv.org/pdf/math/0501001v2"
        );
    }

    #[test]
    fn test_empty_feed() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <opensearch:totalResults>0</opensearch:totalResults>
</feed>"#;
        let page = parse_atom_feed(xml).unwrap();
        assert!(page.entries.is_empty());
        assert_eq!(page.skipped, 0);
        assert_eq!(page.total_results, Some(0));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/1</id>
    <published>yesterday</published>
    <title>Bad date</title>
    <link href="http://arxiv.org/abs/1" rel="alternate"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2</id>
    <published>2024-01-01T00:00:00Z</published>
    <title>   </title>
    <link href="http://arxiv.org/abs/2" rel="alternate"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/3</id>
    <published>2024-01-01T00:00:00Z</published>
    <title>No link</title>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/4</id>
    <published>2024-01-01T00:00:00Z</published>
    <title>Fine</title>
    <link href="http://arxiv.org/abs/4" rel="alternate"/>
  </entry>
</feed>"#;
        let page = parse_atom_feed(xml).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].title, "Fine");
        assert_eq!(page.skipped, 3);
        assert_eq!(page.total_results, None);
    }

    #[test]
    fn test_pdf_link_used_when_no_alternate() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/5</id>
    <published>2024-01-01T00:00:00Z</published>
    <title>Only pdf</title>
    <link title="pdf" href="http://arxiv.org/pdf/5" rel="related"/>
  </entry>
</feed>"#;
        let page = parse_atom_feed(xml).unwrap();
        assert_eq!(page.entries[0].document_link, "http://arxiv.org/pdf/5");
    }

    #[test]
    fn test_api_error_entry_fails_the_page() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
    <updated>2024-01-01T00:00:00-05:00</updated>
    <link href="http://arxiv.org/api/errors#incorrect_id_format_for_1234" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;
        match parse_atom_feed(xml) {
            Err(PaperdropError::Parse(msg)) => assert!(msg.contains("incorrect id format")),
            other => panic!("expected parse error, got {:?}", other.map(|p| p.entries)),
        }
    }

    #[test]
    fn test_mismatched_tags_are_a_parse_error() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><title>Broken</summary></entry></feed>"#;
        assert!(matches!(parse_atom_feed(xml), Err(PaperdropError::Parse(_))));
    }

    #[test]
    fn test_query_params() {
        let c = ArxivClient::new(SandboxClient::new().unwrap())
            .with_sort_by(Some("submittedDate".to_string()));
        let params = c.params("all:llm", 20, 10);
        assert!(params.contains(&("search_query", "all:llm".to_string())));
        assert!(params.contains(&("start", "20".to_string())));
        assert!(params.contains(&("max_results", "10".to_string())));
        assert!(params.contains(&("sortBy", "submittedDate".to_string())));
    }
}
