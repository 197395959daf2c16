//! Full-text retrieval: download a PDF and extract its text page by page.

use async_trait::async_trait;
use paperdrop_common::{PaperdropError, Result, SandboxClient};
use tracing::{debug, instrument, warn};

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Download the document at `document_link` and return its plain text.
    async fn extract(&self, document_link: &str) -> Result<String>;
}

/// Downloads PDFs through the sandboxed client and extracts text with lopdf.
pub struct PdfTextExtractor {
    client: SandboxClient,
}

impl PdfTextExtractor {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url)?.send().await.map_err(PaperdropError::fetch)?;
        if !resp.status().is_success() {
            return Err(PaperdropError::Fetch(format!(
                "PDF download failed: HTTP {}",
                resp.status()
            )));
        }
        let bytes = resp.bytes().await.map_err(PaperdropError::fetch)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    #[instrument(skip(self))]
    async fn extract(&self, document_link: &str) -> Result<String> {
        let bytes = self.download(document_link).await?;
        debug!(bytes = bytes.len(), "PDF downloaded");

        // lopdf parsing is CPU-bound; keep it off the async workers
        let text = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .map_err(|e| PaperdropError::Parse(format!("PDF parse task failed: {}", e)))??;

        if text.trim().is_empty() {
            warn!(document_link, "PDF contains no extractable text (scanned document?)");
        }
        Ok(text)
    }
}

/// Parse PDF bytes and return the text of every page, in page order, joined by newlines.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| PaperdropError::Parse(format!("Not a readable PDF: {}", e)))?;

    // BTreeMap keyed by 1-based page number, so iteration is in page order
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(PaperdropError::Parse("PDF has no pages".to_string()));
    }

    let mut texts = Vec::with_capacity(pages.len());
    for page_number in pages.keys() {
        let text = doc
            .extract_text(&[*page_number])
            .map_err(|e| PaperdropError::Parse(format!("Text extraction failed on page {}: {}", page_number, e)))?;
        texts.push(text);
    }

    Ok(join_pages(&texts))
}

/// Join per-page text with a single newline between pages.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(|p| p.as_ref().trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}
