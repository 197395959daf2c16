use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::PaperdropError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("paperdrop/", env!("CARGO_PKG_VERSION"), " (research digest)");

/// An HTTP client capped to an allowlist of hosts, with a bounded timeout on every request.
/// Every outbound call of the ingestion job goes through this client so none can hang forever.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
    timeout: Duration,
}

impl SandboxClient {
    /// Creates a client with the default allowlist and a 30 s per-request timeout.
    pub fn new() -> Result<Self, PaperdropError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a client with the default allowlist and the given per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, PaperdropError> {
        let mut allowlist = HashSet::new();
        let domains = [
            "arxiv.org",       // export.arxiv.org API + PDF downloads
            "api.notion.com",  // record store
            "api.openai.com",  // summarization
            "localhost",       // OpenAI-compatible local servers
            "127.0.0.1",
        ];
        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PaperdropError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, allowlist, timeout })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Adds the host of `url` to the allowlist, e.g. for a configured OpenAI-compatible endpoint.
    pub fn allow_url_host(&mut self, url: &str) -> Result<(), PaperdropError> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .ok_or_else(|| PaperdropError::Config(format!("Not a valid URL: {}", url)))?;
        self.allowlist.insert(host);
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                // Exact match or a subdomain of an allowed domain
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, PaperdropError> {
        self.request(reqwest::Method::GET, url)
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, PaperdropError> {
        self.request(reqwest::Method::POST, url)
    }

    pub fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, PaperdropError> {
        if !self.is_allowed(url) {
            return Err(PaperdropError::Security(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )));
        }

        Ok(self.client.request(method, url))
    }
}
