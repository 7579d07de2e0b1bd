use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a dedup key in hex characters.
pub const DEDUP_KEY_LEN: usize = 32;

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cache key for an identity string (usually a target URL).
pub fn cache_key(identity: &str) -> String {
    compute_hash(identity)
}

/// Dedup key for an already-normalized URL: the first 32 hex chars of its SHA-256.
pub fn dedup_key(normalized_url: &str) -> String {
    let mut hash = compute_hash(normalized_url);
    hash.truncate(DEDUP_KEY_LEN);
    hash
}

/// A previously processed item, keyed by the hash of its normalized URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub key: String,
    pub url: String,
    /// The discovered item as it was first surfaced.
    pub payload: serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
}

impl DedupRecord {
    pub fn new(normalized_url: impl Into<String>, payload: serde_json::Value) -> Self {
        let url = normalized_url.into();
        Self {
            key: dedup_key(&url),
            url,
            payload,
            first_seen_at: Utc::now(),
        }
    }
}

/// An item discovered on a target page that can be deduplicated by URL.
pub trait Discovered: Serialize {
    fn url(&self) -> &str;

    /// Replace the URL with its normalized absolute form.
    fn set_url(&mut self, url: String);
}

fn default_location() -> String {
    "Not specified".to_string()
}

/// A single job listing extracted from a careers page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub url: String,
    #[serde(default = "default_location")]
    pub location: String,
    /// Additional fields supplied by the extraction step.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Listing {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            location: default_location(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

impl Discovered for Listing {
    fn url(&self) -> &str {
        &self.url
    }

    fn set_url(&mut self, url: String) {
        self.url = url;
    }
}

fn default_role_keyword() -> String {
    "Software Engineer".to_string()
}

fn default_active() -> bool {
    true
}

/// A career page being monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub company_name: String,
    pub careers_url: String,
    #[serde(default = "default_role_keyword")]
    pub role_keyword: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Target {
    pub fn new(company_name: impl Into<String>, careers_url: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            careers_url: careers_url.into(),
            role_keyword: default_role_keyword(),
            active: true,
        }
    }
}
