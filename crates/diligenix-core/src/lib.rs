use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod agent;
pub mod config;
pub mod events;
pub mod planner;
pub mod report;
pub mod research;
pub mod run;
pub mod synthesis;

pub use agent::{Agent, RunHandle};
pub use config::{default_section_catalog, PipelineConfig, SectionSpec};
pub use events::{EventSink, FailureKind, RunEvent};
pub use report::render_markdown;
pub use run::{ReportSection, RunPhase, RunState, SourceRecord, VectorSummary};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("worker failed: {0}")]
    Worker(String),
}

impl Error {
    /// Coarse classification surfaced on `RunFailed`.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::ModelUnavailable(_) => FailureKind::ModelUnavailable,
            Error::Model(_) => FailureKind::Model,
            _ => FailureKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a chat-style generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Stateless request/response text generation.
///
/// Implementations should map transport failures (connect, timeout, DNS) to
/// `Error::ModelUnavailable` and everything else (HTTP status, auth, decode) to
/// `Error::Model`.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results: Some(max_results),
            language: None,
            country: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub timings_ms: BTreeMap<String, u128>,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

/// Turns a URL into its main readable text. Any failure yields `None`.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the operation (network + body read).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
}

impl FetchRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
    pub timings_ms: BTreeMap<String, u128>,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_separates_unreachable_from_other_model_errors() {
        assert_eq!(
            Error::ModelUnavailable("connect refused".into()).failure_kind(),
            FailureKind::ModelUnavailable
        );
        assert_eq!(
            Error::Model("HTTP 401".into()).failure_kind(),
            FailureKind::Model
        );
        assert_eq!(
            Error::Search("boom".into()).failure_kind(),
            FailureKind::Other
        );
    }

    #[test]
    fn chat_turn_roles_serialize_lowercase() {
        let v = serde_json::to_value(ChatTurn::system("x")).unwrap();
        assert_eq!(v["role"].as_str(), Some("system"));
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}
