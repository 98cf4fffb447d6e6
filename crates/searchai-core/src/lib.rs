use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("search failed: {0}")]
    Search(String),
    #[error("browser failed: {0}")]
    Browser(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("batch {index} timed out after {timeout_ms}ms")]
    BatchTimeout { index: usize, timeout_ms: u64 },
    #[error("no response: {0}")]
    NoResponse(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True for failures of an external collaborator (search engine, browser, embeddings,
    /// completions) as opposed to invalid input or local invariants.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::Search(_) | Error::Browser(_) | Error::Fetch(_) | Error::Embedding(_) | Error::Llm(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Trim a query and reject it if nothing is left.
pub fn validate_query(query: &str) -> Result<&str> {
    let q = query.trim();
    if q.is_empty() {
        return Err(Error::EmptyInput("query must be non-empty".to_string()));
    }
    Ok(q)
}

/// Canonical form of a result link: absolute, no query string, no fragment.
pub fn normalize_link(raw: &str) -> Result<String> {
    let mut u = url::Url::parse(raw.trim()).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
    u.set_query(None);
    u.set_fragment(None);
    Ok(u.to_string())
}

// ---------------------------------------------------------------------------
// Browser automation
// ---------------------------------------------------------------------------

/// Navigation "done" condition, mirroring the usual headless-browser vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Load => "load",
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::NetworkIdle => "networkidle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Options for one isolated browsing context (own cookies/storage, one page).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextOptions {
    pub user_agent: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub viewport: Option<Viewport>,
    /// Abort image/media/font requests; they never contribute text.
    pub block_resources: bool,
    pub default_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Navigation {
    pub final_url: String,
    pub status: Option<u16>,
}

#[async_trait::async_trait]
pub trait BrowserEngine: Send + Sync {
    fn name(&self) -> &'static str;
    /// Start one browser process. The caller owns it and must `close` it.
    async fn launch(&self) -> Result<Box<dyn Browser>>;
}

#[async_trait::async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh isolated context with a single page in it.
    async fn new_page(&self, opts: &ContextOptions) -> Result<Box<dyn BrowserPage>>;
    async fn close(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BrowserPage: Send + Sync {
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration)
        -> Result<Navigation>;
    async fn wait_for_load_state(&self, state: WaitUntil, timeout: Duration) -> Result<()>;
    /// Serialized DOM of the page as it currently stands.
    async fn content(&self) -> Result<String>;
    /// Close the page's context. Idempotent.
    async fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Embeddings / completions
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the generated text; an empty string means the model produced nothing.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Retrieval data model
// ---------------------------------------------------------------------------

/// Counters collected while fetching. Observability only; never drives control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMetrics {
    pub total_links: usize,
    /// Links skipped by the pre-filter (non-http(s), PDF).
    pub skipped: usize,
    /// Links past the `batch_size * max_batches` bound.
    pub beyond_bound: usize,
    pub attempted: usize,
    /// Pages whose text made it into the aggregate.
    pub succeeded: usize,
    pub failed: usize,
    /// Pages that loaded, but whose batch missed its deadline; also counted in `failed`.
    pub discarded: usize,
    pub batches_run: usize,
    pub batches_timed_out: usize,
    pub chars_before_truncation: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub text: String,
    pub links: Vec<String>,
    pub metrics: FetchMetrics,
}

/// Something that turns a query into aggregated page text.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_for_query(&self, query: &str) -> Result<FetchOutcome>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Position of the chunk within the ingest call that produced it.
    pub id: usize,
    /// Sequence number of that ingest call on the owning indexer (starts at 1).
    pub ingest: u64,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub fetch_ms: u64,
    pub ingest_ms: u64,
    pub query_embed_ms: u64,
    pub rank_ms: u64,
    pub generate_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub timings: PhaseTimings,
    pub fetch: FetchMetrics,
    pub chunks_ingested: usize,
    pub store_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub summary: String,
    pub results: Vec<SimilarityResult>,
    pub metrics: Metrics,
}
