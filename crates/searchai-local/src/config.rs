//! Pipeline configuration.
//!
//! One explicit structure per component, each with documented defaults. Precedence, lowest to
//! highest: `Default` impls, `SEARCHAI_*` environment variables (`PipelineConfig::from_env`),
//! command-line flags (applied by the binary).

use searchai_core::{Error, Result, Viewport};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Desktop Chrome identity used for page contexts.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Identity used for the results page. Older builds get the plain HTML results markup.
pub const SEARCH_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.36";

pub const DEFAULT_SYSTEM_PROMPT: &str = "Act as a professional investigative journalist and provide a detailed explanation based on the provided context.";

/// Trimmed, non-empty variable lookup with typed accessors.
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<T>()
                .map(Some)
                .map_err(|_| Error::InvalidConfig(format!("{key}={v:?} is not a valid value"))),
        }
    }

    fn ms(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| {
            matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }
}

/// Show only enough of a secret to tell two keys apart.
pub fn redact_secret(secret: &str) -> String {
    let n = secret.chars().count();
    if n <= 8 {
        return "***".to_string();
    }
    let tail: String = secret.chars().skip(n - 4).collect();
    format!("***{tail}")
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Search endpoint; the query is appended as the `q` parameter.
    pub search_url: String,
    /// CSS selector matching organic result anchors on the rendered results page.
    pub anchor_selector: String,
    /// Links whose host contains any of these tokens are dropped (engine's own pages, video).
    pub blocked_host_tokens: Vec<String>,
    pub user_agent: String,
    /// Bound for navigation and the post-load wait on the results page.
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            search_url: "https://www.google.com/search".to_string(),
            anchor_selector: "a[jsname]".to_string(),
            blocked_host_tokens: vec!["google".to_string(), "youtube".to_string()],
            user_agent: SEARCH_USER_AGENT.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Links fetched concurrently per batch.
    pub batch_size: usize,
    /// Batches ever processed; links past `batch_size * max_batches` are never fetched.
    pub max_batches: usize,
    /// Navigation bound for one page.
    pub page_timeout: Duration,
    /// Item `i` of a batch starts `i * stagger` after the batch.
    pub stagger: Duration,
    /// Aggregated text is truncated (not rejected) past this many characters.
    pub max_content_chars: usize,
    /// Bound for a whole batch; a late batch contributes nothing.
    pub batch_timeout: Duration,
    /// Random pause before each navigation is drawn from `[jitter_min, jitter_max)`.
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    /// Pause after DOM readiness before extraction.
    pub settle_delay: Duration,
    pub referer: Option<String>,
    /// Joins page texts within a batch and batch texts with each other.
    pub separator: String,
    pub block_resources: bool,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub viewport: Viewport,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let headers = [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
            ("Accept-Language", "en-US,en;q=0.5"),
            ("Upgrade-Insecure-Requests", "1"),
            ("Sec-Fetch-Dest", "document"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-Site", "none"),
            ("Sec-Fetch-User", "?1"),
            ("DNT", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            batch_size: 8,
            max_batches: 5,
            page_timeout: Duration::from_secs(45),
            stagger: Duration::from_secs(1),
            max_content_chars: 1_000_000,
            batch_timeout: Duration::from_secs(75),
            jitter_min: Duration::from_millis(100),
            jitter_max: Duration::from_millis(300),
            settle_delay: Duration::from_secs(1),
            referer: Some("https://www.google.com/".to_string()),
            separator: " ".to_string(),
            block_resources: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers,
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
        }
    }
}

impl FetchConfig {
    /// Most links that will ever be attempted for one call.
    pub fn max_links(&self) -> usize {
        self.batch_size.saturating_mul(self.max_batches)
    }

    /// Zero delays everywhere; handy for fixtures and tests.
    pub fn without_delays(mut self) -> Self {
        self.stagger = Duration::ZERO;
        self.jitter_min = Duration::ZERO;
        self.jitter_max = Duration::ZERO;
        self.settle_delay = Duration::ZERO;
        self
    }
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks; must be < `chunk_size`.
    pub overlap: usize,
    /// Every embedding must have exactly this many components.
    pub dimension: usize,
    /// Store capacity; the oldest entry is evicted first.
    pub capacity: usize,
    pub default_k: usize,
    /// Chunk embedding requests in flight at once.
    pub embed_concurrency: usize,
    pub system_prompt: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 100,
            dimension: 1536,
            capacity: 1000,
            default_k: 5,
            embed_concurrency: 16,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            embedding_model: "text-embedding-ada-002".to_string(),
            chat_model: "gpt-4o".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(redact_secret))
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub resolver: ResolverConfig,
    pub fetch: FetchConfig,
    pub indexer: IndexerConfig,
    pub openai: OpenAiConfig,
}

impl PipelineConfig {
    /// Defaults overlaid with environment variables, validated.
    ///
    /// Recognized variables:
    /// - `SEARCHAI_SEARCH_URL`, `SEARCHAI_ANCHOR_SELECTOR`, `SEARCHAI_SEARCH_TIMEOUT_MS`
    /// - `SEARCHAI_BATCH_SIZE`, `SEARCHAI_MAX_BATCHES`, `SEARCHAI_PAGE_TIMEOUT_MS`,
    ///   `SEARCHAI_STAGGER_MS`, `SEARCHAI_BATCH_TIMEOUT_MS`, `SEARCHAI_MAX_CONTENT_CHARS`,
    ///   `SEARCHAI_SETTLE_MS`, `SEARCHAI_BLOCK_RESOURCES`
    /// - `SEARCHAI_CHUNK_SIZE`, `SEARCHAI_CHUNK_OVERLAP`, `SEARCHAI_EMBEDDING_DIMENSION`,
    ///   `SEARCHAI_STORE_CAPACITY`, `SEARCHAI_EMBED_CONCURRENCY`
    /// - `SEARCHAI_OPENAI_BASE_URL`, `SEARCHAI_EMBEDDING_MODEL`, `SEARCHAI_CHAT_MODEL`,
    ///   `SEARCHAI_OPENAI_TIMEOUT_MS`, `SEARCHAI_OPENAI_API_KEY` (or `OPENAI_API_KEY`)
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    /// Like [`PipelineConfig::from_env`], reading variables through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);
        let mut c = Self::default();

        if let Some(v) = vars.get("SEARCHAI_SEARCH_URL") {
            c.resolver.search_url = v;
        }
        if let Some(v) = vars.get("SEARCHAI_ANCHOR_SELECTOR") {
            c.resolver.anchor_selector = v;
        }
        if let Some(v) = vars.ms("SEARCHAI_SEARCH_TIMEOUT_MS")? {
            c.resolver.timeout = v;
        }

        if let Some(v) = vars.parse("SEARCHAI_BATCH_SIZE")? {
            c.fetch.batch_size = v;
        }
        if let Some(v) = vars.parse("SEARCHAI_MAX_BATCHES")? {
            c.fetch.max_batches = v;
        }
        if let Some(v) = vars.ms("SEARCHAI_PAGE_TIMEOUT_MS")? {
            c.fetch.page_timeout = v;
        }
        if let Some(v) = vars.ms("SEARCHAI_STAGGER_MS")? {
            c.fetch.stagger = v;
        }
        if let Some(v) = vars.ms("SEARCHAI_BATCH_TIMEOUT_MS")? {
            c.fetch.batch_timeout = v;
        }
        if let Some(v) = vars.parse("SEARCHAI_MAX_CONTENT_CHARS")? {
            c.fetch.max_content_chars = v;
        }
        if let Some(v) = vars.ms("SEARCHAI_SETTLE_MS")? {
            c.fetch.settle_delay = v;
        }
        if let Some(v) = vars.flag("SEARCHAI_BLOCK_RESOURCES") {
            c.fetch.block_resources = v;
        }

        if let Some(v) = vars.parse("SEARCHAI_CHUNK_SIZE")? {
            c.indexer.chunk_size = v;
        }
        if let Some(v) = vars.parse("SEARCHAI_CHUNK_OVERLAP")? {
            c.indexer.overlap = v;
        }
        if let Some(v) = vars.parse("SEARCHAI_EMBEDDING_DIMENSION")? {
            c.indexer.dimension = v;
        }
        if let Some(v) = vars.parse("SEARCHAI_STORE_CAPACITY")? {
            c.indexer.capacity = v;
        }
        if let Some(v) = vars.parse("SEARCHAI_EMBED_CONCURRENCY")? {
            c.indexer.embed_concurrency = v;
        }

        if let Some(v) = vars.get("SEARCHAI_OPENAI_BASE_URL") {
            c.openai.base_url = v;
        }
        if let Some(v) = vars.get("SEARCHAI_EMBEDDING_MODEL") {
            c.openai.embedding_model = v;
        }
        if let Some(v) = vars.get("SEARCHAI_CHAT_MODEL") {
            c.openai.chat_model = v;
        }
        if let Some(v) = vars.ms("SEARCHAI_OPENAI_TIMEOUT_MS")? {
            c.openai.timeout = v;
        }
        c.openai.api_key = vars
            .get("SEARCHAI_OPENAI_API_KEY")
            .or_else(|| vars.get("OPENAI_API_KEY"));

        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.fetch;
        if f.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if f.max_batches == 0 {
            return Err(Error::InvalidConfig("max_batches must be >= 1".to_string()));
        }
        if f.jitter_max < f.jitter_min {
            return Err(Error::InvalidConfig(
                "jitter_max must be >= jitter_min".to_string(),
            ));
        }
        let i = &self.indexer;
        if i.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be >= 1".to_string()));
        }
        if i.overlap >= i.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                i.overlap, i.chunk_size
            )));
        }
        if i.dimension == 0 {
            return Err(Error::InvalidConfig("dimension must be >= 1".to_string()));
        }
        if i.capacity == 0 {
            return Err(Error::InvalidConfig("store capacity must be >= 1".to_string()));
        }
        if i.default_k == 0 {
            return Err(Error::InvalidConfig("default_k must be >= 1".to_string()));
        }
        if i.embed_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "embed_concurrency must be >= 1".to_string(),
            ));
        }
        url::Url::parse(&self.resolver.search_url)
            .map_err(|e| Error::InvalidConfig(format!("search_url: {e}")))?;
        html_scraper::Selector::parse(&self.resolver.anchor_selector).map_err(|_| {
            Error::InvalidConfig(format!(
                "anchor_selector {:?} is not a valid CSS selector",
                self.resolver.anchor_selector
            ))
        })?;
        Ok(())
    }
}
