//! One-call entry point: query + credentials + options in, summary + metrics out.

use crate::config::PipelineConfig;
use crate::fetcher::ContentFetcher;
use crate::indexer::SemanticIndexer;
use crate::lexical::LexicalEmbedder;
use crate::links::LinkResolver;
use crate::openai_compat::OpenAiClient;
use crate::render_playwright::PlaywrightEngine;
use searchai_core::{validate_query, BrowserEngine, Embedder, Error, Result, SearchOutcome};
use std::sync::Arc;
use tracing::info;

/// Everything one pipeline invocation needs.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// Overrides `config.openai.api_key` when set.
    pub api_key: Option<String>,
    /// Results fed to generation; `config.indexer.default_k` when unset.
    pub k: Option<usize>,
    pub config: PipelineConfig,
    /// Use the offline lexical embedder instead of the embeddings API.
    pub offline_embeddings: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Run with a Playwright-driven Chromium.
pub async fn run(req: &SearchRequest) -> Result<SearchOutcome> {
    run_with_engine(req, Arc::new(PlaywrightEngine::from_env())).await
}

/// Run with the given browser engine. Input is validated before any browser or API work.
pub async fn run_with_engine(
    req: &SearchRequest,
    engine: Arc<dyn BrowserEngine>,
) -> Result<SearchOutcome> {
    let query = validate_query(&req.query)?;
    let k = req.k.unwrap_or(req.config.indexer.default_k);
    if k == 0 {
        return Err(Error::InvalidConfig("k must be >= 1".to_string()));
    }
    req.config.validate()?;

    let mut openai = req.config.openai.clone();
    if let Some(key) = req.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        openai.api_key = Some(key.to_string());
    }
    let client = Arc::new(OpenAiClient::from_config(&openai)?);
    let embedder: Arc<dyn Embedder> = if req.offline_embeddings {
        Arc::new(LexicalEmbedder::new(req.config.indexer.dimension))
    } else {
        client.clone()
    };

    let fetcher = ContentFetcher::new(
        engine.clone(),
        LinkResolver::new(req.config.resolver.clone()),
        req.config.fetch.clone(),
    );
    info!(
        engine = engine.name(),
        embedder = embedder.name(),
        k,
        "starting search"
    );
    let mut indexer = SemanticIndexer::new(
        req.config.indexer.clone(),
        embedder,
        client,
        Arc::new(fetcher),
    );
    indexer.search(query, k).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureBrowser;

    #[tokio::test]
    async fn empty_query_fails_before_any_browser_work() {
        let fx = FixtureBrowser::new();
        let req = SearchRequest {
            api_key: Some("sk-anything".to_string()),
            ..SearchRequest::new("  ")
        };
        let err = run_with_engine(&req, Arc::new(fx.clone())).await.unwrap_err();
        assert!(matches!(err, Error::EmptyInput(_)));
        assert_eq!(fx.launches(), 0);
    }

    #[tokio::test]
    async fn missing_api_key_is_not_configured() {
        let fx = FixtureBrowser::new();
        let err = run_with_engine(&SearchRequest::new("rust"), Arc::new(fx.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert_eq!(fx.launches(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_up_front() {
        let mut req = SearchRequest::new("rust");
        req.api_key = Some("sk-anything".to_string());
        req.config.indexer.overlap = req.config.indexer.chunk_size;
        let err = run_with_engine(&req, Arc::new(FixtureBrowser::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
