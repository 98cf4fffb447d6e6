//! Public facade crate for `searchai`.
//!
//! Re-exports the backend-agnostic types/traits from `searchai-core` and the pipeline surface
//! from `searchai-local`. No logic lives here.

pub use searchai_core::*;
pub use searchai_local::{
    chunk, config, extract, fetcher, fixture, indexer, lexical, links, openai_compat, pipeline,
    render_playwright, store,
};
pub use searchai_local::{
    run, run_with_engine, ContentFetcher, Extractor, FetchConfig, FixtureBrowser, IndexerConfig,
    LexicalEmbedder, LinkResolver, OpenAiClient, OpenAiConfig, PipelineConfig, PlaywrightEngine,
    ResolverConfig, SearchRequest, SemanticIndexer, VectorStore,
};
