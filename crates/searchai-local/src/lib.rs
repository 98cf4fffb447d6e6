//! Concrete implementations behind the `searchai-core` traits: Playwright-driven Chromium,
//! result-link resolution, bounded concurrent page fetching, chunking, an in-memory vector store,
//! an OpenAI-compatible client, and the indexer tying them together.

pub mod chunk;
pub mod config;
pub mod extract;
pub mod fetcher;
pub mod fixture;
pub mod indexer;
pub mod lexical;
pub mod links;
pub mod openai_compat;
pub mod pipeline;
pub mod render_playwright;
pub mod store;

pub use config::{FetchConfig, IndexerConfig, OpenAiConfig, PipelineConfig, ResolverConfig};
pub use extract::{Blocklist, BodyStrategy, ExtractionStrategy, Extractor, SelectorStrategy};
pub use fetcher::ContentFetcher;
pub use fixture::FixtureBrowser;
pub use indexer::SemanticIndexer;
pub use lexical::LexicalEmbedder;
pub use links::LinkResolver;
pub use openai_compat::OpenAiClient;
pub use pipeline::{run, run_with_engine, SearchRequest};
pub use render_playwright::PlaywrightEngine;
pub use store::VectorStore;
