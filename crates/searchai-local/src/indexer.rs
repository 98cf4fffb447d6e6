//! Chunk → embed → store → rank → generate.

use crate::chunk::chunk_text;
use crate::config::IndexerConfig;
use crate::store::VectorStore;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use searchai_core::{
    validate_query, ChatMessage, ChatModel, ContentSource, Embedder, Error, Metrics,
    PhaseTimings, Result, SearchOutcome, SimilarityResult,
};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

fn ms_since(t: Instant) -> u64 {
    t.elapsed().as_millis() as u64
}

/// User message: the question followed by each ranked chunk with its identifier and score.
pub fn compose_prompt(query: &str, results: &[SimilarityResult]) -> String {
    let mut out = format!("Question: {query}\n\nContext: ");
    for r in results {
        let _ = write!(out, "\nResult {}: Similarity {:.4}\n{}\n", r.id, r.score, r.text);
    }
    out
}

/// Owns one vector store; not meant for overlapping calls (methods take `&mut self`).
pub struct SemanticIndexer {
    config: IndexerConfig,
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    source: Arc<dyn ContentSource>,
    ingests: u64,
}

impl std::fmt::Debug for SemanticIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndexer")
            .field("config", &self.config)
            .field("store_len", &self.store.len())
            .field("embedder", &self.embedder.name())
            .field("chat", &self.chat.name())
            .field("ingests", &self.ingests)
            .finish()
    }
}

impl SemanticIndexer {
    pub fn new(
        config: IndexerConfig,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        let store = VectorStore::new(config.dimension, config.capacity);
        Self {
            config,
            store,
            embedder,
            chat,
            source,
            ingests: 0,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Chunk `text`, embed every chunk, append them to the store. Returns the chunk count.
    ///
    /// Chunk identifiers are positions within this call, so a second ingest reuses `0, 1, ...`;
    /// the per-call `ingest` sequence number tells them apart. Nothing is stored unless every
    /// chunk embedded with the right dimension.
    pub async fn ingest(&mut self, text: &str) -> Result<usize> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput("nothing to ingest".to_string()));
        }
        let chunks = chunk_text(text, self.config.chunk_size, self.config.overlap)?;
        let embedder = self.embedder.clone();
        let dimension = self.config.dimension;
        let vectors: Vec<Vec<f32>> = stream::iter(chunks.iter().enumerate())
            .map(|(i, chunk)| {
                let embedder = embedder.clone();
                async move {
                    let v = embedder.embed(chunk).await.map_err(|e| match e {
                        Error::Embedding(m) => Error::Embedding(format!("embedding chunk {i}: {m}")),
                        other => other,
                    })?;
                    if v.len() != dimension {
                        return Err(Error::DimensionMismatch {
                            expected: dimension,
                            actual: v.len(),
                        });
                    }
                    Ok(v)
                }
            })
            .buffered(self.config.embed_concurrency.max(1))
            .try_collect()
            .await?;

        self.ingests += 1;
        let n = chunks.len();
        for (id, (vector, text)) in vectors.into_iter().zip(chunks).enumerate() {
            self.store.insert(id, self.ingests, vector, text)?;
        }
        debug!(
            chunks = n,
            ingest = self.ingests,
            store_len = self.store.len(),
            "ingested"
        );
        Ok(n)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let v = self.embedder.embed(query).await.map_err(|e| match e {
            Error::Embedding(m) => Error::Embedding(format!("embedding query: {m}")),
            other => other,
        })?;
        self.store.check_dimension(&v)?;
        Ok(v)
    }

    /// Top `k` stored chunks for `query`, without generation.
    pub async fn rank(&self, query: &str, k: usize) -> Result<Vec<SimilarityResult>> {
        let q = validate_query(query)?;
        if k == 0 {
            return Err(Error::InvalidConfig("k must be >= 1".to_string()));
        }
        let v = self.embed_query(q).await?;
        self.store.rank(&v, k)
    }

    /// Fetch web content for `query`, ingest it, rank, and summarize.
    ///
    /// When the fetch yields no text, ranking falls back to whatever the store already holds.
    pub async fn search(&mut self, query: &str, k: usize) -> Result<SearchOutcome> {
        let q = validate_query(query)?.to_string();
        if k == 0 {
            return Err(Error::InvalidConfig("k must be >= 1".to_string()));
        }
        let started = Instant::now();
        let mut timings = PhaseTimings::default();

        let t = Instant::now();
        let fetched = self.source.fetch_for_query(&q).await?;
        timings.fetch_ms = ms_since(t);
        info!(
            chars = fetched.text.chars().count(),
            links = fetched.links.len(),
            ms = timings.fetch_ms,
            "fetch phase done"
        );

        let t = Instant::now();
        let chunks_ingested = if fetched.text.trim().is_empty() {
            if self.store.is_empty() {
                return Err(Error::EmptyInput(
                    "no content was retrieved for the query".to_string(),
                ));
            }
            warn!(
                store_len = self.store.len(),
                "no content retrieved; ranking previously ingested chunks"
            );
            0
        } else {
            self.ingest(&fetched.text).await?
        };
        timings.ingest_ms = ms_since(t);

        let t = Instant::now();
        let qv = self.embed_query(&q).await?;
        timings.query_embed_ms = ms_since(t);

        let t = Instant::now();
        let results = self.store.rank(&qv, k)?;
        timings.rank_ms = ms_since(t);

        let t = Instant::now();
        let messages = [
            ChatMessage::system(self.config.system_prompt.clone()),
            ChatMessage::user(compose_prompt(&q, &results)),
        ];
        let summary = self.chat.complete(&messages).await?;
        timings.generate_ms = ms_since(t);
        if summary.trim().is_empty() {
            return Err(Error::NoResponse(format!(
                "{} returned no text",
                self.chat.name()
            )));
        }
        timings.total_ms = ms_since(started);
        info!(
            results = results.len(),
            total_ms = timings.total_ms,
            "search done"
        );

        Ok(SearchOutcome {
            summary,
            results,
            metrics: Metrics {
                timings,
                fetch: fetched.metrics,
                chunks_ingested,
                store_len: self.store.len(),
            },
        })
    }
}
