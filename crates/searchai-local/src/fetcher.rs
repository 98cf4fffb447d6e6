//! Concurrent, bounded page fetching.
//!
//! Links are cut into batches of `batch_size`; only the first `max_batches` are run. All batches
//! run together, each item of a batch starts `index * stagger` late, and every batch is bounded
//! by `batch_timeout`. Output is joined in batch-index order whatever the completion order.

use crate::config::FetchConfig;
use crate::extract::Extractor;
use crate::links::LinkResolver;
use futures_util::future::join_all;
use rand::Rng;
use searchai_core::{
    validate_query, Browser, BrowserEngine, BrowserPage, ContentSource, ContextOptions, Error,
    FetchMetrics, FetchOutcome, Result, WaitUntil,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Worth a browser visit: http(s) and not a PDF.
pub fn is_fetchable(link: &str) -> bool {
    let lc = link.trim().to_ascii_lowercase();
    (lc.starts_with("http://") || lc.starts_with("https://")) && !lc.ends_with(".pdf")
}

/// First `max_chars` characters of `s`, and whether anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => (s[..byte].to_string(), true),
        None => (s.to_string(), false),
    }
}

fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    // Sampled at full resolution; whole-millisecond ranges can be empty.
    rand::thread_rng().gen_range(min..max)
}

#[derive(Default)]
struct Tally {
    skipped: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    discarded: AtomicUsize,
}

pub struct ContentFetcher {
    engine: Arc<dyn BrowserEngine>,
    resolver: LinkResolver,
    extractor: Arc<Extractor>,
    config: FetchConfig,
}

impl std::fmt::Debug for ContentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFetcher")
            .field("engine", &self.engine.name())
            .field("resolver", &self.resolver)
            .field("extractor", &self.extractor)
            .field("config", &self.config)
            .finish()
    }
}

impl ContentFetcher {
    pub fn new(engine: Arc<dyn BrowserEngine>, resolver: LinkResolver, config: FetchConfig) -> Self {
        Self {
            engine,
            resolver,
            extractor: Arc::new(Extractor::default()),
            config,
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `links` with a browser of its own, released before returning.
    ///
    /// Only a failed browser launch is an error; page and batch failures show up in the metrics.
    pub async fn fetch_all(&self, links: &[String]) -> Result<FetchOutcome> {
        let browser = self.engine.launch().await?;
        let out = self.fetch_with(browser.as_ref(), links).await;
        release(browser.as_ref()).await;
        Ok(out)
    }

    /// Fetch `links` using an already launched browser.
    pub async fn fetch_with(&self, browser: &dyn Browser, links: &[String]) -> FetchOutcome {
        let cfg = &self.config;
        let batch_size = cfg.batch_size.max(1);
        let bound = cfg.max_links();
        let in_bound = &links[..links.len().min(bound)];
        let batches: Vec<&[String]> = in_bound.chunks(batch_size).collect();

        let tally = Tally::default();
        let timed_out = AtomicUsize::new(0);
        let texts: Vec<String> = join_all(
            batches
                .iter()
                .enumerate()
                .map(|(i, batch)| self.run_batch(browser, i, batch, &tally, &timed_out)),
        )
        .await;

        let joined = texts
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(&cfg.separator);
        let chars_before_truncation = joined.chars().count();
        let (text, truncated) = truncate_chars(&joined, cfg.max_content_chars);
        if truncated {
            debug!(
                chars = chars_before_truncation,
                max = cfg.max_content_chars,
                "aggregated text truncated"
            );
        }

        let skipped = tally.skipped.load(Ordering::SeqCst);
        let metrics = FetchMetrics {
            total_links: links.len(),
            skipped,
            beyond_bound: links.len() - in_bound.len(),
            attempted: in_bound.len() - skipped,
            succeeded: tally.succeeded.load(Ordering::SeqCst),
            failed: tally.failed.load(Ordering::SeqCst),
            discarded: tally.discarded.load(Ordering::SeqCst),
            batches_run: batches.len(),
            batches_timed_out: timed_out.load(Ordering::SeqCst),
            chars_before_truncation,
            truncated,
        };
        info!(
            links = metrics.total_links,
            attempted = metrics.attempted,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            discarded = metrics.discarded,
            batches = metrics.batches_run,
            "fetch finished"
        );
        FetchOutcome {
            text: text.trim().to_string(),
            links: links.to_vec(),
            metrics,
        }
    }

    async fn run_batch(
        &self,
        browser: &dyn Browser,
        index: usize,
        batch: &[String],
        tally: &Tally,
        timed_out: &AtomicUsize,
    ) -> String {
        let eligible = batch.iter().filter(|l| is_fetchable(l)).count();
        tally
            .skipped
            .fetch_add(batch.len() - eligible, Ordering::SeqCst);
        // Committed to the shared tally only once the batch's fate is known.
        let ok = AtomicUsize::new(0);
        let bad = AtomicUsize::new(0);
        let items = batch.iter().enumerate().map(|(i, link)| {
            let (ok, bad) = (&ok, &bad);
            async move {
                if !is_fetchable(link) {
                    debug!(link = %link, "skipping non-html link");
                    return None;
                }
                let delay = self.config.stagger.saturating_mul(i as u32);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let text = self.fetch_page(browser, link).await;
                if text.is_some() {
                    ok.fetch_add(1, Ordering::SeqCst);
                } else {
                    bad.fetch_add(1, Ordering::SeqCst);
                }
                text
            }
        });

        match tokio::time::timeout(self.config.batch_timeout, join_all(items)).await {
            Ok(pages) => {
                tally
                    .succeeded
                    .fetch_add(ok.load(Ordering::SeqCst), Ordering::SeqCst);
                tally
                    .failed
                    .fetch_add(bad.load(Ordering::SeqCst), Ordering::SeqCst);
                pages
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(&self.config.separator)
            }
            Err(_) => {
                timed_out.fetch_add(1, Ordering::SeqCst);
                // Nothing from this batch reaches the aggregate, loaded pages included.
                let loaded = ok.load(Ordering::SeqCst);
                tally.failed.fetch_add(eligible, Ordering::SeqCst);
                tally.discarded.fetch_add(loaded, Ordering::SeqCst);
                let e = Error::BatchTimeout {
                    index,
                    timeout_ms: self.config.batch_timeout.as_millis() as u64,
                };
                warn!(
                    batch = index,
                    unfinished = eligible.saturating_sub(loaded + bad.load(Ordering::SeqCst)),
                    discarded = loaded,
                    "{e}; discarding batch"
                );
                String::new()
            }
        }
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            user_agent: Some(self.config.user_agent.clone()),
            headers: self.config.headers.clone(),
            viewport: Some(self.config.viewport),
            block_resources: self.config.block_resources,
            default_timeout_ms: Some(self.config.page_timeout.as_millis() as u64),
        }
    }

    /// Readable text of one page, or `None` on any failure. The page is always closed.
    async fn fetch_page(&self, browser: &dyn Browser, url: &str) -> Option<String> {
        let page = match browser.new_page(&self.context_options()).await {
            Ok(p) => p,
            Err(e) => {
                debug!(url, error = %e, "opening page failed");
                return None;
            }
        };
        let res = self.load_and_extract(page.as_ref(), url).await;
        if let Err(e) = page.close().await {
            debug!(url, error = %e, "closing page failed");
        }
        match res {
            Ok(Some(text)) => {
                debug!(url, chars = text.chars().count(), "page extracted");
                Some(text)
            }
            Ok(None) => {
                debug!(url, "page had no readable text");
                None
            }
            Err(e) => {
                let e = Error::Fetch(format!("{url}: {e}"));
                debug!(error = %e, "no content for page");
                None
            }
        }
    }

    async fn load_and_extract(&self, page: &dyn BrowserPage, url: &str) -> Result<Option<String>> {
        let cfg = &self.config;
        if let Some(referer) = &cfg.referer {
            let headers = BTreeMap::from([("Referer".to_string(), referer.clone())]);
            page.set_extra_headers(&headers).await?;
        }
        let pause = jitter(cfg.jitter_min, cfg.jitter_max);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        page.goto(url, WaitUntil::NetworkIdle, cfg.page_timeout)
            .await?;
        page.wait_for_load_state(WaitUntil::DomContentLoaded, cfg.page_timeout)
            .await?;
        if !cfg.settle_delay.is_zero() {
            tokio::time::sleep(cfg.settle_delay).await;
        }
        let html = page.content().await?;
        Ok(self.extractor.extract(&html))
    }

    async fn fetch_for_query_with(&self, browser: &dyn Browser, query: &str) -> Result<FetchOutcome> {
        let links = self
            .resolver
            .resolve(browser, query)
            .await
            .map_err(|e| match e {
                Error::Browser(m) | Error::InvalidUrl(m) => {
                    Error::Search(format!("results page: {m}"))
                }
                other => other,
            })?;
        if links.is_empty() {
            info!("no result links; nothing to fetch");
            return Ok(FetchOutcome::default());
        }
        let links: Vec<String> = links.into_iter().collect();
        Ok(self.fetch_with(browser, &links).await)
    }
}

async fn release(browser: &dyn Browser) {
    if let Err(e) = browser.close().await {
        warn!(error = %e, "closing browser failed");
    }
}

#[async_trait::async_trait]
impl ContentSource for ContentFetcher {
    /// Resolve links for `query` and fetch them, all with one browser released on every path.
    async fn fetch_for_query(&self, query: &str) -> Result<FetchOutcome> {
        let q = validate_query(query)?;
        let browser = self.engine.launch().await?;
        let res = self.fetch_for_query_with(browser.as_ref(), q).await;
        release(browser.as_ref()).await;
        res
    }
}
