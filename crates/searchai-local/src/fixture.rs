//! In-memory `BrowserEngine` serving canned HTML.
//!
//! Pages are looked up by exact URL, then by URL without query string. Failures and delays can be
//! injected per URL. Every launch, close, page open and page close is counted so callers can
//! assert resource release.

use searchai_core::{
    Browser, BrowserEngine, BrowserPage, ContextOptions, Error, Navigation, Result, WaitUntil,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    launches: AtomicUsize,
    browser_closes: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    navigations: AtomicUsize,
}

#[derive(Debug, Default)]
struct Inner {
    pages: HashMap<String, String>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    launch_error: Option<String>,
    visited: Vec<String>,
    contexts: Vec<ContextOptions>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureBrowser {
    inner: Arc<Mutex<Inner>>,
    counters: Arc<Counters>,
}

fn lock(inner: &Mutex<Inner>) -> Result<std::sync::MutexGuard<'_, Inner>> {
    inner
        .lock()
        .map_err(|_| Error::Browser("fixture state poisoned".to_string()))
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

impl FixtureBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        if let Ok(mut g) = self.inner.lock() {
            g.pages.insert(url.into(), html.into());
        }
        self
    }

    /// Navigation to `url` fails with `message`.
    pub fn with_failure(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        if let Ok(mut g) = self.inner.lock() {
            g.failures.insert(url.into(), message.into());
        }
        self
    }

    /// Navigation to `url` takes `delay` before completing.
    pub fn with_delay(self, url: impl Into<String>, delay: Duration) -> Self {
        if let Ok(mut g) = self.inner.lock() {
            g.delays.insert(url.into(), delay);
        }
        self
    }

    /// Every `launch` fails with `message`.
    pub fn with_launch_error(self, message: impl Into<String>) -> Self {
        if let Ok(mut g) = self.inner.lock() {
            g.launch_error = Some(message.into());
        }
        self
    }

    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn browser_closes(&self) -> usize {
        self.counters.browser_closes.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.counters.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.counters.pages_closed.load(Ordering::SeqCst)
    }

    /// Navigations started, including failed ones.
    pub fn navigations(&self) -> usize {
        self.counters.navigations.load(Ordering::SeqCst)
    }

    /// URLs navigated to, in start order.
    pub fn visited(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|g| g.visited.clone())
            .unwrap_or_default()
    }

    /// Options of every context opened so far.
    pub fn contexts(&self) -> Vec<ContextOptions> {
        self.inner
            .lock()
            .map(|g| g.contexts.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl BrowserEngine for FixtureBrowser {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn launch(&self) -> Result<Box<dyn Browser>> {
        if let Some(msg) = lock(&self.inner)?.launch_error.clone() {
            return Err(Error::Browser(msg));
        }
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixtureSession {
            fixture: self.clone(),
        }))
    }
}

struct FixtureSession {
    fixture: FixtureBrowser,
}

#[async_trait::async_trait]
impl Browser for FixtureSession {
    async fn new_page(&self, opts: &ContextOptions) -> Result<Box<dyn BrowserPage>> {
        lock(&self.fixture.inner)?.contexts.push(opts.clone());
        self.fixture
            .counters
            .pages_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixturePage {
            fixture: self.fixture.clone(),
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.fixture
            .counters
            .browser_closes
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FixturePage {
    fixture: FixtureBrowser,
    current: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl FixturePage {
    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.fixture
                .counters
                .pages_closed
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl BrowserPage for FixturePage {
    async fn set_extra_headers(&self, _headers: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    async fn goto(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<Navigation> {
        self.fixture
            .counters
            .navigations
            .fetch_add(1, Ordering::SeqCst);
        let (delay, failure, html) = {
            let mut g = lock(&self.fixture.inner)?;
            g.visited.push(url.to_string());
            let html = g
                .pages
                .get(url)
                .or_else(|| g.pages.get(strip_query(url)))
                .cloned();
            (
                g.delays.get(url).copied(),
                g.failures.get(url).cloned(),
                html,
            )
        };
        if let Some(d) = delay {
            if d > timeout {
                tokio::time::sleep(timeout).await;
                return Err(Error::Browser(format!(
                    "goto {url}: timeout {}ms exceeded",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(d).await;
        }
        if let Some(msg) = failure {
            return Err(Error::Browser(format!("goto {url}: {msg}")));
        }
        let Some(html) = html else {
            return Err(Error::Browser(format!("goto {url}: net::ERR_NAME_NOT_RESOLVED")));
        };
        if let Ok(mut cur) = self.current.lock() {
            *cur = Some(html);
        }
        Ok(Navigation {
            final_url: url.to_string(),
            status: Some(200),
        })
    }

    async fn wait_for_load_state(&self, _state: WaitUntil, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.current
            .lock()
            .map_err(|_| Error::Browser("fixture page poisoned".to_string()))?
            .clone()
            .ok_or_else(|| Error::Browser("content: page has not navigated".to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.mark_closed();
        Ok(())
    }
}

impl Drop for FixturePage {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_pages_and_counts_lifecycle() {
        let fx = FixtureBrowser::new().with_page("https://a.example/x", "<p>hi</p>");
        let engine: &dyn BrowserEngine = &fx;
        let browser = engine.launch().await.unwrap();
        let page = browser.new_page(&ContextOptions::default()).await.unwrap();
        let nav = page
            .goto(
                "https://a.example/x?utm=1",
                WaitUntil::Load,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(nav.status, Some(200));
        assert_eq!(page.content().await.unwrap(), "<p>hi</p>");
        page.close().await.unwrap();
        page.close().await.unwrap();
        drop(page);
        browser.close().await.unwrap();

        assert_eq!(fx.launches(), 1);
        assert_eq!(fx.browser_closes(), 1);
        assert_eq!(fx.pages_opened(), 1);
        assert_eq!(fx.pages_closed(), 1);
        assert_eq!(fx.visited(), vec!["https://a.example/x?utm=1".to_string()]);
    }

    #[tokio::test]
    async fn injected_failures_and_unknown_urls_error() {
        let fx = FixtureBrowser::new()
            .with_page("https://ok.example/", "<p>ok</p>")
            .with_failure("https://ok.example/", "net::ERR_CONNECTION_RESET");
        let browser = fx.launch().await.unwrap();
        let page = browser.new_page(&ContextOptions::default()).await.unwrap();
        let err = page
            .goto("https://ok.example/", WaitUntil::Load, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ERR_CONNECTION_RESET"));
        assert!(page
            .goto("https://missing.example/", WaitUntil::Load, Duration::from_secs(1))
            .await
            .is_err());
        assert!(page.content().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_past_timeout_is_a_navigation_error() {
        let fx = FixtureBrowser::new()
            .with_page("https://slow.example/", "<p>slow</p>")
            .with_delay("https://slow.example/", Duration::from_secs(60));
        let browser = fx.launch().await.unwrap();
        let page = browser.new_page(&ContextOptions::default()).await.unwrap();
        let err = page
            .goto("https://slow.example/", WaitUntil::NetworkIdle, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn launch_error_is_reported() {
        let fx = FixtureBrowser::new().with_launch_error("no chromium");
        assert!(matches!(fx.launch().await, Err(Error::Browser(_))));
        assert_eq!(fx.launches(), 0);
    }
}
