//! Query → candidate result links.

use crate::config::ResolverConfig;
use searchai_core::{
    normalize_link, validate_query, Browser, BrowserPage, ContextOptions, Error, Result, WaitUntil,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Full search URL for `query`, with the query as a percent-encoded `q` parameter.
pub fn search_url(base: &str, query: &str) -> Result<String> {
    let u = url::Url::parse_with_params(base, &[("q", query)])
        .map_err(|e| Error::InvalidUrl(format!("{base}: {e}")))?;
    Ok(u.to_string())
}

/// Result anchors of a rendered results page, filtered and normalized.
///
/// Relative hrefs are resolved against `base_url`. Kept: https links whose host contains none of
/// `blocked_host_tokens`. Normalization drops query string and fragment.
pub fn extract_result_links(
    html: &str,
    base_url: &str,
    anchor_selector: &str,
    blocked_host_tokens: &[String],
) -> Result<BTreeSet<String>> {
    let sel = html_scraper::Selector::parse(anchor_selector)
        .map_err(|_| Error::Search(format!("invalid anchor selector {anchor_selector:?}")))?;
    let base = url::Url::parse(base_url).ok();
    let doc = html_scraper::Html::parse_document(html);

    let mut out = BTreeSet::new();
    for el in doc.select(&sel) {
        let href = match el.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if href.is_empty() {
            continue;
        }
        let abs = match url::Url::parse(href) {
            Ok(u) => u,
            Err(_) => match base.as_ref().and_then(|b| b.join(href).ok()) {
                Some(u) => u,
                None => continue,
            },
        };
        if abs.scheme() != "https" {
            continue;
        }
        let host = abs.host_str().unwrap_or("").to_ascii_lowercase();
        if host.is_empty() || blocked_host_tokens.iter().any(|t| host.contains(t.as_str())) {
            continue;
        }
        if let Ok(link) = normalize_link(abs.as_str()) {
            out.insert(link);
        }
    }
    Ok(out)
}

/// Turns a query into a de-duplicated set of result links by rendering the search engine's
/// results page.
#[derive(Debug, Clone, Default)]
pub struct LinkResolver {
    config: ResolverConfig,
}

impl LinkResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Render the results page for `query` in `browser` and collect result links.
    ///
    /// Navigation and extraction errors propagate; there is no retry at this layer.
    pub async fn resolve(&self, browser: &dyn Browser, query: &str) -> Result<BTreeSet<String>> {
        let q = validate_query(query)?;
        let url = search_url(&self.config.search_url, q)?;
        let opts = ContextOptions {
            user_agent: Some(self.config.user_agent.clone()),
            default_timeout_ms: Some(self.config.timeout.as_millis() as u64),
            ..Default::default()
        };
        let page = browser.new_page(&opts).await?;
        let res = self.resolve_on(page.as_ref(), &url).await;
        if let Err(e) = page.close().await {
            debug!(error = %e, "closing results page failed");
        }
        let links = res?;
        info!(count = links.len(), "resolved result links");
        Ok(links)
    }

    async fn resolve_on(&self, page: &dyn BrowserPage, url: &str) -> Result<BTreeSet<String>> {
        let t = self.config.timeout;
        page.goto(url, WaitUntil::Load, t).await?;
        page.wait_for_load_state(WaitUntil::DomContentLoaded, t)
            .await?;
        let html = page.content().await?;
        extract_result_links(
            &html,
            url,
            &self.config.anchor_selector,
            &self.config.blocked_host_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureBrowser;
    use searchai_core::BrowserEngine;

    fn blocked() -> Vec<String> {
        vec!["google".to_string(), "youtube".to_string()]
    }

    #[test]
    fn search_url_percent_encodes_the_query() {
        let u = search_url("https://www.google.com/search", "rust & tokio?").unwrap();
        assert_eq!(u, "https://www.google.com/search?q=rust+%26+tokio%3F");
        assert!(search_url("not a url", "x").is_err());
    }

    #[test]
    fn result_links_are_filtered_and_normalized() {
        let html = r#"
          <a jsname="x" href="https://docs.rs/tokio?utm_source=g#top">tokio</a>
          <a jsname="x" href="https://docs.rs/tokio">dup</a>
          <a jsname="x" href="http://plain.example/page">insecure</a>
          <a jsname="x" href="https://www.youtube.com/watch?v=1">video</a>
          <a jsname="x" href="https://maps.google.com/place">maps</a>
          <a jsname="x" href="/search?q=more">relative engine link</a>
          <a jsname="x" href="javascript:void(0)">js</a>
          <a href="https://unmarked.example/">no jsname</a>
          <a jsname="y" href="https://blog.example/post/1?ref=abc">post</a>
        "#;
        let links =
            extract_result_links(html, "https://www.google.com/search?q=x", "a[jsname]", &blocked())
                .unwrap();
        let got: Vec<&str> = links.iter().map(String::as_str).collect();
        assert_eq!(
            got,
            vec!["https://blog.example/post/1", "https://docs.rs/tokio"]
        );
    }

    #[tokio::test]
    async fn resolve_renders_results_page_and_closes_it() {
        let fx = FixtureBrowser::new().with_page(
            "https://search.example/search",
            r#"<a jsname="r" href="https://a.example/1">a</a><a jsname="r" href="https://b.example/2#x">b</a>"#,
        );
        let resolver = LinkResolver::new(ResolverConfig {
            search_url: "https://search.example/search".to_string(),
            ..Default::default()
        });
        let browser = fx.launch().await.unwrap();
        let links = resolver.resolve(browser.as_ref(), "  who won  ").await.unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.contains("https://b.example/2"));
        assert_eq!(fx.pages_opened(), 1);
        assert_eq!(fx.pages_closed(), 1);
        assert_eq!(
            fx.visited(),
            vec!["https://search.example/search?q=who+won".to_string()]
        );
        let ctx = &fx.contexts()[0];
        assert_eq!(
            ctx.user_agent.as_deref(),
            Some(crate::config::SEARCH_USER_AGENT)
        );
    }

    #[tokio::test]
    async fn navigation_failure_propagates_and_page_is_released() {
        let fx = FixtureBrowser::new().with_failure(
            "https://search.example/search?q=x",
            "net::ERR_TIMED_OUT",
        );
        let resolver = LinkResolver::new(ResolverConfig {
            search_url: "https://search.example/search".to_string(),
            ..Default::default()
        });
        let browser = fx.launch().await.unwrap();
        let err = resolver.resolve(browser.as_ref(), "x").await.unwrap_err();
        assert!(matches!(err, Error::Browser(_)));
        assert_eq!(fx.pages_closed(), 1);
    }

    #[tokio::test]
    async fn blank_query_never_touches_the_browser() {
        let fx = FixtureBrowser::new();
        let browser = fx.launch().await.unwrap();
        let err = LinkResolver::default()
            .resolve(browser.as_ref(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyInput(_)));
        assert_eq!(fx.pages_opened(), 0);
    }
}
