//! Readable-text extraction from rendered page HTML.
//!
//! Extraction is an ordered list of strategies tried until one produces non-empty text. Each
//! strategy sees the parsed document plus a block-list of non-content regions that are skipped
//! while collecting text.

use html_scraper::node::Node;
use html_scraper::{ElementRef, Html, Selector};

/// Content regions tried first, most specific first.
pub const PRIMARY_SELECTORS: &[&str] = &[
    "main article",
    "[role=\"main\"] article",
    ".content-area",
    "#content",
    ".post-content",
];

pub const GENERIC_SELECTOR: &str = "main, article, [role=\"main\"]";

/// Non-content regions never contributing text.
pub const BLOCKED_SELECTORS: &[&str] = &[
    "header",
    "footer",
    "nav",
    ".advertisement",
    ".ads",
    ".cookie-notice",
    ".popup",
    ".modal",
    "#comments",
    ".sidebar",
    ".social-share",
    ".related-posts",
];

/// Elements whose text is never visible.
const INVISIBLE: &str = "script, style, noscript, template";

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "form", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre",
    "section", "table", "td", "th", "tr", "ul",
];

pub(crate) fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

/// Regions excluded from extraction.
#[derive(Debug, Clone)]
pub struct Blocklist {
    selectors: Vec<Selector>,
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new(BLOCKED_SELECTORS.iter().copied())
    }
}

impl Blocklist {
    /// Invalid selectors are dropped. Invisible elements are always blocked.
    pub fn new<'a>(selectors: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out: Vec<Selector> = selectors.into_iter().filter_map(parse_selector).collect();
        out.extend(parse_selector(INVISIBLE));
        Self { selectors: out }
    }

    pub fn matches(&self, el: &ElementRef<'_>) -> bool {
        self.selectors.iter().any(|s| s.matches(el))
    }
}

// Explicit stack instead of recursion: real pages nest thousands of levels deep.
enum Walk<N> {
    Node(N),
    /// Word boundary left by a block element.
    Gap,
}

/// Visible text under `root`, skipping blocked subtrees, whitespace-collapsed.
pub fn element_text(root: ElementRef<'_>, blocklist: &Blocklist) -> String {
    let mut out = String::new();
    let mut stack = vec![Walk::Node(*root)];
    while let Some(item) = stack.pop() {
        let node = match item {
            Walk::Gap => {
                out.push(' ');
                continue;
            }
            Walk::Node(n) => n,
        };
        match node.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => {
                let Some(el) = ElementRef::wrap(node) else {
                    continue;
                };
                // A blocked element takes its whole subtree with it.
                if blocklist.matches(&el) {
                    continue;
                }
                // Gaps on both sides so `<p>a</p><p>b</p>` reads "a b", not "ab".
                let block = BLOCK_TAGS.contains(&e.name());
                if block {
                    stack.push(Walk::Gap);
                }
                // Reversed so children pop off the stack in document order.
                for child in node.children().rev() {
                    stack.push(Walk::Node(child));
                }
                if block {
                    stack.push(Walk::Gap);
                }
            }
            _ => {}
        }
    }
    norm_ws(&out)
}

/// One way of locating the readable part of a page.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &str;
    /// `None` (or empty text) hands over to the next strategy.
    fn extract(&self, doc: &Html, blocklist: &Blocklist) -> Option<String>;
}

/// First element matching any selector of the group, in the group's order.
#[derive(Debug, Clone)]
pub struct SelectorStrategy {
    name: String,
    selectors: Vec<Selector>,
}

impl SelectorStrategy {
    pub fn new<'a>(name: impl Into<String>, selectors: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            name: name.into(),
            selectors: selectors.into_iter().filter_map(parse_selector).collect(),
        }
    }
}

impl ExtractionStrategy for SelectorStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, doc: &Html, blocklist: &Blocklist) -> Option<String> {
        for sel in &self.selectors {
            for el in doc.select(sel) {
                if blocklist.matches(&el) {
                    continue;
                }
                let text = element_text(el, blocklist);
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        None
    }
}

/// Whole-body fallback; for documents without `<body>` this is the root element.
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyStrategy;

impl ExtractionStrategy for BodyStrategy {
    fn name(&self) -> &str {
        "body"
    }

    fn extract(&self, doc: &Html, blocklist: &Blocklist) -> Option<String> {
        let root = parse_selector("body")
            .and_then(|s| doc.select(&s).next())
            .unwrap_or_else(|| doc.root_element());
        let text = element_text(root, blocklist);
        (!text.is_empty()).then_some(text)
    }
}

/// Ordered strategies plus the shared block-list.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    blocklist: Blocklist,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(
            vec![
                Box::new(SelectorStrategy::new("primary", PRIMARY_SELECTORS.iter().copied())),
                Box::new(SelectorStrategy::new("generic", [GENERIC_SELECTOR])),
                Box::new(BodyStrategy),
            ],
            Blocklist::default(),
        )
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>, blocklist: Blocklist) -> Self {
        Self {
            strategies,
            blocklist,
        }
    }

    /// Text of the first strategy that yields any, with that strategy's name.
    pub fn extract_with_name(&self, html: &str) -> Option<(&str, String)> {
        let doc = Html::parse_document(html);
        self.strategies.iter().find_map(|s| {
            s.extract(&doc, &self.blocklist)
                .map(|t| norm_ws(&t))
                .filter(|t| !t.is_empty())
                .map(|t| (s.name(), t))
        })
    }

    /// Whitespace-collapsed readable text, or `None` if no strategy found any.
    pub fn extract(&self, html: &str) -> Option<String> {
        self.extract_with_name(html).map(|(_, t)| t)
    }
}
