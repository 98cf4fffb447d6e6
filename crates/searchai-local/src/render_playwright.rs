//! Headless Chromium via a long-lived Node.js + Playwright child process.
//!
//! One `launch` spawns one `node` process that owns one browser. Requests and replies are
//! line-delimited JSON on the child's stdin/stdout, correlated by id, so many pages can be
//! driven concurrently over the same pipe.
//!
//! Expected setup:
//! - Node.js present (`node` on PATH, or `SEARCHAI_NODE`)
//! - `playwright` npm package resolvable by Node (global, `NODE_PATH`, or `SEARCHAI_NODE_PATH`)
//! - Browsers installed (`npx playwright install chromium`)

use searchai_core::{
    Browser, BrowserEngine, BrowserPage, ContextOptions, Error, Navigation, Result, WaitUntil,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Bound for driver operations that carry no timeout of their own.
const OP_TIMEOUT: Duration = Duration::from_secs(30);

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_truthy(k: &str) -> bool {
    matches!(
        env(k).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn node_path_candidates() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn node_path_has_playwright(np: &str) -> bool {
    np.split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|p| std::path::PathBuf::from(p).join("playwright").is_dir())
}

fn npm_root_g() -> Option<String> {
    let out = std::process::Command::new("npm")
        .args(["root", "-g"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if s.is_empty() || !std::path::PathBuf::from(&s).join("playwright").is_dir() {
        return None;
    }
    Some(s)
}

/// `NODE_PATH` value that makes a globally installed Playwright resolvable, if one is needed.
///
/// `None` means "leave the child's environment alone" (already resolvable, or nothing found).
pub fn detect_node_path_for_playwright() -> Option<String> {
    if let Some(v) = env("SEARCHAI_NODE_PATH") {
        return Some(v);
    }
    let existing = std::env::var("NODE_PATH").unwrap_or_default();
    if node_path_has_playwright(&existing) {
        return None;
    }
    let found = npm_root_g().or_else(|| {
        node_path_candidates()
            .into_iter()
            .find(|root| std::path::PathBuf::from(root).join("playwright").is_dir())
    })?;
    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

const DRIVER_JS: &str = r#"
const readline = require('readline');

function send(obj) { process.stdout.write(JSON.stringify(obj) + '\n'); }
function ok(id, result) { send({ id, ok: true, result: result === undefined ? null : result }); }
function bad(id, code, message, hint) { send({ id, ok: false, error: { code, message, hint: hint || '' } }); }
function fail(code, message, hint) { const e = new Error(message); e.code = code; e.hint = hint; return e; }

let browser = null;
const contexts = new Map();
let nextContextId = 1;

function pageOf(p) {
  const c = contexts.get(Number(p.context_id));
  if (!c) throw fail('invalid_params', 'unknown context ' + p.context_id);
  return c.page;
}

const handlers = {
  async launch(p) {
    let pw;
    try { pw = require('playwright'); } catch (e) {
      throw fail('not_configured',
        'Playwright is not installed for Node.js (require("playwright") failed)',
        'Install Playwright (Node): `npm i -g playwright` and then `npx playwright install chromium`.');
    }
    browser = await pw.chromium.launch({ headless: true, timeout: Number(p.timeout_ms || 45000) });
    return { version: browser.version() };
  },
  async new_context(p) {
    if (!browser) throw fail('invalid_params', 'browser is not launched');
    const opts = { javaScriptEnabled: true, serviceWorkers: 'block', isMobile: false, hasTouch: false, deviceScaleFactor: 1 };
    if (p.user_agent) opts.userAgent = p.user_agent;
    if (p.headers && Object.keys(p.headers).length) opts.extraHTTPHeaders = p.headers;
    if (p.viewport) opts.viewport = p.viewport;
    const context = await browser.newContext(opts);
    const page = await context.newPage();
    if (p.default_timeout_ms) page.setDefaultTimeout(Number(p.default_timeout_ms));
    if (p.block_resources) {
      await page.route('**/*', (route) => {
        const rt = route.request().resourceType();
        if (rt === 'image' || rt === 'media' || rt === 'font') return route.abort();
        return route.continue();
      });
    }
    const id = nextContextId++;
    contexts.set(id, { context, page });
    return { context_id: id };
  },
  async set_extra_headers(p) {
    await pageOf(p).setExtraHTTPHeaders(p.headers || {});
    return null;
  },
  async goto(p) {
    const page = pageOf(p);
    const resp = await page.goto(String(p.url), { waitUntil: p.wait_until || 'load', timeout: Number(p.timeout_ms || 45000) });
    return { final_url: page.url(), status: resp ? resp.status() : null };
  },
  async wait_for_load_state(p) {
    await pageOf(p).waitForLoadState(p.state || 'load', { timeout: Number(p.timeout_ms || 30000) });
    return null;
  },
  async content(p) {
    return { html: await pageOf(p).content() };
  },
  async close_context(p) {
    const id = Number(p.context_id);
    const c = contexts.get(id);
    if (!c) return null;
    contexts.delete(id);
    await c.context.close();
    return null;
  },
  async close() {
    for (const [id, c] of contexts) {
      contexts.delete(id);
      try { await c.context.close(); } catch (_) {}
    }
    if (browser) { const b = browser; browser = null; await b.close(); }
    return null;
  },
};

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  if (!line.trim()) return;
  let req;
  try { req = JSON.parse(line); } catch (e) { return bad(0, 'invalid_params', 'bad JSON request'); }
  const h = handlers[req.method];
  if (!h) return bad(req.id, 'invalid_params', 'unknown method ' + req.method);
  try {
    const result = await h(req.params || {});
    if (req.method === 'close') {
      process.stdout.write(JSON.stringify({ id: req.id, ok: true, result: null }) + '\n', () => process.exit(0));
      return;
    }
    ok(req.id, result);
  } catch (e) {
    const code = (e && e.code) || (e && e.name === 'TimeoutError' ? 'timeout' : 'upstream');
    bad(req.id, code, String(e && e.message ? e.message : e), e && e.hint);
  }
});
rl.on('close', async () => {
  try { await handlers.close(); } catch (_) {}
  process.exit(0);
});
"#;

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    hint: String,
}

impl Reply {
    fn into_result(self, method: &str) -> Result<serde_json::Value> {
        if self.ok {
            return Ok(self.result);
        }
        let e = self.error.unwrap_or_default();
        let mut msg = format!("{method}: {}", e.message);
        if !e.hint.trim().is_empty() {
            msg = format!("{msg}. {}", e.hint);
        }
        Err(match e.code.as_str() {
            "not_configured" => Error::NotConfigured(msg),
            "invalid_params" => Error::InvalidUrl(msg),
            _ => Error::Browser(msg),
        })
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

struct Driver {
    tx: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
    exited: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<tokio::process::Child>>,
    call_slack: Duration,
}

impl Driver {
    fn spawn(engine: &PlaywrightEngine) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(&engine.node_bin);
        // `require('playwright')` resolves against NODE_PATH; global installs are not on it by
        // default.
        if let Some(node_path) = detect_node_path_for_playwright() {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd
            .arg("-e")
            .arg(DRIVER_JS)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "browser automation requires Node.js (`{}`) and the Playwright npm package: {e}",
                    engine.node_bin
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Browser("driver: missing stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Browser("driver: missing stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Browser("driver: missing stderr pipe".to_string()))?;

        // Single writer: requests from concurrent pages are serialized onto stdin here, one JSON
        // object per line. A line is never interleaved with another.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
            // EOF tells the driver to close the browser and exit.
            let _ = stdin.shutdown().await;
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let exited = Arc::new(AtomicBool::new(false));
        {
            let pending = pending.clone();
            let exited = exited.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let reply: Reply = match serde_json::from_str(line.trim()) {
                        Ok(r) => r,
                        Err(e) => {
                            debug!(error = %e, "ignoring non-protocol driver output");
                            continue;
                        }
                    };
                    // Replies arrive in completion order, not request order. Id 0 (notifications)
                    // and ids whose caller already timed out have no waiter and are dropped.
                    let waiter = pending.lock().ok().and_then(|mut p| p.remove(&reply.id));
                    if let Some(w) = waiter {
                        let _ = w.send(reply);
                    }
                }
                exited.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with a closed-channel error.
                if let Ok(mut p) = pending.lock() {
                    p.clear();
                }
            });
        }
        // Playwright warnings and node stack traces; must be drained or the child blocks on a full
        // pipe.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "searchai::playwright", "{line}");
            }
        });

        Ok(Self {
            tx,
            pending,
            next_id: AtomicU64::new(1),
            exited,
            child: tokio::sync::Mutex::new(Some(child)),
            call_slack: engine.call_slack,
        })
    }

    fn forget(&self, id: u64) {
        if let Ok(mut p) = self.pending.lock() {
            p.remove(&id);
        }
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(Error::Browser(format!("{method}: driver process has exited")));
        }
        // Register before sending so a fast reply cannot race past its waiter.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| Error::Browser("driver state poisoned".to_string()))?
            .insert(id, tx);

        let line = serde_json::json!({ "id": id, "method": method, "params": params }).to_string();
        if self.tx.send(line).is_err() {
            self.forget(id);
            return Err(Error::Browser(format!("{method}: driver is not running")));
        }

        // The driver enforces `timeout` itself; the slack only guards against a wedged child.
        let hard = timeout.saturating_add(self.call_slack);
        match tokio::time::timeout(hard, rx).await {
            Ok(Ok(reply)) => reply.into_result(method),
            Ok(Err(_)) => Err(Error::Browser(format!(
                "{method}: driver exited before replying"
            ))),
            Err(_) => {
                self.forget(id);
                Err(Error::Browser(format!(
                    "{method}: no reply within {}ms",
                    hard.as_millis()
                )))
            }
        }
    }

    /// Fire-and-forget request; the reply (if any) is discarded.
    fn notify(&self, method: &str, params: serde_json::Value) {
        let line = serde_json::json!({ "id": 0, "method": method, "params": params }).to_string();
        let _ = self.tx.send(line);
    }

    async fn reap(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("playwright driver did not exit; killing it");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }
}

/// `BrowserEngine` backed by Playwright's Chromium.
#[derive(Debug, Clone)]
pub struct PlaywrightEngine {
    node_bin: String,
    launch_timeout: Duration,
    call_slack: Duration,
    // When set, `launch` fails with `NotConfigured` before any process is spawned.
    render_disabled: bool,
}

impl Default for PlaywrightEngine {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PlaywrightEngine {
    pub fn new(node_bin: impl Into<String>) -> Self {
        Self {
            node_bin: node_bin.into(),
            launch_timeout: Duration::from_secs(45),
            call_slack: Duration::from_secs(10),
            render_disabled: false,
        }
    }

    /// Node binary from `SEARCHAI_NODE`, else `node` on PATH. `SEARCHAI_RENDER_DISABLE` turns
    /// launching off.
    pub fn from_env() -> Self {
        Self::new(env("SEARCHAI_NODE").unwrap_or_else(|| "node".to_string()))
            .with_render_disabled(env_truthy("SEARCHAI_RENDER_DISABLE"))
    }

    /// Deterministic escape hatch for environments without local tooling.
    pub fn with_render_disabled(mut self, disabled: bool) -> Self {
        self.render_disabled = disabled;
        self
    }

    pub fn render_disabled(&self) -> bool {
        self.render_disabled
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    pub fn node_bin(&self) -> &str {
        &self.node_bin
    }
}

#[async_trait::async_trait]
impl BrowserEngine for PlaywrightEngine {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn launch(&self) -> Result<Box<dyn Browser>> {
        if self.render_disabled {
            return Err(Error::NotConfigured(
                "browser backend disabled (SEARCHAI_RENDER_DISABLE)".to_string(),
            ));
        }
        let driver = Arc::new(Driver::spawn(self)?);
        let launched = driver
            .call(
                "launch",
                serde_json::json!({ "timeout_ms": self.launch_timeout.as_millis() as u64 }),
                self.launch_timeout,
            )
            .await;
        match launched {
            Ok(v) => {
                debug!(
                    version = v.get("version").and_then(|x| x.as_str()).unwrap_or(""),
                    "chromium launched"
                );
                Ok(Box::new(PlaywrightBrowser { driver }))
            }
            Err(e) => {
                // Closing stdin makes the driver exit; kill_on_drop covers the rest.
                driver.reap().await;
                Err(e)
            }
        }
    }
}

pub struct PlaywrightBrowser {
    driver: Arc<Driver>,
}

#[async_trait::async_trait]
impl Browser for PlaywrightBrowser {
    async fn new_page(&self, opts: &ContextOptions) -> Result<Box<dyn BrowserPage>> {
        let v = self
            .driver
            .call(
                "new_context",
                serde_json::json!({
                    "user_agent": opts.user_agent,
                    "headers": opts.headers,
                    "viewport": opts.viewport,
                    "block_resources": opts.block_resources,
                    "default_timeout_ms": opts.default_timeout_ms,
                }),
                OP_TIMEOUT,
            )
            .await?;
        let context_id = v
            .get("context_id")
            .and_then(|x| x.as_u64())
            .ok_or_else(|| Error::Browser("new_context: missing context_id".to_string()))?;
        Ok(Box::new(PlaywrightPage {
            driver: self.driver.clone(),
            context_id,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        let r = self
            .driver
            .call("close", serde_json::json!({}), OP_TIMEOUT)
            .await;
        self.driver.reap().await;
        r.map(|_| ())
    }
}

pub struct PlaywrightPage {
    driver: Arc<Driver>,
    context_id: u64,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl BrowserPage for PlaywrightPage {
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        self.driver
            .call(
                "set_extra_headers",
                serde_json::json!({ "context_id": self.context_id, "headers": headers }),
                OP_TIMEOUT,
            )
            .await
            .map(|_| ())
    }

    async fn goto(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<Navigation> {
        let v = self
            .driver
            .call(
                "goto",
                serde_json::json!({
                    "context_id": self.context_id,
                    "url": url,
                    "wait_until": wait_until.as_str(),
                    "timeout_ms": timeout.as_millis() as u64,
                }),
                timeout,
            )
            .await?;
        Ok(Navigation {
            final_url: v
                .get("final_url")
                .and_then(|x| x.as_str())
                .unwrap_or(url)
                .to_string(),
            status: v.get("status").and_then(|x| x.as_u64()).map(|n| n as u16),
        })
    }

    async fn wait_for_load_state(&self, state: WaitUntil, timeout: Duration) -> Result<()> {
        self.driver
            .call(
                "wait_for_load_state",
                serde_json::json!({
                    "context_id": self.context_id,
                    "state": state.as_str(),
                    "timeout_ms": timeout.as_millis() as u64,
                }),
                timeout,
            )
            .await
            .map(|_| ())
    }

    async fn content(&self) -> Result<String> {
        let v = self
            .driver
            .call(
                "content",
                serde_json::json!({ "context_id": self.context_id }),
                OP_TIMEOUT,
            )
            .await?;
        Ok(v.get("html")
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .to_string())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.driver
            .call(
                "close_context",
                serde_json::json!({ "context_id": self.context_id }),
                OP_TIMEOUT,
            )
            .await
            .map(|_| ())
    }
}

impl Drop for PlaywrightPage {
    fn drop(&mut self) {
        // Pages abandoned mid-flight (batch timeout) still release their context.
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.driver.notify(
                "close_context",
                serde_json::json!({ "context_id": self.context_id }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_reply_maps_error_codes() {
        let r = Reply {
            id: 1,
            ok: false,
            result: serde_json::Value::Null,
            error: Some(ReplyError {
                code: "not_configured".to_string(),
                message: "no playwright".to_string(),
                hint: "install it".to_string(),
            }),
        };
        let e = r.into_result("launch").unwrap_err();
        assert!(matches!(e, Error::NotConfigured(_)));
        assert!(e.to_string().contains("install it"));

        let r = Reply {
            id: 2,
            ok: false,
            result: serde_json::Value::Null,
            error: Some(ReplyError {
                code: "timeout".to_string(),
                message: "Timeout 45000ms exceeded".to_string(),
                hint: String::new(),
            }),
        };
        assert!(matches!(r.into_result("goto"), Err(Error::Browser(_))));
    }

    #[test]
    fn reply_parses_driver_wire_format() {
        let r: Reply =
            serde_json::from_str(r#"{"id":7,"ok":true,"result":{"context_id":3}}"#).unwrap();
        assert_eq!(r.id, 7);
        let v = r.into_result("new_context").unwrap();
        assert_eq!(v["context_id"].as_u64(), Some(3));
    }

    #[test]
    fn node_path_probe_ignores_empty_segments() {
        assert!(!node_path_has_playwright(""));
        assert!(!node_path_has_playwright(" : "));
    }

    #[tokio::test]
    async fn disabled_backend_fails_fast_without_spawning() {
        let engine =
            PlaywrightEngine::new("definitely-not-a-node-binary").with_render_disabled(true);
        assert!(engine.render_disabled());
        let err = engine.launch().await.err().expect("launch must fail");
        assert!(matches!(err, Error::NotConfigured(_)));
        assert!(err.to_string().contains("SEARCHAI_RENDER_DISABLE"));
    }

    #[test]
    fn explicit_engine_ignores_the_disable_switch() {
        assert!(!PlaywrightEngine::new("node").render_disabled());
    }

    #[tokio::test]
    async fn missing_node_binary_is_not_configured() {
        let engine = PlaywrightEngine::new("/nonexistent/searchai-node-binary");
        let err = engine.launch().await.err().expect("launch must fail");
        assert!(matches!(err, Error::NotConfigured(_)));
    }
}
