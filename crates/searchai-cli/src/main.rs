use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use searchai_core::{SearchOutcome, SimilarityResult};
use searchai_local::{render_playwright, PipelineConfig, SearchRequest};
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "searchai")]
#[command(about = "Answer a question from live web results (search, fetch, embed, summarize)", long_about = None)]
struct Cli {
    /// Log filter, e.g. "debug" or "searchai_local=trace" (overrides RUST_LOG).
    #[arg(long, global = true, env = "SEARCHAI_LOG")]
    log_level: Option<String>,
    /// Shorthand for `--log-level debug`.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Disable ANSI colors in log output.
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the web for QUERY and print a grounded summary.
    Ask(AskCmd),
    /// Diagnose browser tooling and configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// The question. Multiple words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,
    /// Number of ranked chunks given to the model.
    #[arg(short = 'k', long)]
    k: Option<usize>,
    /// Emit a JSON report (summary, ranked results, metrics) instead of plain text.
    #[arg(long)]
    json: bool,
    /// Embed with the offline lexical embedder instead of the embeddings API.
    #[arg(long)]
    offline_embeddings: bool,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// OpenAI-compatible API base URL.
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    embedding_model: Option<String>,
    #[arg(long)]
    chat_model: Option<String>,
    /// Search endpoint; the query is sent as `q`.
    #[arg(long)]
    search_url: Option<String>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    max_batches: Option<usize>,
    #[arg(long)]
    page_timeout_ms: Option<u64>,
    #[arg(long)]
    batch_timeout_ms: Option<u64>,
    #[arg(long)]
    stagger_ms: Option<u64>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    chunk_overlap: Option<usize>,
}

impl AskCmd {
    fn apply(&self, c: &mut PipelineConfig) {
        if let Some(v) = &self.base_url {
            c.openai.base_url = v.clone();
        }
        if let Some(v) = &self.embedding_model {
            c.openai.embedding_model = v.clone();
        }
        if let Some(v) = &self.chat_model {
            c.openai.chat_model = v.clone();
        }
        if let Some(v) = &self.search_url {
            c.resolver.search_url = v.clone();
        }
        if let Some(v) = self.batch_size {
            c.fetch.batch_size = v;
        }
        if let Some(v) = self.max_batches {
            c.fetch.max_batches = v;
        }
        if let Some(v) = self.page_timeout_ms {
            c.fetch.page_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.batch_timeout_ms {
            c.fetch.batch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.stagger_ms {
            c.fetch.stagger = Duration::from_millis(v);
        }
        if let Some(v) = self.chunk_size {
            c.indexer.chunk_size = v;
        }
        if let Some(v) = self.chunk_overlap {
            c.indexer.overlap = v;
        }
    }
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Bound for each tool probe.
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json | text
    #[arg(long, default_value = "json")]
    output: String,
}

#[derive(serde::Serialize)]
struct AskReport<'a> {
    schema_version: u64,
    kind: &'static str,
    ok: bool,
    query: &'a str,
    summary: &'a str,
    results: &'a [SimilarityResult],
    metrics: &'a searchai_core::Metrics,
}

fn init_logging(log_level: Option<&str>, verbose: bool, no_color: bool) -> Result<()> {
    let default_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = match (log_level, verbose) {
        (Some(l), _) => l.to_string(),
        (None, true) => "debug".to_string(),
        (None, false) => default_level,
    };
    let env_filter =
        EnvFilter::try_new(&filter).with_context(|| format!("invalid log filter {filter:?}"))?;
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(!no_color && std::env::var_os("NO_COLOR").is_none());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("initializing logging")?;
    Ok(())
}

fn print_outcome(query: &str, out: &SearchOutcome, json: bool) -> Result<()> {
    if json {
        let report = AskReport {
            schema_version: 1,
            kind: "ask",
            ok: true,
            query,
            summary: &out.summary,
            results: &out.results,
            metrics: &out.metrics,
        };
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", out.summary.trim());
    }
    Ok(())
}

async fn probe(cmd: &mut tokio::process::Command, timeout: Duration) -> (bool, String) {
    cmd.kill_on_drop(true)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(o)) if o.status.success() => (
            true,
            String::from_utf8_lossy(&o.stdout).trim().to_string(),
        ),
        Ok(Ok(o)) => (
            false,
            String::from_utf8_lossy(&o.stderr)
                .lines()
                .next()
                .unwrap_or("probe failed")
                .to_string(),
        ),
        Ok(Err(e)) => (false, e.to_string()),
        Err(_) => (false, format!("no answer within {}ms", timeout.as_millis())),
    }
}

async fn doctor(args: &DoctorCmd) -> serde_json::Value {
    fn has_env(k: &str) -> bool {
        std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
    }
    let t0 = std::time::Instant::now();
    let timeout = Duration::from_millis(args.timeout_ms.max(1));
    let engine = searchai_local::PlaywrightEngine::from_env();

    let mut checks: Vec<serde_json::Value> = Vec::new();

    let (node_ok, node_msg) = probe(
        tokio::process::Command::new(engine.node_bin()).arg("--version"),
        timeout,
    )
    .await;
    checks.push(serde_json::json!({
        "name": "node",
        "ok": node_ok,
        "message": node_msg,
        "hint": if node_ok { "" } else { "Install Node.js or set SEARCHAI_NODE to its path." },
    }));

    let node_path = render_playwright::detect_node_path_for_playwright();
    let (pw_ok, pw_msg) = if node_ok {
        let mut cmd = tokio::process::Command::new(engine.node_bin());
        cmd.args(["-e", "console.log(require.resolve('playwright'))"]);
        if let Some(np) = &node_path {
            cmd.env("NODE_PATH", np);
        }
        probe(&mut cmd, timeout).await
    } else {
        (false, "skipped: node unavailable".to_string())
    };
    checks.push(serde_json::json!({
        "name": "playwright",
        "ok": pw_ok,
        "message": pw_msg,
        "hint": if pw_ok { "" } else { "npm i -g playwright && npx playwright install chromium" },
    }));

    let render_disabled = engine.render_disabled();
    let config_error = PipelineConfig::from_env().err().map(|e| e.to_string());
    checks.push(serde_json::json!({
        "name": "config",
        "ok": config_error.is_none(),
        "message": config_error.clone().unwrap_or_else(|| "environment overrides are valid".to_string()),
        "hint": if config_error.is_none() { "" } else { "Fix the SEARCHAI_* variable named above." },
    }));

    let ok = checks
        .iter()
        .all(|c| c["ok"].as_bool().unwrap_or(false));
    debug!(ok, node_ok, pw_ok, "doctor checks done");
    serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "searchai",
        "version": env!("CARGO_PKG_VERSION"),
        "elapsed_ms": t0.elapsed().as_millis() as u64,
        "configured": {
            "api_key_configured": has_env("OPENAI_API_KEY") || has_env("SEARCHAI_OPENAI_API_KEY"),
            "node_bin": engine.node_bin(),
            "node_path_override": node_path.is_some(),
            "render_disabled": render_disabled,
        },
        "checks": checks,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref(), cli.verbose, cli.no_color)?;

    match cli.command {
        Commands::Ask(args) => {
            let query = args.query.join(" ");
            // Reject a blank question before reading config or touching the network.
            searchai_core::validate_query(&query)?;
            let mut config = PipelineConfig::from_env()?;
            args.apply(&mut config);
            let req = SearchRequest {
                query: query.clone(),
                api_key: args.api_key.clone(),
                k: args.k,
                config,
                offline_embeddings: args.offline_embeddings,
            };
            debug!(config = ?req.config, k = ?req.k, offline = req.offline_embeddings, "ask");
            let out = match searchai_local::run(&req).await {
                Ok(out) => out,
                Err(e) => {
                    error!(upstream = e.is_upstream(), "ask failed: {e}");
                    return Err(e.into());
                }
            };
            info!(
                results = out.results.len(),
                total_ms = out.metrics.timings.total_ms,
                "answered"
            );
            print_outcome(query.trim(), &out, args.json)?;
        }
        Commands::Doctor(args) => {
            println!("{}", doctor(&args).await);
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "searchai",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("searchai {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }
    Ok(())
}
