use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use searchai_core::{ContentSource, Error, FetchOutcome};
use searchai_local::{
    run_with_engine, ContentFetcher, FetchConfig, FixtureBrowser, IndexerConfig, LexicalEmbedder,
    LinkResolver, OpenAiClient, OpenAiConfig, PipelineConfig, ResolverConfig, SearchRequest,
    SemanticIndexer,
};
use std::sync::{Arc, Mutex};

const SEARCH: &str = "https://search.example/search";

#[derive(Clone)]
struct Fake {
    dimension: usize,
    embeddings_status: StatusCode,
    reply: String,
    chats: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl Fake {
    fn new() -> Self {
        Self {
            dimension: 1536,
            embeddings_status: StatusCode::OK,
            reply: "Grounded summary.".to_string(),
            chats: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

async fn embeddings(
    State(f): State<Fake>,
    Json(v): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !f.embeddings_status.is_success() {
        return (
            f.embeddings_status,
            Json(serde_json::json!({"error": {"message": "upstream exploded"}})),
        );
    }
    let input = v["input"].as_str().unwrap_or("");
    let emb = LexicalEmbedder::new(f.dimension).vector(input);
    (
        StatusCode::OK,
        Json(serde_json::json!({"data": [{"index": 0, "embedding": emb}]})),
    )
}

async fn chat(State(f): State<Fake>, Json(v): Json<serde_json::Value>) -> Json<serde_json::Value> {
    f.chats.lock().unwrap().push(v);
    Json(serde_json::json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": f.reply}}]
    }))
}

async fn serve(fake: Fake) -> String {
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/chat/completions", post(chat))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn article(body: &str) -> String {
    format!(
        "<html><body><header>Site</header><nav>Home About</nav>\
         <main><article><h1>Story</h1><p>{body}</p></article></main>\
         <div class=\"cookie-notice\">cookies</div><footer>Legal</footer></body></html>"
    )
}

fn results_page(links: &[&str]) -> String {
    links
        .iter()
        .map(|l| format!(r#"<div><a jsname="UWckNb" href="{l}">r</a></div>"#))
        .collect()
}

fn config(base_url: String) -> PipelineConfig {
    PipelineConfig {
        resolver: ResolverConfig {
            search_url: SEARCH.to_string(),
            ..Default::default()
        },
        fetch: FetchConfig::default().without_delays(),
        indexer: IndexerConfig {
            chunk_size: 200,
            overlap: 20,
            ..Default::default()
        },
        openai: OpenAiConfig {
            base_url,
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn full_pipeline_summarizes_fetched_pages() {
    let fake = Fake::new();
    let base = serve(fake.clone()).await;
    let fx = FixtureBrowser::new()
        .with_page(
            SEARCH,
            results_page(&[
                "https://volcano.example/news?utm=1",
                "https://markets.example/today",
                "https://broken.example/",
                "https://www.youtube.com/watch?v=abc",
            ]),
        )
        .with_page(
            "https://volcano.example/news",
            article("The volcano eruption in Iceland sent ash over Reykjavik and grounded flights."),
        )
        .with_page(
            "https://markets.example/today",
            article("Stock markets rallied as bond yields fell after the central bank meeting."),
        )
        .with_failure("https://broken.example/", "net::ERR_CONNECTION_RESET");

    let req = SearchRequest {
        query: "  iceland volcano eruption ash  ".to_string(),
        api_key: Some("sk-e2e-key".to_string()),
        k: Some(2),
        config: config(base),
        offline_embeddings: false,
    };
    let out = run_with_engine(&req, Arc::new(fx.clone())).await.unwrap();

    assert_eq!(out.summary, "Grounded summary.");
    assert!(!out.results.is_empty() && out.results.len() <= 2);
    assert!(out.results[0].text.contains("volcano eruption"));
    assert!(!out.results[0].text.contains("cookies"));

    let m = &out.metrics;
    assert_eq!(m.fetch.total_links, 3);
    assert_eq!(m.fetch.succeeded, 2);
    assert_eq!(m.fetch.failed, 1);
    assert!(m.chunks_ingested >= 1);
    assert_eq!(m.store_len, m.chunks_ingested);

    // One browser for resolve + fetch, every context released.
    assert_eq!(fx.launches(), 1);
    assert_eq!(fx.browser_closes(), 1);
    assert_eq!(fx.pages_opened(), fx.pages_closed());

    let chats = fake.chats.lock().unwrap();
    assert_eq!(chats.len(), 1);
    let msgs = chats[0]["messages"].as_array().unwrap();
    assert_eq!(msgs[0]["role"], "system");
    assert!(msgs[0]["content"]
        .as_str()
        .unwrap()
        .contains("investigative journalist"));
    let user = msgs[1]["content"].as_str().unwrap();
    assert!(user.starts_with("Question: iceland volcano eruption ash\n\nContext: "));
    assert!(user.contains("Similarity "));
}

fn many_links(n: usize) -> (FixtureBrowser, Vec<String>) {
    let mut fx = FixtureBrowser::new();
    let mut links = Vec::new();
    for i in 0..n {
        let u = format!("https://site{i}.example/page");
        fx = fx.with_page(u.clone(), article(&format!("page number {i}")));
        links.push(u);
    }
    (fx, links)
}

fn fetcher(fx: &FixtureBrowser) -> ContentFetcher {
    ContentFetcher::new(
        Arc::new(fx.clone()),
        LinkResolver::new(ResolverConfig {
            search_url: SEARCH.to_string(),
            ..Default::default()
        }),
        FetchConfig::default().without_delays(),
    )
}

#[tokio::test]
async fn twenty_links_are_all_attempted_in_three_batches() {
    let (fx, links) = many_links(20);
    let out = fetcher(&fx).fetch_all(&links).await.unwrap();
    assert_eq!(out.metrics.attempted, 20);
    assert_eq!(out.metrics.batches_run, 3);
    assert_eq!(out.metrics.beyond_bound, 0);
    assert_eq!(out.metrics.succeeded, 20);
    assert_eq!(fx.navigations(), 20);
    assert!(out.text.starts_with("Story page number 0 Story page number 1"));
    assert!(out.text.ends_with("Story page number 19"));
}

#[tokio::test]
async fn fifty_links_stop_at_forty() {
    let (fx, links) = many_links(50);
    let out = fetcher(&fx).fetch_all(&links).await.unwrap();
    assert_eq!(out.metrics.total_links, 50);
    assert_eq!(out.metrics.attempted, 40);
    assert_eq!(out.metrics.beyond_bound, 10);
    assert_eq!(out.metrics.batches_run, 5);
    assert_eq!(fx.navigations(), 40);
    let visited = fx.visited();
    assert!(!visited.iter().any(|u| u == "https://site40.example/page"));
    assert!(!out.text.contains("page number 45"));
    assert_eq!(fx.pages_opened(), fx.pages_closed());
}

struct NothingFetched;

#[async_trait::async_trait]
impl ContentSource for NothingFetched {
    async fn fetch_for_query(&self, _query: &str) -> searchai_core::Result<FetchOutcome> {
        Ok(FetchOutcome::default())
    }
}

fn http_indexer(base: String, dimension: usize) -> SemanticIndexer {
    let client = Arc::new(OpenAiClient::new(
        reqwest::Client::new(),
        &OpenAiConfig {
            base_url: base,
            api_key: Some("sk-e2e".to_string()),
            ..Default::default()
        },
    ));
    SemanticIndexer::new(
        IndexerConfig {
            chunk_size: 120,
            overlap: 10,
            dimension,
            ..Default::default()
        },
        client.clone(),
        client,
        Arc::new(NothingFetched),
    )
}

#[tokio::test]
async fn ingested_content_is_retrievable_by_search() {
    let base = serve(Fake::new()).await;
    let mut ix = http_indexer(base, 1536);
    ix.ingest("Tokio is an asynchronous runtime for the Rust programming language.")
        .await
        .unwrap();
    ix.ingest("Croissants are laminated pastries made with butter and yeast dough.")
        .await
        .unwrap();

    let out = ix.search("rust asynchronous runtime", 1).await.unwrap();
    assert_eq!(out.results.len(), 1);
    assert!(out.results[0].text.contains("Tokio"));
    assert_eq!(out.summary, "Grounded summary.");
}

#[tokio::test]
async fn embedding_failure_propagates_with_context() {
    let mut fake = Fake::new();
    fake.embeddings_status = StatusCode::INTERNAL_SERVER_ERROR;
    let base = serve(fake).await;
    let mut ix = http_indexer(base, 1536);
    let err = ix.ingest("some text").await.unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
    assert!(err.to_string().contains("chunk 0"));
    assert!(err.to_string().contains("500"));
    assert!(ix.store().is_empty());
}

#[tokio::test]
async fn wrong_dimension_from_server_is_fatal() {
    let mut fake = Fake::new();
    fake.dimension = 8;
    let base = serve(fake).await;
    let mut ix = http_indexer(base, 1536);
    let err = ix.ingest("some text").await.unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 1536,
            actual: 8
        }
    ));
}
