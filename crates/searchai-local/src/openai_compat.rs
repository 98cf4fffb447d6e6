//! OpenAI-compatible HTTP client: embeddings and chat completions.
//!
//! Works against anything that speaks the `/v1/embeddings` and `/v1/chat/completions` shapes
//! (OpenAI itself, vLLM, llama.cpp server, LiteLLM). The key is sent as a bearer token and never
//! appears in `Debug` output or error messages.

use crate::config::{redact_secret, OpenAiConfig};
use serde::{Deserialize, Serialize};
use searchai_core::{ChatMessage, ChatModel, Embedder, Error, Result};

/// Longest response body excerpt carried in an error message.
const BODY_EXCERPT_CHARS: usize = 300;

fn excerpt(body: &str) -> String {
    let t = body.trim();
    match t.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((i, _)) => format!("{}…", &t[..i]),
        None => t.to_string(),
    }
}

/// OpenAI-compatible `/v1/embeddings` + `/v1/chat/completions` client.
///
/// No retries; callers decide what to do with upstream failures.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    embedding_model: String,
    chat_model: String,
    timeout: std::time::Duration,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(redact_secret))
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, config: &OpenAiConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            timeout: config.timeout,
        }
    }

    /// Like [`OpenAiClient::new`] but refuses to run without an API key.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        if config.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(Error::NotConfigured(
                "missing API key (set OPENAI_API_KEY or pass --api-key)".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("searchai/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::NotConfigured(format!("http client: {e}")))?;
        Ok(Self::new(client, config))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut rb = self
            .client
            .post(format!("{}{path}", self.base_url))
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }
        rb
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiClient {
    fn name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let req = EmbeddingsRequest {
            model: &self.embedding_model,
            input: text,
        };
        let resp = self
            .post("/v1/embeddings")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embeddings HTTP {status}: {}",
                excerpt(&body)
            )));
        }
        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("embeddings response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Embedding("embeddings response has no data".to_string()))
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiClient {
    fn name(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: &self.chat_model,
            messages,
            stream: Some(false),
        };
        let resp = self
            .post("/v1/chat/completions")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "chat.completions HTTP {status}: {}",
                excerpt(&body)
            )));
        }
        let parsed: ChatCompletionsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Llm(format!("chat.completions response: {e}")))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
