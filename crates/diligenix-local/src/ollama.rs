use diligenix_core::{ChatTurn, Error, LanguageModel, Result};
use serde::{Deserialize, Serialize};

use crate::{env, model_error, DEFAULT_LLM_TIMEOUT_MS};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_ms: u64,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            timeout_ms: DEFAULT_LLM_TIMEOUT_MS,
        }
    }

    /// Local daemon by default; set `DILIGENIX_OLLAMA_API_KEY` for hosted Ollama.
    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url =
            env("DILIGENIX_OLLAMA_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:11434".to_string());
        let model = model_override
            .or_else(|| env("DILIGENIX_OLLAMA_MODEL"))
            .unwrap_or_else(|| "llama3.1:8b".to_string());
        Ok(Self {
            api_key: env("DILIGENIX_OLLAMA_API_KEY"),
            ..Self::new(client, base_url, model)
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn chat(&self, turns: &[ChatTurn]) -> Result<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: turns
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str().to_string(),
                    content: t.content.clone(),
                })
                .collect(),
            stream: Some(false),
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        tracing::debug!(model = %self.model, turns = turns.len(), "ollama chat request");
        let resp = rb.json(&req).send().await.map_err(model_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Model(format!("ollama chat HTTP {status}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::Model(e.to_string()))?;
        Ok(parsed.message.content)
    }
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, turns: &[ChatTurn]) -> Result<String> {
        self.chat(turns).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}
