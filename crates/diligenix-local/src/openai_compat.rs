use diligenix_core::{ChatTurn, Error, LanguageModel, Result};
use serde::{Deserialize, Serialize};

use crate::{env, model_error, DEFAULT_LLM_TIMEOUT_MS};

fn openai_compat_base_url_from_env() -> Option<String> {
    env("DILIGENIX_OPENAI_COMPAT_BASE_URL")
}

fn openai_compat_api_key_from_env() -> Option<String> {
    env("DILIGENIX_OPENAI_COMPAT_API_KEY")
}

fn openai_compat_model_from_env() -> Option<String> {
    env("DILIGENIX_OPENAI_COMPAT_MODEL")
}

pub fn openai_compat_configured() -> bool {
    openai_compat_base_url_from_env().is_some()
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_ms: u64,
    max_tokens: Option<u64>,
    temperature: Option<f64>,
}

impl OpenAiCompatClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            timeout_ms: DEFAULT_LLM_TIMEOUT_MS,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url = openai_compat_base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing DILIGENIX_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        let model = model_override
            .or_else(openai_compat_model_from_env)
            .ok_or_else(|| {
                Error::NotConfigured(
                    "missing model for openai_compat (pass --model or set DILIGENIX_OPENAI_COMPAT_MODEL)"
                        .to_string(),
                )
            })?;

        Ok(Self {
            api_key: openai_compat_api_key_from_env(),
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

    pub fn with_sampling(mut self, max_tokens: Option<u64>, temperature: Option<f64>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    pub async fn chat(&self, turns: &[ChatTurn]) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: turns
                .iter()
                .map(|t| Message {
                    role: t.role.as_str().to_string(),
                    content: t.content.clone(),
                })
                .collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: Some(false),
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        tracing::debug!(model = %self.model, turns = turns.len(), "chat.completions request");
        let resp = rb.json(&req).send().await.map_err(model_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Model(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }

        let parsed: ChatCompletionsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Model(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Model("openai_compat response has no choices".to_string()))
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn generate(&self, turns: &[ChatTurn]) -> Result<String> {
        self.chat(turns).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
