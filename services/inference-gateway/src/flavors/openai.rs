//! `openai` flavor: a chat-completions model served by an OpenAI-compatible API.
//!
//! Manifest section:
//! ```yaml
//! flavors:
//!   openai:
//!     model: gpt-4o-mini
//!     system_prompt: "Answer briefly."
//!     temperature: 0.0
//!     max_tokens: 256
//!     api_base: https://api.openai.com/v1   # optional, else from config
//!     api_key_env: OPENAI_API_KEY           # optional, else from config
//! ```

use crate::predictor::{Predictor, PredictorError};
use crate::runtime::{BoxError, FlavorLoader};
use async_trait::async_trait;
use gateway_core::{OpenAiSettings, ResolvedModel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const FLAVOR: &str = "openai";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OpenAiFlavorConf {
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

pub struct OpenAiChatLoader {
    defaults: OpenAiSettings,
    client: reqwest::Client,
}

impl OpenAiChatLoader {
    pub fn new(defaults: OpenAiSettings) -> Self { Self { defaults, client: reqwest::Client::new() } }
}

impl FlavorLoader for OpenAiChatLoader {
    fn flavor(&self) -> &str { FLAVOR }

    fn load(&self, model: &ResolvedModel, conf: &serde_yaml::Value) -> Result<Arc<dyn Predictor>, BoxError> {
        let conf: OpenAiFlavorConf = serde_yaml::from_value(conf.clone())?;
        let key_env = conf.api_key_env.clone().unwrap_or_else(|| self.defaults.api_key_env.clone());
        let api_key = std::env::var(&key_env).map_err(|_| format!("environment variable {key_env} is not set"))?;
        let base = conf.api_base.clone().unwrap_or_else(|| self.defaults.api_base.clone());
        let endpoint = format!("{}/chat/completions", base.trim_end_matches('/'));
        debug!(model = %model.name, version = model.version, %endpoint, chat_model = %conf.model, "openai flavor configured");
        Ok(Arc::new(OpenAiChatPredictor { client: self.client.clone(), endpoint, api_key, conf }))
    }
}

pub struct OpenAiChatPredictor {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    conf: OpenAiFlavorConf,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> { role: &'static str, content: &'a str }

#[derive(Deserialize)]
struct ChatResponse { choices: Vec<Choice> }

#[derive(Deserialize)]
struct Choice { message: ChoiceMessage }

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Predictor for OpenAiChatPredictor {
    /// One output per returned choice, in order. Choices without text map to `null`.
    async fn predict(&self, input: &str) -> Result<Vec<Value>, PredictorError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.conf.system_prompt.as_deref() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: input });
        let req = ChatRequest { model: &self.conf.model, messages, temperature: self.conf.temperature, max_tokens: self.conf.max_tokens };

        let resp = self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(&req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(PredictorError::Api { status: status.as_u16(), body });
        }
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        Ok(parsed.choices.into_iter().map(|c| c.message.content.map(Value::String).unwrap_or(Value::Null)).collect())
    }
}
