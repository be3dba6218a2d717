//! Ollama chat backend (`/api/chat`, non-streaming).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompts::{build_user_prompt, SYSTEM_PROMPT};
use super::{SummarizeError, Summarizer};
use crate::analysis::Symbol;
use crate::config::SummarizerConfig;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_ctx: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

pub struct OllamaSummarizer {
    client: Client,
    base_url: String,
    model: String,
    context_window: u32,
    temperature: f32,
}

impl OllamaSummarizer {
    pub fn new(config: &SummarizerConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            context_window: config.context_window,
            temperature: config.temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                num_ctx: self.context_window,
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, "Summarizer availability check failed: {}", e);
                false
            }
        }
    }

    async fn summarize(&self, symbol: &Symbol) -> Result<String, SummarizeError> {
        let prompt = build_user_prompt(symbol);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.build_request(&prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::InvalidResponse(e.to_string()))?;
        Ok(body.message.map(|m| m.content).unwrap_or_default())
    }
}
