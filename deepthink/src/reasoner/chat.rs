//! OpenAI-compatible chat-completions reasoner
//!
//! Works with the DeepSeek API and any other endpoint that accepts
//! `{model, messages}` and answers with `{choices: [{message: {content}}]}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Reasoner;
use crate::config::ReasonerSettings;
use crate::{Error, Result};

/// Chat-completions client authenticated with a bearer token
pub struct ChatCompletionsReasoner {
    client: Client,
    url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatCompletionsReasoner {
    /// Create a new client. `url` is the full chat-completions endpoint.
    pub fn new(url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key)
            .parse()
            .map_err(|_| Error::Config("API key contains invalid header characters".to_string()))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_settings(settings: &ReasonerSettings) -> Result<Self> {
        Self::new(
            &settings.api_url,
            &settings.api_key,
            &settings.model,
            Duration::from_secs(settings.timeout_secs),
        )
    }
}

#[async_trait]
impl Reasoner for ChatCompletionsReasoner {
    async fn think(&self, query: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: query,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("status {}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("unexpected response body: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Upstream("response contained no message content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
