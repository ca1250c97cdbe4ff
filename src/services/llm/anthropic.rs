use crate::{
    error::{AppError, AppResult},
    services::{llm::TextCompletion, rate_limit::RateLimitedClient},
};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl MessagesResponse {
    /// Concatenates the text blocks of a response
    fn into_text(self) -> String {
        self.content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Anthropic Messages API client
#[derive(Clone)]
pub struct AnthropicClient {
    http_client: HttpClient,
    api_key: String,
    model: String,
    limiter: RateLimitedClient,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String, limiter: RateLimitedClient) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            api_key,
            model,
            limiter,
        })
    }
}

#[async_trait::async_trait]
impl TextCompletion for AnthropicClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> AppResult<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let text = self
            .limiter
            .schedule(|| async {
                let response = self
                    .http_client
                    .post(MESSAGES_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", API_VERSION)
                    .json(&request)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AppError::Completion(format!(
                        "Anthropic API returned status {}: {}",
                        status, body
                    )));
                }

                let body: MessagesResponse = response.json().await?;
                Ok(body.into_text())
            })
            .await?;

        tracing::info!(
            model = %self.model,
            prompt_chars = prompt.len(),
            response_chars = text.len(),
            "Completion received"
        );

        Ok(text)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
