//! Text-completion capability
//!
//! The ranking and learning services issue prompts and parse free text; they
//! never see a vendor's request or response shape.
use crate::error::AppResult;

pub mod anthropic;

pub use anthropic::AnthropicClient;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TextCompletion: Send + Sync {
    /// Completes `prompt`, returning the model's text output
    async fn complete(&self, prompt: &str, max_tokens: u32) -> AppResult<String>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
