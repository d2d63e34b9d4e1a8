pub mod providers;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// True when the counts were derived from character counts instead of
    /// provider-reported usage. Good enough for metering, never for billing.
    pub estimated: bool,
}

#[derive(Debug, Clone)]
pub struct GenerateOutput {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("model returned no content")]
    Empty,
}

/// One contract for every model backend: system prompt plus ordered
/// messages in, text plus token usage out. The concrete provider is chosen
/// once at startup and passed by reference from then on.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<GenerateOutput, ModelError>;
}

fn estimate_tokens_from_chars(char_count: usize) -> u64 {
    (char_count as u64).div_ceil(4)
}

/// Deterministic char-count fallback when the provider reports no usage.
/// Monotonic in input size and reproducible for the same text.
pub fn estimate_usage(
    system_prompt: &str,
    messages: &[ChatMessage],
    response_text: &str,
) -> TokenUsage {
    let input_chars = system_prompt.chars().count()
        + messages
            .iter()
            .map(|m| m.content.chars().count())
            .sum::<usize>();
    let output_chars = response_text.chars().count();
    let input_tokens = estimate_tokens_from_chars(input_chars);
    let output_tokens = estimate_tokens_from_chars(output_chars);
    TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
        estimated: true,
    }
}
