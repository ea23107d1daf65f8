//! Model provider contract: vision analysis of a frame and plain text
//! generation. Concrete integrations (OpenAI, Anthropic, local models) live
//! outside this crate and are injected into the tracker at construction.

mod observation;

use async_trait::async_trait;
use serde_json::Value;

use crate::capture::Frame;
use crate::error::ProviderError;
use crate::prompts::RenderedPrompt;

pub use observation::Observation;

/// Everything a provider needs to describe one frame.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub frame: &'a Frame,
    pub context_description: Option<&'a str>,
    /// Last successfully parsed observation of this session, so the provider
    /// can report only what changed.
    pub previous: Option<&'a Observation>,
    /// `context_description` and `previous` already rendered into the
    /// configured observation template.
    pub prompt: &'a RenderedPrompt,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Returns the raw structured record produced by the vision model. The
    /// capture loop validates it; providers only fail with
    /// [`ProviderError::Format`] when the response is not JSON at all.
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<Value, ProviderError>;

    async fn generate(
        &self,
        prompt: &str,
        system_context: Option<&str>,
    ) -> Result<String, ProviderError>;
}

/// Strips a surrounding Markdown code fence (```` ```json ... ``` ````) that
/// models add despite being told not to.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match body.find('\n') {
        Some(newline) => &body[newline + 1..],
        None => body,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parses provider text into JSON, mapping failures to a format error.
pub fn parse_json_response(raw: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|err| ProviderError::format(format!("response is not valid JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn parse_json_response_rejects_prose() {
        let err = parse_json_response("Sure! Here is the analysis").unwrap_err();
        assert!(err.is_format());
        assert_eq!(parse_json_response("```\n[1]\n```").unwrap(), serde_json::json!([1]));
    }
}
