// ── Hivecore Providers: Anthropic ──────────────────────────────────────────
// Streams `POST /v1/messages` and accumulates assistant text deltas to a
// terminal state. Token counts come from the usage fields on message_start
// and message_delta, falling back to character estimates.

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{truncate_utf8, LlmResponse, ProviderKind};
use crate::auth::AuthManager;
use crate::interactions::{estimate_tokens_from_chars, InteractionStore};
use crate::providers::{
    run_logged, InvokeRequest, ProviderAdapter, WireResponse, SMOKE_PROMPT, SMOKE_TIMEOUT_MS,
};
use async_trait::async_trait;
use futures::StreamExt;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8_192;

/// A parsed server-sent event we care about. Everything else (pings,
/// content_block_start/stop) is ignored.
#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    TextDelta(String),
    InputTokens(u64),
    OutputTokens(u64),
}

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    auth: Arc<AuthManager>,
    interactions: Arc<InteractionStore>,
}

impl AnthropicProvider {
    pub fn new(client: Client, auth: Arc<AuthManager>, interactions: Arc<InteractionStore>) -> Self {
        AnthropicProvider {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth,
            interactions,
        }
    }

    /// Parse one SSE data payload.
    fn parse_sse_event(data: &str) -> Option<SseEvent> {
        let v: Value = serde_json::from_str(data).ok()?;
        match v["type"].as_str()? {
            "content_block_delta" => {
                let delta = &v["delta"];
                if delta["type"].as_str() == Some("text_delta") {
                    delta["text"].as_str().map(|s| SseEvent::TextDelta(s.to_string()))
                } else {
                    None
                }
            }
            // Input tokens arrive up front on message_start.
            "message_start" => v["message"]["usage"]["input_tokens"]
                .as_u64()
                .map(SseEvent::InputTokens),
            // Output tokens arrive on the terminal message_delta.
            "message_delta" => v["usage"]["output_tokens"]
                .as_u64()
                .map(SseEvent::OutputTokens),
            _ => None,
        }
    }

    /// The raw wire call: no smoke gating, no logging. Consumes the SSE
    /// stream to completion and returns accumulated text + usage.
    async fn wire_call(&self, model: &str, prompt: &str) -> CoreResult<WireResponse> {
        let key = self.auth.anthropic_key()?;
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "stream": true,
            "messages": [{"role": "user", "content": prompt}],
        });

        info!("[provider] anthropic request model={}", model);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::ProviderHttp {
                status,
                body: truncate_utf8(&body_text, 500).to_string(),
            });
        }

        let mut text = String::new();
        let mut input_tokens: Option<u64> = None;
        let mut output_tokens: Option<u64> = None;

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if let Some(data) = line.strip_prefix("data: ") {
                    match Self::parse_sse_event(data) {
                        Some(SseEvent::TextDelta(t)) => text.push_str(&t),
                        Some(SseEvent::InputTokens(n)) => input_tokens = Some(n),
                        Some(SseEvent::OutputTokens(n)) => output_tokens = Some(n),
                        None => {}
                    }
                }
            }
        }

        let input_tokens = input_tokens.unwrap_or_else(|| estimate_tokens_from_chars(prompt));
        let output_tokens = output_tokens.unwrap_or_else(|| estimate_tokens_from_chars(&text));
        Ok(WireResponse { text, input_tokens, output_tokens })
    }

    /// Minimal completion used for auth validation.
    async fn smoke_probe(&self) -> CoreResult<String> {
        let wire = tokio::time::timeout(
            std::time::Duration::from_millis(SMOKE_TIMEOUT_MS),
            self.wire_call("claude-haiku-4-5", SMOKE_PROMPT),
        )
        .await
        .map_err(|_| CoreError::Timeout(SMOKE_TIMEOUT_MS))??;
        Ok(wire.text)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn invoke(&self, req: InvokeRequest<'_>) -> CoreResult<LlmResponse> {
        self.auth
            .ensure_smoke(ProviderKind::Anthropic, || self.smoke_probe())
            .await?;
        run_logged(ProviderKind::Anthropic, &self.interactions, &req, || {
            self.wire_call(req.model, req.prompt)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_deltas() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert_eq!(
            AnthropicProvider::parse_sse_event(data),
            Some(SseEvent::TextDelta("Hello".into()))
        );
    }

    #[test]
    fn ignores_non_text_deltas() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#;
        assert_eq!(AnthropicProvider::parse_sse_event(data), None);
    }

    #[test]
    fn extracts_usage_from_message_envelope() {
        let start = r#"{"type":"message_start","message":{"model":"claude-haiku-4-5","usage":{"input_tokens":42}}}"#;
        assert_eq!(
            AnthropicProvider::parse_sse_event(start),
            Some(SseEvent::InputTokens(42))
        );

        let delta = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":17}}"#;
        assert_eq!(
            AnthropicProvider::parse_sse_event(delta),
            Some(SseEvent::OutputTokens(17))
        );
    }

    #[test]
    fn ignores_pings_and_garbage() {
        assert_eq!(AnthropicProvider::parse_sse_event(r#"{"type":"ping"}"#), None);
        assert_eq!(AnthropicProvider::parse_sse_event("not json"), None);
    }
}
