// ── Hivecore Providers: OpenAI ─────────────────────────────────────────────
// Plain (non-streaming) `POST /v1/chat/completions`. Auth comes from the
// OAuth entry in the shared auth file, auto-refreshed by the AuthManager.
// Token counts from the usage block, falling back to character estimates.

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{truncate_utf8, LlmResponse, ProviderKind};
use crate::auth::AuthManager;
use crate::interactions::{estimate_tokens_from_chars, InteractionStore};
use crate::providers::{
    run_logged, InvokeRequest, ProviderAdapter, WireResponse, SMOKE_PROMPT, SMOKE_TIMEOUT_MS,
};
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    auth: Arc<AuthManager>,
    interactions: Arc<InteractionStore>,
}

impl OpenAiProvider {
    pub fn new(client: Client, auth: Arc<AuthManager>, interactions: Arc<InteractionStore>) -> Self {
        OpenAiProvider {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth,
            interactions,
        }
    }

    /// Pull text + usage out of a chat-completions response body.
    fn parse_completion(v: &Value) -> CoreResult<(String, Option<u64>, Option<u64>)> {
        let text = v["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| {
                CoreError::Other("chat completion had no choices[0].message.content".into())
            })?
            .to_string();
        let input = v["usage"]["prompt_tokens"].as_u64();
        let output = v["usage"]["completion_tokens"].as_u64();
        Ok((text, input, output))
    }

    async fn wire_call(&self, model: &str, prompt: &str) -> CoreResult<WireResponse> {
        let token = self.auth.openai_access_token().await?;
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
        });

        info!("[provider] openai request model={}", model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body_text = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(CoreError::ProviderHttp {
                status,
                body: truncate_utf8(&body_text, 500).to_string(),
            });
        }

        let parsed: Value = serde_json::from_str(&body_text)?;
        let (text, input, output) = Self::parse_completion(&parsed)?;
        Ok(WireResponse {
            input_tokens: input.unwrap_or_else(|| estimate_tokens_from_chars(prompt)),
            output_tokens: output.unwrap_or_else(|| estimate_tokens_from_chars(&text)),
            text,
        })
    }

    async fn smoke_probe(&self) -> CoreResult<String> {
        let wire = tokio::time::timeout(
            std::time::Duration::from_millis(SMOKE_TIMEOUT_MS),
            self.wire_call("gpt-4o", SMOKE_PROMPT),
        )
        .await
        .map_err(|_| CoreError::Timeout(SMOKE_TIMEOUT_MS))??;
        Ok(wire.text)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn invoke(&self, req: InvokeRequest<'_>) -> CoreResult<LlmResponse> {
        self.auth
            .ensure_smoke(ProviderKind::OpenAi, || self.smoke_probe())
            .await?;
        run_logged(ProviderKind::OpenAi, &self.interactions, &req, || {
            self.wire_call(req.model, req.prompt)
        })
        .await
    }
}
