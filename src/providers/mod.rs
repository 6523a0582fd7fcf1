// ── Hivecore Providers ─────────────────────────────────────────────────────
// Per-provider request/response handling behind one uniform contract.
// The router dispatches through an enum-indexed table (ProviderSet), not a
// registration map: adding a provider means a new ProviderKind variant and
// a new adapter field.
//
// Common contract: every call — success or failure — is passed to the
// interaction store unless the caller set skip_log, and every outbound
// request runs under a client-side deadline.

pub mod anthropic;
pub mod openai;

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{now_rfc3339, CallRecord, LlmResponse, ProviderKind};
use crate::auth::AuthManager;
use crate::interactions::InteractionStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// One outbound LLM call.
#[derive(Debug, Clone)]
pub struct InvokeRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub timeout_ms: u64,
    pub caller: &'a str,
    pub skip_log: bool,
}

/// Raw provider result before logging: accumulated text plus token usage
/// as reported by the provider (or estimated from characters).
#[derive(Debug, Clone)]
pub(crate) struct WireResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Uniform adapter contract.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Make the call, log the outcome, return the uniform shape.
    async fn invoke(&self, req: InvokeRequest<'_>) -> CoreResult<LlmResponse>;
}

/// The enum-indexed adapter table held by the router.
pub struct ProviderSet {
    anthropic: anthropic::AnthropicProvider,
    openai: openai::OpenAiProvider,
}

impl ProviderSet {
    pub fn new(
        http: reqwest::Client,
        auth: Arc<AuthManager>,
        interactions: Arc<InteractionStore>,
    ) -> Self {
        ProviderSet {
            anthropic: anthropic::AnthropicProvider::new(
                http.clone(),
                Arc::clone(&auth),
                Arc::clone(&interactions),
            ),
            openai: openai::OpenAiProvider::new(http, auth, interactions),
        }
    }

    pub fn adapter(&self, kind: ProviderKind) -> &dyn ProviderAdapter {
        match kind {
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::OpenAi => &self.openai,
        }
    }
}

/// Shared invoke plumbing: run the wire call under a deadline, log the
/// outcome, convert to the uniform shape. Both adapters funnel through here.
pub(crate) async fn run_logged<F, Fut>(
    kind: ProviderKind,
    interactions: &InteractionStore,
    req: &InvokeRequest<'_>,
    wire_call: F,
) -> CoreResult<LlmResponse>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = CoreResult<WireResponse>>,
{
    let started = Instant::now();
    let outcome = match tokio::time::timeout(
        std::time::Duration::from_millis(req.timeout_ms),
        wire_call(),
    )
    .await
    {
        Ok(r) => r,
        // The in-flight request future is dropped here, aborting it.
        Err(_) => Err(CoreError::Timeout(req.timeout_ms)),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(wire) => {
            if !req.skip_log {
                interactions.log_call(CallRecord {
                    id: 0,
                    timestamp: now_rfc3339(),
                    provider: kind.as_str().into(),
                    model: req.model.into(),
                    caller: req.caller.into(),
                    prompt: req.prompt.into(),
                    response: wire.text.clone(),
                    input_tokens: wire.input_tokens,
                    output_tokens: wire.output_tokens,
                    cost_estimate: interactions.estimate_cost(
                        req.model,
                        wire.input_tokens,
                        wire.output_tokens,
                    ),
                    duration_ms,
                    ok: true,
                    error: None,
                });
            }
            Ok(LlmResponse {
                text: wire.text,
                provider: kind,
                duration_ms,
            })
        }
        Err(e) => {
            if !req.skip_log {
                interactions.log_call(CallRecord {
                    id: 0,
                    timestamp: now_rfc3339(),
                    provider: kind.as_str().into(),
                    model: req.model.into(),
                    caller: req.caller.into(),
                    prompt: req.prompt.into(),
                    response: String::new(),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_estimate: 0.0,
                    duration_ms,
                    ok: false,
                    error: Some(e.to_string()),
                });
            }
            Err(e)
        }
    }
}

/// The one-shot validation prompt. A provider answers this before its first
/// real call of the process.
pub(crate) const SMOKE_PROMPT: &str = "Reply with exactly AUTH_OK";

/// Short deadline for smoke probes — they carry no payload worth waiting on.
pub(crate) const SMOKE_TIMEOUT_MS: u64 = 15_000;
