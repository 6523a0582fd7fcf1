// ── Hivecore Router ────────────────────────────────────────────────────────
// Normalizes model identifiers, detects the owning provider, and dispatches
// to the matching adapter. Strategy-driven selection lives in strategy.rs.
//
// Module layout:
//   mod.rs      — alias table, provider detection, run_llm / routed_llm
//   strategy.rs — stats-driven resolve_model + router configuration

pub mod strategy;

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{
    LlmOptions, LlmResponse, ProviderKind, RouteOptions, RoutedResponse, Strategy,
};
use crate::interactions::InteractionStore;
use crate::providers::{InvokeRequest, ProviderSet};
use crate::registry;
use log::info;
use std::sync::Arc;
use std::time::Instant;

/// Map user-facing shorthands and retired names to current API names.
/// Provider-prefix forms are stripped before this table is consulted.
const ALIASES: &[(&str, &str)] = &[
    ("opus-4", "claude-opus-4-5"),
    ("sonnet-4", "claude-sonnet-4-5"),
    ("haiku-4", "claude-haiku-4-5"),
    ("opus-3", "claude-opus-4"),
    ("sonnet-3", "claude-sonnet-3-5"),
    // Unsuffixed current-generation names keep working.
    ("claude-sonnet-4", "claude-sonnet-4-5"),
    ("claude-haiku-4", "claude-haiku-4-5"),
    ("gpt-4o", "gpt-4o"),
    ("gpt-4", "gpt-4-turbo"),
    ("gpt-3.5", "gpt-3.5-turbo"),
    ("codex", "gpt-5.3-codex"),
];

/// Strip any provider prefix, then resolve aliases to the canonical name.
pub fn normalize_model(model: &str) -> String {
    let stripped = model
        .strip_prefix("anthropic/")
        .or_else(|| model.strip_prefix("openai-codex/"))
        .or_else(|| model.strip_prefix("openai/"))
        .unwrap_or(model);
    for (alias, canonical) in ALIASES {
        if *alias == stripped {
            return canonical.to_string();
        }
    }
    stripped.to_string()
}

/// Detect which provider owns a canonical model name.
pub fn detect_provider(model: &str) -> CoreResult<ProviderKind> {
    if model.contains("claude") {
        return Ok(ProviderKind::Anthropic);
    }
    if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
        return Ok(ProviderKind::OpenAi);
    }
    Err(CoreError::UnknownProvider(model.to_string()))
}

pub struct Router {
    providers: ProviderSet,
    interactions: Arc<InteractionStore>,
    config: parking_lot::RwLock<strategy::RouterConfig>,
}

impl Router {
    pub fn new(providers: ProviderSet, interactions: Arc<InteractionStore>) -> Self {
        Router {
            providers,
            interactions,
            config: parking_lot::RwLock::new(strategy::RouterConfig::default()),
        }
    }

    /// Direct invocation: caller names the model (alias forms accepted).
    pub async fn run_llm(&self, prompt: &str, opts: &LlmOptions) -> CoreResult<LlmResponse> {
        let raw = opts
            .model
            .as_deref()
            .ok_or_else(|| CoreError::InvalidArgument("run_llm requires a model".into()))?;
        let model = normalize_model(raw);
        let kind = detect_provider(&model)?;
        let timeout_ms = opts
            .timeout_ms
            .or_else(|| registry::info(&model).map(|d| d.default_timeout_ms))
            .unwrap_or(120_000);

        info!("[router] {} → {} ({})", raw, model, kind);

        // Duration is measured here as well as inside the adapter; the
        // outer measurement wins in the returned shape.
        let started = Instant::now();
        let mut response = self
            .providers
            .adapter(kind)
            .invoke(InvokeRequest {
                model: &model,
                prompt,
                timeout_ms,
                caller: opts.caller.as_deref().unwrap_or("unknown"),
                skip_log: opts.skip_log,
            })
            .await?;
        response.duration_ms = started.elapsed().as_millis() as u64;
        Ok(response)
    }

    /// Convenience: force an Anthropic model (default sonnet).
    pub async fn run_claude(&self, prompt: &str, opts: &LlmOptions) -> CoreResult<LlmResponse> {
        let mut opts = opts.clone();
        opts.model = Some(
            opts.model
                .as_deref()
                .map(normalize_model)
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
        );
        self.run_llm(prompt, &opts).await
    }

    /// Convenience: force an OpenAI model (default gpt-4o).
    pub async fn run_openai(&self, prompt: &str, opts: &LlmOptions) -> CoreResult<LlmResponse> {
        let mut opts = opts.clone();
        opts.model = Some(
            opts.model
                .as_deref()
                .map(normalize_model)
                .unwrap_or_else(|| "gpt-4o".to_string()),
        );
        self.run_llm(prompt, &opts).await
    }

    /// Strategy-routed invocation: resolve a model, apply its default
    /// timeout when the caller supplied none, and attach the resolution.
    pub async fn routed_llm(&self, prompt: &str, opts: &RouteOptions) -> CoreResult<RoutedResponse> {
        let resolved =
            self.resolve_model(opts.strategy, opts.capability, opts.model.as_deref())?;
        let timeout_ms = opts
            .timeout_ms
            .or_else(|| registry::info(&resolved).map(|d| d.default_timeout_ms));

        let response = self
            .run_llm(
                prompt,
                &LlmOptions {
                    model: Some(resolved.clone()),
                    timeout_ms,
                    caller: opts.caller.clone(),
                    skip_log: opts.skip_log,
                },
            )
            .await?;
        Ok(RoutedResponse {
            text: response.text,
            provider: response.provider,
            duration_ms: response.duration_ms,
            resolved_model: resolved,
        })
    }

    /// Strategy resolution. Never fails for non-specific strategies: hard
    /// fallbacks guarantee a model name. With no strategy, an explicit
    /// model wins; otherwise balanced resolution runs.
    pub fn resolve_model(
        &self,
        strategy: Option<Strategy>,
        capability: Option<crate::atoms::types::Capability>,
        model: Option<&str>,
    ) -> CoreResult<String> {
        let config = self.config.read().clone();
        strategy::resolve(&config, &self.interactions, strategy, capability, model)
    }

    /// Apply overrides to the live routing configuration.
    pub fn configure(&self, overrides: strategy::RouterOverrides) {
        self.config.write().apply(overrides);
    }

    /// The published defaults, as an immutable snapshot.
    pub fn defaults(&self) -> strategy::RouterConfig {
        strategy::RouterConfig::default()
    }

    /// The live configuration, as a snapshot.
    pub fn current_config(&self) -> strategy::RouterConfig {
        self.config.read().clone()
    }
}
