// ── Hivecore Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the core, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (auth, provider, routing, swarm…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • No variant carries secret material (API keys, tokens) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CoreError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No credentials file, or no entry for the provider. Message includes
    /// what the operator should run to fix it.
    #[error("Auth missing: {0}")]
    AuthMissing(String),

    /// The OAuth refresh HTTP call failed or returned a malformed response.
    #[error("Auth refresh failed: {0}")]
    AuthRefreshFailed(String),

    /// The one-time provider validation call returned an unexpected payload.
    #[error("Smoke test failed for {provider}: {message}")]
    SmokeTestFailed { provider: String, message: String },

    /// Non-2xx from a provider API. `body` is a bounded snippet, never the
    /// full response.
    #[error("Provider HTTP {status}: {body}")]
    ProviderHttp { status: u16, body: String },

    /// Client-side deadline exceeded on an outbound call.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Model name did not resolve to any known provider.
    #[error("Unknown provider for model '{0}'")]
    UnknownProvider(String),

    /// LLM output could not be parsed into a valid subtask array.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// Operation referenced a task id that does not exist.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The executor detected a dependency cycle the decomposer let through.
    #[error("Unresolvable dependency cycle in swarm {0}")]
    UnresolvableCycle(String),

    /// Caller-supplied arguments were invalid (bad message type, empty
    /// channel, …).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All core operations return this type.
pub type CoreResult<T> = Result<T, CoreError>;

// ── Conversion: CoreError → String ─────────────────────────────────────────
// Lets embedding hosts with string error boundaries convert directly.

impl From<CoreError> for String {
    fn from(e: CoreError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_http_display_includes_status() {
        let e = CoreError::ProviderHttp {
            status: 503,
            body: "overloaded".into(),
        };
        let s = e.to_string();
        assert!(s.contains("503"));
        assert!(s.contains("overloaded"));
    }

    #[test]
    fn timeout_display_matches_transient_pattern() {
        // The executor classifies transient errors by message; the Timeout
        // variant's Display must contain the word "timeout".
        let e = CoreError::Timeout(30_000);
        assert!(e.to_string().contains("timeout"));
    }
}
