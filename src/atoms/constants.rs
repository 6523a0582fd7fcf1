// ── Hivecore Atoms: Constants ──────────────────────────────────────────────
// Shared limits and markers. Tunables that callers may override live in the
// config structs instead (RouterConfig, ExecuteOptions).

/// Maximum stored length of a prompt or response in the call log, in chars.
pub const CALL_TEXT_MAX_CHARS: usize = 10_000;

/// Appended when a stored prompt/response was cut at CALL_TEXT_MAX_CHARS.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Replacement for redacted secret material in stored text.
pub const REDACTED_MARKER: &str = "[REDACTED]";

/// Bounded interaction-writer queue; overflow drops the oldest record.
pub const CALL_LOG_QUEUE_CAP: usize = 256;

/// Per-dependency result budget when building a subtask context prefix.
pub const DEP_CONTEXT_MAX_CHARS: usize = 1_000;

/// Total context-prefix budget for one subtask prompt.
pub const TOTAL_CONTEXT_MAX_CHARS: usize = 4_000;

/// Default extra attempts for transient subtask errors.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base backoff in milliseconds; attempt n waits BASE << n.
pub const RETRY_BACKOFF_BASE_MS: u64 = 1_000;

/// Claimed/running tasks older than this are considered stale.
pub const DEFAULT_STALE_MINUTES: i64 = 15;

/// Fully-terminal swarms older than this are eligible for cleanup.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Signal broadcasts expire after this many minutes.
pub const SIGNAL_TTL_MINUTES: i64 = 60;

/// Shared context entries expire after this many minutes.
pub const CONTEXT_TTL_MINUTES: i64 = 120;

/// Default page size for `read_messages`.
pub const DEFAULT_READ_LIMIT: u32 = 50;

/// Environment variable that disables provider smoke tests.
pub const SKIP_SMOKE_TEST_ENV: &str = "SKIP_SMOKE_TEST";

/// Environment variable consulted before the auth file for Anthropic calls.
pub const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";
