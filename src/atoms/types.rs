// ── Hivecore Atoms: Core Types ─────────────────────────────────────────────
// Plain data types shared across the router, stores, and swarm executor.
// Everything here is serde-serializable; rows map 1:1 onto the SQLite
// schema in store/schema.rs and interactions/mod.rs.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Providers ──────────────────────────────────────────────────────────────

/// The two supported upstream providers. The router holds an enum-indexed
/// adapter table, so adding a provider means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Model metadata ─────────────────────────────────────────────────────────

/// Ordinal quality ranking, independent of capability. Ordering matters:
/// `best` selection compares tiers, so Cheap < Balanced < Best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Cheap,
    Balanced,
    Best,
}

/// An orthogonal tag describing what a model is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Coding,
    Reasoning,
    LongContext,
    Creative,
    Review,
    Classification,
    Extraction,
    SimpleReasoning,
    Multimodal,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Coding => "coding",
            Capability::Reasoning => "reasoning",
            Capability::LongContext => "long-context",
            Capability::Creative => "creative",
            Capability::Review => "review",
            Capability::Classification => "classification",
            Capability::Extraction => "extraction",
            Capability::SimpleReasoning => "simple-reasoning",
            Capability::Multimodal => "multimodal",
        }
    }

    /// Parse the kebab-case tag form used in task metadata.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coding" => Some(Capability::Coding),
            "reasoning" => Some(Capability::Reasoning),
            "long-context" => Some(Capability::LongContext),
            "creative" => Some(Capability::Creative),
            "review" => Some(Capability::Review),
            "classification" => Some(Capability::Classification),
            "extraction" => Some(Capability::Extraction),
            "simple-reasoning" => Some(Capability::SimpleReasoning),
            "multimodal" => Some(Capability::Multimodal),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-million-token USD pricing. Estimates only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Immutable, registry-resident description of one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub provider: ProviderKind,
    pub tier: Tier,
    pub capabilities: &'static [Capability],
    /// Small integer; lower is cheaper. Used for static `cheapest` selection.
    pub cost_tier: u8,
    pub default_timeout_ms: u64,
    pub max_context_tokens: u64,
    pub pricing: Pricing,
}

// ── Strategies ─────────────────────────────────────────────────────────────

/// High-level intent for model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Cheapest,
    Fastest,
    Best,
    Balanced,
    Specific,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Cheapest => "cheapest",
            Strategy::Fastest => "fastest",
            Strategy::Best => "best",
            Strategy::Balanced => "balanced",
            Strategy::Specific => "specific",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cheapest" => Some(Strategy::Cheapest),
            "fastest" => Some(Strategy::Fastest),
            "best" => Some(Strategy::Best),
            "balanced" => Some(Strategy::Balanced),
            "specific" => Some(Strategy::Specific),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Call records (interaction store rows) ──────────────────────────────────

/// One row per LLM invocation, append-only. `id` is assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    #[serde(default)]
    pub id: i64,
    /// ISO-8601 UTC.
    pub timestamp: String,
    pub provider: String,
    pub model: String,
    /// Free-form label identifying the call site.
    pub caller: String,
    pub prompt: String,
    pub response: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD estimate, never negative.
    pub cost_estimate: f64,
    pub duration_ms: u64,
    pub ok: bool,
    pub error: Option<String>,
}

/// Per-model aggregate over a recent window of call records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStats {
    pub model: String,
    pub call_count: u64,
    pub avg_latency_ms: f64,
    /// Fraction of calls with ok = true, in [0, 1].
    pub success_rate: f64,
    pub avg_cost: f64,
}

// ── LLM invocation surface ─────────────────────────────────────────────────

/// Options for a direct `run_llm` call.
#[derive(Debug, Clone, Default)]
pub struct LlmOptions {
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub caller: Option<String>,
    pub skip_log: bool,
}

/// Uniform provider return shape.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub text: String,
    pub provider: ProviderKind,
    pub duration_ms: u64,
}

/// Options for a strategy-routed `routed_llm` call.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub strategy: Option<Strategy>,
    pub capability: Option<Capability>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub caller: Option<String>,
    pub skip_log: bool,
}

/// `routed_llm` result: the uniform response plus the model the strategy
/// selector settled on.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedResponse {
    pub text: String,
    pub provider: ProviderKind,
    pub duration_ms: u64,
    pub resolved_model: String,
}

// ── Swarm tasks ────────────────────────────────────────────────────────────

/// Task state machine: pending → claimed → running → {done | failed}.
/// `reset` sends any non-terminal state back to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "claimed" => Some(TaskStatus::Claimed),
            "running" => Some(TaskStatus::Running),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a subtask runs inline (one router call) or is handed to a
/// longer-lived worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Inline,
    Agent,
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Inline => "inline",
            TaskMode::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(TaskMode::Inline),
            "agent" => Some(TaskMode::Agent),
            _ => None,
        }
    }
}

/// One unit of work in a swarm. Ids follow `<swarm_id>-task-<seq>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTask {
    pub id: String,
    pub swarm_id: String,
    /// 0-based insertion order within the swarm.
    pub seq: i64,
    pub description: String,
    pub prompt: String,
    pub status: TaskStatus,
    /// Worker that claimed this task, if any.
    pub agent_id: Option<String>,
    pub model: Option<String>,
    pub strategy: Option<String>,
    pub mode: TaskMode,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub claimed_at: Option<String>,
    pub completed_at: Option<String>,
    /// Opaque blob; well-known keys: depends_on, capability, subtask_index,
    /// notified.
    pub metadata: serde_json::Value,
}

impl SwarmTask {
    /// Parse `metadata.depends_on` into seq indices. Missing or malformed
    /// entries are skipped rather than failing the read path — validation
    /// happens at insertion time.
    pub fn depends_on(&self) -> Vec<i64> {
        self.metadata["depends_on"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default()
    }
}

/// Input row for `create_swarm`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub mode: Option<TaskMode>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Per-status counts for one swarm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwarmStatus {
    pub total: u64,
    pub pending: u64,
    pub claimed: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
}

// ── Message bus ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Data,
    Signal,
    Context,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Data => "data",
            MessageType::Signal => "signal",
            MessageType::Context => "context",
            MessageType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data" => Some(MessageType::Data),
            "signal" => Some(MessageType::Signal),
            "context" => Some(MessageType::Context),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted bus message. `id` is the monotonic insertion order — read
/// cursors compare against it, never against timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: i64,
    pub channel: String,
    pub sender: String,
    /// None = broadcast to every reader of the channel.
    pub recipient: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub payload: String,
    pub created_at: String,
    pub expires_at: Option<String>,
}

/// Filters for `read_messages`.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    /// When set, only broadcast messages and messages addressed to this
    /// agent are returned, and the agent's read cursor advances.
    pub agent_id: Option<String>,
    pub msg_type: Option<MessageType>,
    /// ISO-8601 lower bound on created_at (exclusive).
    pub since: Option<String>,
    /// Defaults to 50 when zero.
    pub limit: u32,
}

// ── Shared helpers ─────────────────────────────────────────────────────────

/// Current time as ISO-8601 UTC, the only timestamp format stored anywhere.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Truncate to at most `max` bytes without splitting a UTF-8 code point.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
