//! # hivecore
//!
//! Process-local AI agent orchestration core: a multi-provider LLM router
//! with strategy-driven model selection, a persisted swarm task queue with
//! atomic claims and dependency gating, a parallel decompose/execute
//! pipeline, and an agent message bus with per-agent read cursors.
//!
//! Everything hangs off one [`Core`] value:
//!
//! ```no_run
//! use hivecore::{Core, CoreConfig, RouteOptions, Strategy};
//!
//! # async fn demo() -> hivecore::CoreResult<()> {
//! let core = Core::init(CoreConfig::default_paths()).await?;
//!
//! let answer = core
//!     .routed_llm(
//!         "Summarize the findings",
//!         &RouteOptions { strategy: Some(Strategy::Balanced), ..Default::default() },
//!     )
//!     .await?;
//! println!("{} answered: {}", answer.resolved_model, answer.text);
//!
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Out of scope by design: process spawning, notification delivery, cron
//! scheduling, UI. Shells provide those and talk to the core through the
//! router, the task rows, and the message bus.

pub mod atoms;
pub mod auth;
pub mod core;
pub mod interactions;
pub mod providers;
pub mod registry;
pub mod router;
pub mod store;
pub mod swarm;

// ── Library surface ────────────────────────────────────────────────────────

pub use atoms::error::{CoreError, CoreResult};
pub use atoms::types::{
    BusMessage, CallRecord, Capability, LlmOptions, LlmResponse, MessageType, ModelDescriptor,
    ModelStats, Pricing, ProviderKind, ReadFilter, RouteOptions, RoutedResponse, Strategy,
    SwarmStatus, SwarmTask, TaskMode, TaskSpec, TaskStatus, Tier,
};
pub use crate::core::{Core, CoreConfig};
pub use router::strategy::{RouterConfig, RouterOverrides, StrategyFallbacks};
pub use store::NewMessage;
pub use swarm::decompose::SubtaskSpec;
pub use swarm::events::TaskEvent;
pub use swarm::executor::{ExecuteOptions, ExecutionReport, SubtaskRunner};
