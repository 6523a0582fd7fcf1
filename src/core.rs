// ── Hivecore Core ──────────────────────────────────────────────────────────
// The process-wide context. Everything the subsystems used to reach through
// module singletons — store handles, the smoke-test flags, the refresh
// lock, the hook registry — lives on one Core value, so tests can run
// isolated instances against temporary storage paths.

use crate::atoms::error::CoreResult;
use crate::atoms::types::{
    BusMessage, Capability, LlmOptions, LlmResponse, MessageType, ModelStats, Pricing,
    ReadFilter, RouteOptions, RoutedResponse, Strategy, SwarmStatus, SwarmTask, TaskSpec,
};
use crate::auth::AuthManager;
use crate::interactions::InteractionStore;
use crate::providers::ProviderSet;
use crate::router::{strategy::RouterConfig, strategy::RouterOverrides, Router};
use crate::store::{NewMessage, SwarmStore};
use crate::swarm::decompose::{build_decompose_prompt, parse_subtasks, SubtaskSpec};
use crate::swarm::events::{HookRegistry, TaskEvent};
use crate::swarm::executor::{self, ExecuteOptions, ExecutionReport, SubtaskRunner};
use async_trait::async_trait;
use log::info;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Storage and auth locations for one Core instance.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/llm_calls.db`.
    pub llm_db_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/swarm.db`.
    pub swarm_db_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/auth.json`.
    pub auth_path: Option<PathBuf>,
    pub skip_smoke_test: bool,
}

impl CoreConfig {
    /// Per-user default locations.
    pub fn default_paths() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hivecore");
        CoreConfig::at(base)
    }

    /// Everything under one directory — what tests use with a tempdir.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        CoreConfig {
            data_dir: data_dir.into(),
            llm_db_path: None,
            swarm_db_path: None,
            auth_path: None,
            skip_smoke_test: false,
        }
    }
}

/// The orchestration core. Safe to share behind an Arc and invoke
/// concurrently between `init` and `shutdown`.
pub struct Core {
    interactions: Arc<InteractionStore>,
    store: Arc<SwarmStore>,
    router: Router,
    hooks: HookRegistry,
    auth: Arc<AuthManager>,
}

impl Core {
    /// Open both stores (running schema migrations), spawn the call-log
    /// writer, and wire the provider adapters. Must run inside a tokio
    /// runtime.
    pub async fn init(config: CoreConfig) -> CoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let llm_db = config
            .llm_db_path
            .unwrap_or_else(|| config.data_dir.join("llm_calls.db"));
        let swarm_db = config
            .swarm_db_path
            .unwrap_or_else(|| config.data_dir.join("swarm.db"));
        let auth_path = config
            .auth_path
            .unwrap_or_else(|| config.data_dir.join("auth.json"));

        let interactions = Arc::new(InteractionStore::open(&llm_db)?);
        interactions.start_writer();
        let store = Arc::new(SwarmStore::open(&swarm_db)?);

        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let auth = Arc::new(AuthManager::new(auth_path, http.clone(), config.skip_smoke_test));
        let providers = ProviderSet::new(http, Arc::clone(&auth), Arc::clone(&interactions));
        let router = Router::new(providers, Arc::clone(&interactions));

        info!("[core] Initialized (llm log {:?}, swarm store {:?})", llm_db, swarm_db);
        Ok(Core {
            interactions,
            store,
            router,
            hooks: HookRegistry::new(),
            auth,
        })
    }

    /// Flush the call-log writer and stop it. The stores close when the
    /// Core is dropped.
    pub async fn shutdown(&self) {
        self.interactions.shutdown().await;
        info!("[core] Shut down");
    }

    // ── LLM surface ────────────────────────────────────────────────────────

    pub async fn run_llm(&self, prompt: &str, opts: &LlmOptions) -> CoreResult<LlmResponse> {
        self.router.run_llm(prompt, opts).await
    }

    pub async fn run_claude(&self, prompt: &str, opts: &LlmOptions) -> CoreResult<LlmResponse> {
        self.router.run_claude(prompt, opts).await
    }

    pub async fn run_openai(&self, prompt: &str, opts: &LlmOptions) -> CoreResult<LlmResponse> {
        self.router.run_openai(prompt, opts).await
    }

    pub async fn routed_llm(&self, prompt: &str, opts: &RouteOptions) -> CoreResult<RoutedResponse> {
        self.router.routed_llm(prompt, opts).await
    }

    pub fn resolve_model(
        &self,
        strategy: Option<Strategy>,
        capability: Option<Capability>,
        model: Option<&str>,
    ) -> CoreResult<String> {
        self.router.resolve_model(strategy, capability, model)
    }

    /// Per-model aggregates over the configured stats window.
    pub fn get_model_stats(&self) -> CoreResult<Vec<ModelStats>> {
        let config = self.router.current_config();
        self.interactions
            .model_stats(config.stats_hours_back, config.min_sample_size)
    }

    pub fn configure_router(&self, overrides: RouterOverrides) {
        self.router.configure(overrides);
    }

    /// The published defaults table, as an immutable snapshot.
    pub fn router_defaults(&self) -> RouterConfig {
        self.router.defaults()
    }

    pub fn configure_pricing(&self, model: &str, pricing: Pricing) {
        self.interactions.configure_pricing(model, pricing);
    }

    /// Call records evicted because the log queue was full.
    pub fn dropped_call_records(&self) -> u64 {
        self.interactions.dropped_records()
    }

    /// Read-only access to the call log for analytical queries.
    pub fn interactions(&self) -> &InteractionStore {
        &self.interactions
    }

    /// The auth manager (refresh counters, auth-file path).
    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    // ── Swarm task surface ─────────────────────────────────────────────────

    pub fn create_swarm(
        &self,
        swarm_id: Option<String>,
        tasks: &[TaskSpec],
    ) -> CoreResult<(String, Vec<String>)> {
        self.store.create_swarm(swarm_id, tasks)
    }

    pub fn claim_task(
        &self,
        swarm_id: &str,
        agent_id: &str,
        check_deps: bool,
    ) -> CoreResult<Option<SwarmTask>> {
        let claimed = self.store.claim_task(swarm_id, agent_id, check_deps)?;
        if let Some(task) = &claimed {
            self.hooks.emit(&TaskEvent::Claimed(task.clone()));
        }
        Ok(claimed)
    }

    pub fn mark_running(&self, task_id: &str) -> CoreResult<SwarmTask> {
        self.store.mark_running(task_id)
    }

    pub fn complete_task(&self, task_id: &str, result: &str) -> CoreResult<SwarmTask> {
        let task = self.store.complete_task(task_id, result)?;
        self.hooks.emit(&TaskEvent::Completed(task.clone()));
        Ok(task)
    }

    pub fn fail_task(&self, task_id: &str, error: &str) -> CoreResult<SwarmTask> {
        let task = self.store.fail_task(task_id, error)?;
        self.hooks.emit(&TaskEvent::Failed(task.clone()));
        Ok(task)
    }

    pub fn reset_task(&self, task_id: &str) -> CoreResult<SwarmTask> {
        let task = self.store.reset_task(task_id)?;
        self.hooks.emit(&TaskEvent::Reset(task.clone()));
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> CoreResult<SwarmTask> {
        self.store.get_task(task_id)
    }

    pub fn get_swarm_status(&self, swarm_id: &str) -> CoreResult<SwarmStatus> {
        self.store.get_swarm_status(swarm_id)
    }

    pub fn get_swarm_results(&self, swarm_id: &str) -> CoreResult<Vec<SwarmTask>> {
        self.store.get_swarm_results(swarm_id)
    }

    pub fn is_swarm_complete(&self, swarm_id: &str) -> CoreResult<bool> {
        self.store.is_swarm_complete(swarm_id)
    }

    pub fn get_stale_tasks(&self, stale_minutes: i64) -> CoreResult<Vec<SwarmTask>> {
        self.store.get_stale_tasks(stale_minutes)
    }

    pub fn clean_completed_swarms(&self, retention_days: i64) -> CoreResult<u64> {
        self.store.clean_completed_swarms(retention_days)
    }

    /// Subscribe to every task lifecycle transition.
    pub fn on_task_event<F>(&self, hook: F)
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.hooks.subscribe(hook);
    }

    // ── Message bus surface ────────────────────────────────────────────────

    pub fn post_message(&self, message: &NewMessage) -> CoreResult<i64> {
        self.store.post_message(message)
    }

    pub fn read_messages(&self, channel: &str, filter: &ReadFilter) -> CoreResult<Vec<BusMessage>> {
        self.store.read_messages(channel, filter)
    }

    pub fn send_direct(
        &self,
        sender: &str,
        recipient: &str,
        payload: Value,
        msg_type: MessageType,
        ttl_minutes: Option<i64>,
    ) -> CoreResult<i64> {
        self.store
            .send_direct(sender, recipient, payload, msg_type, ttl_minutes)
    }

    pub fn read_direct(
        &self,
        agent_id: &str,
        from_agent: Option<&str>,
        filter: &ReadFilter,
    ) -> CoreResult<Vec<BusMessage>> {
        self.store.read_direct(agent_id, from_agent, filter)
    }

    pub fn broadcast_signal(
        &self,
        channel: &str,
        sender: &str,
        signal: &str,
        data: Option<Value>,
    ) -> CoreResult<i64> {
        self.store.broadcast_signal(channel, sender, signal, data)
    }

    pub fn share_context(
        &self,
        channel: &str,
        sender: &str,
        key: &str,
        value: Value,
    ) -> CoreResult<i64> {
        self.store.share_context(channel, sender, key, value)
    }

    pub fn get_context(&self, channel: &str, key: &str) -> CoreResult<Option<Value>> {
        self.store.get_context(channel, key)
    }

    pub fn clean_expired(&self) -> CoreResult<u64> {
        self.store.clean_expired()
    }

    // ── Decompose & execute surface ────────────────────────────────────────

    /// Decompose a task into validated subtasks without enqueueing them.
    pub async fn decompose(
        &self,
        task_description: &str,
        opts: &ExecuteOptions,
    ) -> CoreResult<Vec<SubtaskSpec>> {
        let prompt = build_decompose_prompt(task_description, opts.decompose_prompt.as_deref());
        let raw = self
            .router
            .run_subtask(&prompt, Strategy::Balanced, Some(Capability::Reasoning), &opts.caller)
            .await?;
        parse_subtasks(&raw)
    }

    /// Decompose and persist the subtasks as a pending swarm.
    pub async fn decompose_and_queue(
        &self,
        task_description: &str,
        opts: &ExecuteOptions,
    ) -> CoreResult<(String, Vec<String>, Vec<SubtaskSpec>)> {
        executor::decompose_and_queue(&self.store, &self.router, task_description, opts).await
    }

    /// Decompose, execute level by level, synthesize.
    pub async fn execute_decomposed(
        &self,
        task_description: &str,
        opts: &ExecuteOptions,
    ) -> CoreResult<ExecutionReport> {
        executor::execute_decomposed(&self.store, &self.hooks, &self.router, task_description, opts)
            .await
    }
}

/// The production runner: subtask prompts go through the strategy router.
#[async_trait]
impl SubtaskRunner for Router {
    async fn run_subtask(
        &self,
        prompt: &str,
        strategy: Strategy,
        capability: Option<Capability>,
        caller: &str,
    ) -> CoreResult<String> {
        let response = self
            .routed_llm(
                prompt,
                &RouteOptions {
                    strategy: Some(strategy),
                    capability,
                    caller: Some(caller.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(response.text)
    }
}
