// Parallel level execution — walks a decomposed swarm level by level,
// feeding each subtask a bounded context built from its dependencies'
// results, retrying transient provider errors with exponential backoff,
// and synthesizing a final answer from the per-subtask results.

use crate::atoms::constants::{
    DEFAULT_MAX_RETRIES, DEP_CONTEXT_MAX_CHARS, RETRY_BACKOFF_BASE_MS, TOTAL_CONTEXT_MAX_CHARS,
};
use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{Capability, Strategy, TaskSpec};
use crate::store::SwarmStore;
use crate::swarm::decompose::{build_decompose_prompt, parse_subtasks, SubtaskSpec};
use crate::swarm::events::{HookRegistry, TaskEvent};
use async_trait::async_trait;
use log::{info, warn};
use regex::Regex;
use std::sync::LazyLock;

/// Error messages matching this are worth retrying.
static TRANSIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(timeout|ETIMEDOUT|rate.?limit|429|503|ECONNRESET)")
        .expect("transient pattern")
});

/// The executor's seam to the LLM router. Production wires this to
/// `routed_llm`; tests script it.
#[async_trait]
pub trait SubtaskRunner: Send + Sync {
    async fn run_subtask(
        &self,
        prompt: &str,
        strategy: Strategy,
        capability: Option<Capability>,
        caller: &str,
    ) -> CoreResult<String>;
}

/// Tunables for one `execute_decomposed` run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub swarm_id: Option<String>,
    pub default_strategy: Option<Strategy>,
    pub caller: String,
    pub synthesize: bool,
    /// `{{results}}` is replaced with the concatenated subtask results.
    pub synthesis_prompt: Option<String>,
    pub decompose_prompt: Option<String>,
    /// Extra attempts for transient errors.
    pub max_retries: u32,
    pub dep_context_max_chars: usize,
    pub max_context_chars: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            swarm_id: None,
            default_strategy: None,
            caller: "executor".into(),
            synthesize: true,
            synthesis_prompt: None,
            decompose_prompt: None,
            max_retries: DEFAULT_MAX_RETRIES,
            dep_context_max_chars: DEP_CONTEXT_MAX_CHARS,
            max_context_chars: TOTAL_CONTEXT_MAX_CHARS,
        }
    }
}

/// The outcome of one decomposed execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub swarm_id: String,
    pub success: bool,
    /// Indexed by subtask; None where the subtask failed.
    pub results: Vec<Option<String>>,
    /// Indexed by subtask; None where the subtask succeeded.
    pub errors: Vec<Option<String>>,
    pub synthesis: Option<String>,
}

/// True when the error message matches the transient family.
pub fn is_transient_error(message: &str) -> bool {
    TRANSIENT.is_match(message)
}

/// Backoff before retry `attempt` (0-based): 1000·2^attempt ms.
pub fn backoff_ms(attempt: u32) -> u64 {
    RETRY_BACKOFF_BASE_MS << attempt
}

/// Assign topological levels. Returns (levels, unresolved): tasks left in
/// `unresolved` sit on a dependency cycle. The decomposer already rejects
/// cycles; this is the second line of defense.
pub fn compute_levels(subtasks: &[SubtaskSpec]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut level_of: Vec<Option<usize>> = vec![None; subtasks.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();

    loop {
        let mut current = Vec::new();
        for (i, subtask) in subtasks.iter().enumerate() {
            if level_of[i].is_some() {
                continue;
            }
            let ready = subtask
                .depends_on
                .iter()
                .all(|d| level_of.get(*d).copied().flatten().is_some());
            if ready {
                current.push(i);
            }
        }
        if current.is_empty() {
            break;
        }
        for &i in &current {
            level_of[i] = Some(levels.len());
        }
        levels.push(current);
    }

    let unresolved = (0..subtasks.len())
        .filter(|i| level_of[*i].is_none())
        .collect();
    (levels, unresolved)
}

/// Build the bounded context prefix for a subtask from its dependencies'
/// results.
fn build_context_prefix(
    subtask: &SubtaskSpec,
    all: &[SubtaskSpec],
    results: &[Option<String>],
    dep_cap: usize,
    total_cap: usize,
) -> String {
    let mut prefix = String::new();
    for &dep in &subtask.depends_on {
        if let Some(Some(result)) = results.get(dep) {
            let clipped = clip(result, dep_cap);
            prefix.push_str(&format!("[{}]:\n{}\n\n", all[dep].description, clipped));
        }
    }
    clip(&prefix, total_cap)
}

/// Char-bounded clip with a suffix marker.
fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...(truncated)", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Decompose a task, enqueue the subtasks as a swarm, and return both.
pub async fn decompose_and_queue(
    store: &SwarmStore,
    runner: &dyn SubtaskRunner,
    task_description: &str,
    opts: &ExecuteOptions,
) -> CoreResult<(String, Vec<String>, Vec<SubtaskSpec>)> {
    let prompt = build_decompose_prompt(task_description, opts.decompose_prompt.as_deref());
    let raw = runner
        .run_subtask(&prompt, Strategy::Balanced, Some(Capability::Reasoning), &opts.caller)
        .await?;
    let subtasks = parse_subtasks(&raw)?;
    info!(
        "[swarm] Decomposed into {} subtasks: {:?}",
        subtasks.len(),
        subtasks.iter().map(|s| s.description.as_str()).collect::<Vec<_>>()
    );

    let specs: Vec<TaskSpec> = subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| TaskSpec {
            description: s.description.clone(),
            prompt: s.description.clone(),
            model: None,
            strategy: s.strategy.map(|st| st.as_str().to_string()),
            mode: Some(s.mode),
            metadata: Some(serde_json::json!({
                "depends_on": s.depends_on,
                "capability": s.capability.as_str(),
                "subtask_index": i,
            })),
        })
        .collect();

    let (swarm_id, task_ids) = store.create_swarm(opts.swarm_id.clone(), &specs)?;
    Ok((swarm_id, task_ids, subtasks))
}

/// Decompose, enqueue, execute level by level, synthesize.
pub async fn execute_decomposed(
    store: &SwarmStore,
    hooks: &HookRegistry,
    runner: &dyn SubtaskRunner,
    task_description: &str,
    opts: &ExecuteOptions,
) -> CoreResult<ExecutionReport> {
    let (swarm_id, task_ids, subtasks) =
        decompose_and_queue(store, runner, task_description, opts).await?;

    let mut results: Vec<Option<String>> = vec![None; subtasks.len()];
    let mut errors: Vec<Option<String>> = vec![None; subtasks.len()];

    let (levels, unresolved) = compute_levels(&subtasks);
    if !unresolved.is_empty() {
        warn!(
            "[swarm] {} subtasks sit on a dependency cycle in {}",
            unresolved.len(),
            swarm_id
        );
        for &i in &unresolved {
            let reason = CoreError::UnresolvableCycle(swarm_id.clone()).to_string();
            if let Ok(task) = store.fail_task(&task_ids[i], &reason) {
                hooks.emit(&TaskEvent::Failed(task));
            }
            errors[i] = Some(reason);
        }
    }

    for level in &levels {
        // One future per subtask; the whole level completes before the
        // next begins.
        let futures: Vec<_> = level
            .iter()
            .map(|&i| {
                run_subtask_with_retries(
                    store, hooks, runner, &task_ids, &subtasks, &results, &errors, i, opts,
                )
            })
            .collect();
        let outcomes = futures::future::join_all(futures).await;
        for (i, outcome) in outcomes {
            match outcome {
                Ok(text) => results[i] = Some(text),
                Err(msg) => errors[i] = Some(msg),
            }
        }
    }

    let success = errors.iter().all(|e| e.is_none());
    let synthesis = if opts.synthesize && results.iter().any(|r| r.is_some()) {
        Some(synthesize(runner, &subtasks, &results, opts).await)
    } else {
        None
    };

    Ok(ExecutionReport { swarm_id, success, results, errors, synthesis })
}

/// Run one subtask: dependency short-circuit, claim, retry loop, terminal
/// transition. Returns (index, result-or-error-message).
#[allow(clippy::too_many_arguments)]
async fn run_subtask_with_retries(
    store: &SwarmStore,
    hooks: &HookRegistry,
    runner: &dyn SubtaskRunner,
    task_ids: &[String],
    subtasks: &[SubtaskSpec],
    results: &[Option<String>],
    errors: &[Option<String>],
    index: usize,
    opts: &ExecuteOptions,
) -> (usize, Result<String, String>) {
    let subtask = &subtasks[index];
    let task_id = &task_ids[index];

    // A failed dependency poisons its dependents but not its siblings.
    if let Some(&failed_dep) = subtask
        .depends_on
        .iter()
        .find(|d| errors.get(**d).map(|e| e.is_some()).unwrap_or(false))
    {
        let msg = format!("Dependency subtask {} failed", failed_dep);
        if let Ok(task) = store.fail_task(task_id, &msg) {
            hooks.emit(&TaskEvent::Failed(task));
        }
        return (index, Err(msg));
    }

    let prefix = build_context_prefix(
        subtask,
        subtasks,
        results,
        opts.dep_context_max_chars,
        opts.max_context_chars,
    );
    let prompt = if prefix.is_empty() {
        subtask.description.clone()
    } else {
        format!("{}Now: {}", prefix, subtask.description)
    };

    match store.claim_specific(task_id, &format!("decomposer-{}", index)) {
        Ok(Some(task)) => hooks.emit(&TaskEvent::Claimed(task)),
        Ok(None) => {
            let msg = format!("task {} already claimed", task_id);
            return (index, Err(msg));
        }
        Err(e) => return (index, Err(e.to_string())),
    }
    if let Err(e) = store.mark_running(task_id) {
        return (index, Err(e.to_string()));
    }

    let strategy = subtask
        .strategy
        .or(opts.default_strategy)
        .unwrap_or(Strategy::Balanced);

    let mut attempt = 0u32;
    loop {
        match runner
            .run_subtask(&prompt, strategy, Some(subtask.capability), &opts.caller)
            .await
        {
            Ok(text) => {
                match store.complete_task(task_id, &text) {
                    Ok(task) => hooks.emit(&TaskEvent::Completed(task)),
                    Err(e) => warn!("[swarm] complete_task {} failed: {}", task_id, e),
                }
                return (index, Ok(text));
            }
            Err(e) => {
                let msg = e.to_string();
                if attempt < opts.max_retries && is_transient_error(&msg) {
                    let delay = backoff_ms(attempt);
                    warn!(
                        "[swarm] subtask {} transient error (attempt {}): {} — retrying in {}ms",
                        index,
                        attempt + 1,
                        msg,
                        delay
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                    continue;
                }
                match store.fail_task(task_id, &msg) {
                    Ok(task) => hooks.emit(&TaskEvent::Failed(task)),
                    Err(err) => warn!("[swarm] fail_task {} failed: {}", task_id, err),
                }
                return (index, Err(msg));
            }
        }
    }
}

/// Combine subtask results into one answer via a balanced router call,
/// falling back to the raw concatenation when synthesis itself fails.
async fn synthesize(
    runner: &dyn SubtaskRunner,
    subtasks: &[SubtaskSpec],
    results: &[Option<String>],
    opts: &ExecuteOptions,
) -> String {
    let combined = subtasks
        .iter()
        .zip(results)
        .filter_map(|(s, r)| r.as_ref().map(|text| format!("[{}]: {}", s.description, text)))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let prompt = match &opts.synthesis_prompt {
        Some(template) => template.replace("{{results}}", &combined),
        None => format!(
            "Synthesize the following subtask results into a coherent final answer:\n\n{}",
            combined
        ),
    };

    match runner
        .run_subtask(&prompt, Strategy::Balanced, None, &opts.caller)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!("[swarm] synthesis failed ({}) — returning raw results", e);
            combined
        }
    }
}
