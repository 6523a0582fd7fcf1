// Integration tests — exercise the public Core surface end to end against
// temporary storage, with a scripted SubtaskRunner standing in for live
// providers. Kept in one binary so fixtures stay shared.

use hivecore::swarm::executor::{self, ExecuteOptions, SubtaskRunner};
use hivecore::swarm::events::HookRegistry;
use hivecore::{
    Capability, Core, CoreConfig, CoreError, CoreResult, MessageType, NewMessage, ReadFilter,
    Strategy, TaskSpec, TaskStatus,
};
use hivecore::store::SwarmStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

async fn test_core() -> (tempfile::TempDir, Core) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CoreConfig::at(dir.path());
    config.skip_smoke_test = true;
    let core = Core::init(config).await.unwrap();
    (dir, core)
}

fn task_spec(description: &str) -> TaskSpec {
    TaskSpec {
        description: description.into(),
        prompt: description.into(),
        ..Default::default()
    }
}

// ── Scripted runner ────────────────────────────────────────────────────────
// Decomposition prompts (they ask for a JSON array) get the scripted
// decomposition; every other prompt goes through `on_subtask`.

type SubtaskBehavior = Box<dyn Fn(&str, u32) -> CoreResult<String> + Send + Sync>;

struct ScriptedRunner {
    decomposition: String,
    on_subtask: SubtaskBehavior,
    subtask_calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new(decomposition: &str, on_subtask: SubtaskBehavior) -> Self {
        ScriptedRunner {
            decomposition: decomposition.into(),
            on_subtask,
            subtask_calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn echo(decomposition: &str) -> Self {
        Self::new(
            decomposition,
            Box::new(|prompt, _| Ok(format!("done<{}>", prompt.len() % 97))),
        )
    }
}

#[async_trait]
impl SubtaskRunner for ScriptedRunner {
    async fn run_subtask(
        &self,
        prompt: &str,
        _strategy: Strategy,
        _capability: Option<Capability>,
        _caller: &str,
    ) -> CoreResult<String> {
        if prompt.contains("JSON array") {
            return Ok(self.decomposition.clone());
        }
        self.prompts.lock().push(prompt.to_string());
        let call = self.subtask_calls.fetch_add(1, Ordering::SeqCst);
        (self.on_subtask)(prompt, call)
    }
}

// ── Swarm claim atomicity ──────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_claims_are_exclusive() {
    let (_dir, core) = test_core().await;
    let (swarm_id, _) = core
        .create_swarm(None, &[task_spec("a"), task_spec("b"), task_spec("c")])
        .unwrap();

    // Five workers race for three tasks.
    let winners: Vec<Option<String>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let core = &core;
                let swarm_id = swarm_id.clone();
                scope.spawn(move || {
                    core.claim_task(&swarm_id, &format!("w{}", i), true)
                        .unwrap()
                        .map(|t| t.id)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut claimed: Vec<String> = winners.into_iter().flatten().collect();
    assert_eq!(claimed.len(), 3, "exactly three of five claims succeed");
    claimed.sort();
    claimed.dedup();
    assert_eq!(claimed.len(), 3, "every successful claim owns a distinct task");

    for id in &claimed {
        assert_eq!(core.get_task(id).unwrap().status, TaskStatus::Claimed);
    }
    core.shutdown().await;
}

// ── Dependency gating through the public surface ───────────────────────────

#[tokio::test]
async fn dependency_gating_orders_claims() {
    let (_dir, core) = test_core().await;
    let chain = [
        task_spec("t0"),
        TaskSpec {
            metadata: Some(json!({"depends_on": [0]})),
            ..task_spec("t1")
        },
        TaskSpec {
            metadata: Some(json!({"depends_on": [1]})),
            ..task_spec("t2")
        },
    ];
    let (swarm_id, ids) = core.create_swarm(Some("chain".into()), &chain).unwrap();
    assert_eq!(ids.len(), 3);

    let t0 = core.claim_task(&swarm_id, "w", true).unwrap().unwrap();
    assert_eq!(t0.id, "chain-task-0");
    assert!(core.claim_task(&swarm_id, "w", true).unwrap().is_none());

    core.complete_task("chain-task-0", "X").unwrap();
    let t1 = core.claim_task(&swarm_id, "w", true).unwrap().unwrap();
    assert_eq!(t1.id, "chain-task-1");

    core.complete_task("chain-task-1", "Y").unwrap();
    let t2 = core.claim_task(&swarm_id, "w", true).unwrap().unwrap();
    assert_eq!(t2.id, "chain-task-2");

    core.complete_task("chain-task-2", "Z").unwrap();
    let results = core.get_swarm_results(&swarm_id).unwrap();
    assert_eq!(
        results.iter().map(|t| t.result.clone().unwrap()).collect::<Vec<_>>(),
        vec!["X", "Y", "Z"],
        "results preserve seq order"
    );
    core.shutdown().await;
}

// ── Executor: happy path with context propagation ──────────────────────────

#[tokio::test]
async fn execute_decomposed_propagates_dependency_context() {
    let store = SwarmStore::open_in_memory().unwrap();
    let hooks = HookRegistry::new();
    let runner = ScriptedRunner::new(
        r#"[
            {"description": "research"},
            {"description": "summarize", "depends_on": [0]}
        ]"#,
        Box::new(|prompt, _| {
            if prompt.contains("Synthesize") {
                Ok("final answer".into())
            } else if prompt.starts_with("[research]") {
                Ok("summary built on research".into())
            } else {
                Ok("research findings".into())
            }
        }),
    );

    let report = executor::execute_decomposed(
        &store,
        &hooks,
        &runner,
        "investigate the incident",
        &ExecuteOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.success);
    assert_eq!(report.results[0].as_deref(), Some("research findings"));
    assert_eq!(report.results[1].as_deref(), Some("summary built on research"));
    assert_eq!(report.synthesis.as_deref(), Some("final answer"));

    // The dependent subtask saw its dependency's result and the Now: stem.
    let prompts = runner.prompts.lock();
    let dependent = prompts
        .iter()
        .find(|p| p.contains("Now: summarize"))
        .expect("dependent prompt recorded");
    assert!(dependent.contains("research findings"));

    // Both tasks are terminal in the store.
    assert!(store.is_swarm_complete(&report.swarm_id).unwrap());
}

// ── Executor: transient retry with backoff (S5) ────────────────────────────

#[tokio::test]
async fn transient_errors_retry_then_succeed() {
    let store = SwarmStore::open_in_memory().unwrap();
    let hooks = HookRegistry::new();
    let runner = ScriptedRunner::new(
        r#"[{"description": "flaky step"}]"#,
        Box::new(|_, call| {
            if call < 2 {
                Err(CoreError::ProviderHttp {
                    status: 429,
                    body: "HTTP 429 rate_limit".into(),
                })
            } else {
                Ok("made it".into())
            }
        }),
    );

    let started = std::time::Instant::now();
    let report = executor::execute_decomposed(
        &store,
        &hooks,
        &runner,
        "do the flaky thing",
        &ExecuteOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.success);
    assert_eq!(report.results[0].as_deref(), Some("made it"));
    // Three total attempts for the subtask (the synthesis call is separate).
    assert_eq!(runner.subtask_calls.load(Ordering::SeqCst), 3 + 1);
    // Backoffs of 1000ms and 2000ms were observed.
    assert!(started.elapsed() >= std::time::Duration::from_millis(3_000));

    let task = store.get_task(&format!("{}-task-0", report.swarm_id)).unwrap();
    assert_eq!(task.status, TaskStatus::Done);
}

#[tokio::test]
async fn permanent_errors_fail_fast_and_poison_dependents() {
    let store = SwarmStore::open_in_memory().unwrap();
    let hooks = HookRegistry::new();
    let failures = Arc::new(AtomicU32::new(0));
    let f = Arc::clone(&failures);
    hooks.subscribe(move |event| {
        if matches!(event, hivecore::TaskEvent::Failed(_)) {
            f.fetch_add(1, Ordering::SeqCst);
        }
    });

    let runner = ScriptedRunner::new(
        r#"[
            {"description": "broken"},
            {"description": "downstream", "depends_on": [0]},
            {"description": "independent"}
        ]"#,
        Box::new(|prompt, _| {
            if prompt.contains("Synthesize") || prompt.contains("independent") {
                Ok("fine".into())
            } else {
                Err(CoreError::ProviderHttp { status: 400, body: "bad request".into() })
            }
        }),
    );

    let report = executor::execute_decomposed(
        &store,
        &hooks,
        &runner,
        "mixed outcome",
        &ExecuteOptions::default(),
    )
    .await
    .unwrap();

    assert!(!report.success);
    assert!(report.errors[0].as_ref().unwrap().contains("400"));
    assert_eq!(
        report.errors[1].as_deref(),
        Some("Dependency subtask 0 failed"),
        "dependents fail without running"
    );
    assert!(report.errors[2].is_none(), "siblings are unaffected");
    // Partial synthesis still happens over the surviving result.
    assert_eq!(report.synthesis.as_deref(), Some("fine"));
    assert_eq!(failures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn synthesis_can_be_disabled_and_falls_back() {
    let store = SwarmStore::open_in_memory().unwrap();
    let hooks = HookRegistry::new();

    // Disabled synthesis.
    let runner = ScriptedRunner::echo(r#"[{"description": "only"}]"#);
    let report = executor::execute_decomposed(
        &store,
        &hooks,
        &runner,
        "quick",
        &ExecuteOptions { synthesize: false, ..Default::default() },
    )
    .await
    .unwrap();
    assert!(report.synthesis.is_none());

    // Synthesis failure falls back to the raw concatenation.
    let runner = ScriptedRunner::new(
        r#"[{"description": "solo"}]"#,
        Box::new(|prompt, _| {
            if prompt.contains("Synthesize") {
                Err(CoreError::Other("synth broke".into()))
            } else {
                Ok("solo result".into())
            }
        }),
    );
    let report = executor::execute_decomposed(&store, &hooks, &runner, "t", &ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(report.synthesis.as_deref(), Some("[solo]: solo result"));
}

#[tokio::test]
async fn bad_decomposition_is_rejected() {
    let store = SwarmStore::open_in_memory().unwrap();
    let hooks = HookRegistry::new();
    let runner = ScriptedRunner::echo(r#"[{"description":"A","depends_on":[1]},{"description":"B"}]"#);

    let err = executor::execute_decomposed(&store, &hooks, &runner, "t", &ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Decomposition(_)));
}

#[tokio::test]
async fn decompose_and_queue_records_metadata() {
    let store = SwarmStore::open_in_memory().unwrap();
    let runner = ScriptedRunner::echo(
        r#"[
            {"description": "write", "capability": "coding"},
            {"description": "review it", "capability": "review", "depends_on": [0]}
        ]"#,
    );

    let (swarm_id, task_ids, subtasks) = executor::decompose_and_queue(
        &store,
        &runner,
        "build the feature",
        &ExecuteOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(task_ids.len(), subtasks.len());
    let tasks = store.get_swarm_results(&swarm_id).unwrap();
    assert_eq!(tasks[0].metadata["capability"], "coding");
    assert_eq!(tasks[1].metadata["capability"], "review");
    assert_eq!(tasks[1].metadata["depends_on"][0], 0);
    assert_eq!(tasks[1].metadata["subtask_index"], 1);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
}

// ── Message bus through the public surface (S7 + round trips) ──────────────

#[tokio::test]
async fn message_cursor_never_redelivers() {
    let (_dir, core) = test_core().await;
    for i in 1..=3 {
        core.post_message(&NewMessage::data("c", "s", json!(format!("M{}", i))))
            .unwrap();
    }

    let filter = ReadFilter { agent_id: Some("a".into()), ..Default::default() };
    let first = core.read_messages("c", &filter).unwrap();
    assert_eq!(
        first.iter().map(|m| m.payload.clone()).collect::<Vec<_>>(),
        vec!["M1", "M2", "M3"]
    );
    assert!(core.read_messages("c", &filter).unwrap().is_empty());

    core.post_message(&NewMessage::data("c", "s", json!("M4"))).unwrap();
    let next = core.read_messages("c", &filter).unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].payload, "M4");
    core.shutdown().await;
}

#[tokio::test]
async fn direct_and_context_round_trips() {
    let (_dir, core) = test_core().await;

    core.send_direct("a", "b", json!({"n": 1}), MessageType::Data, None)
        .unwrap();
    let inbox = core.read_direct("b", Some("a"), &ReadFilter::default()).unwrap();
    assert_eq!(inbox[0].payload, r#"{"n":1}"#);

    core.share_context("ch", "a", "k", json!("v1")).unwrap();
    core.share_context("ch", "a", "k", json!("v2")).unwrap();
    assert_eq!(core.get_context("ch", "k").unwrap(), Some(json!("v2")));

    core.broadcast_signal("ch", "a", "stop", None).unwrap();
    let signals = core
        .read_messages(
            "ch",
            &ReadFilter { msg_type: Some(MessageType::Signal), ..Default::default() },
        )
        .unwrap();
    assert_eq!(signals.len(), 1);
    core.shutdown().await;
}

// ── Call log flushes on shutdown ───────────────────────────────────────────

#[tokio::test]
async fn shutdown_flushes_call_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CoreConfig::at(dir.path());
    config.skip_smoke_test = true;
    let core = Core::init(config).await.unwrap();

    core.interactions().log_call(hivecore::CallRecord {
        id: 0,
        timestamp: String::new(),
        provider: "anthropic".into(),
        model: "claude-haiku-4-5".into(),
        caller: "test".into(),
        prompt: "p".into(),
        response: "r".into(),
        input_tokens: 1,
        output_tokens: 1,
        cost_estimate: 0.0,
        duration_ms: 1,
        ok: true,
        error: None,
    });
    core.shutdown().await;

    let calls = core.interactions().recent_calls(10).unwrap();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].timestamp.is_empty(), "timestamp backfilled");
}
