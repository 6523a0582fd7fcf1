// ── Hivecore Swarm ─────────────────────────────────────────────────────────
// Cooperative multi-agent task execution: an LLM-driven decomposer turns a
// task into a dependency DAG, the executor walks it level by level, and
// lifecycle hooks let shells observe every transition.
//
// Module layout:
//   decompose.rs — prompt template + strict subtask parser
//   executor.rs  — level computation, parallel execution, retry, synthesis
//   events.rs    — typed lifecycle hook registry

pub mod decompose;
pub mod events;
pub mod executor;
