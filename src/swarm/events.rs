// Task lifecycle events — a typed channel delivered to every registered
// subscriber. Subscriber panics are isolated: a hook that blows up is
// logged and the state transition stands.

use crate::atoms::types::SwarmTask;
use log::warn;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// One state-machine transition, carrying the post-transition row.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Claimed(SwarmTask),
    Completed(SwarmTask),
    Failed(SwarmTask),
    Reset(SwarmTask),
}

impl TaskEvent {
    pub fn task(&self) -> &SwarmTask {
        match self {
            TaskEvent::Claimed(t)
            | TaskEvent::Completed(t)
            | TaskEvent::Failed(t)
            | TaskEvent::Reset(t) => t,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TaskEvent::Claimed(_) => "claim",
            TaskEvent::Completed(_) => "complete",
            TaskEvent::Failed(_) => "fail",
            TaskEvent::Reset(_) => "reset",
        }
    }
}

type Hook = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// Registered lifecycle subscribers.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every task transition.
    pub fn subscribe<F>(&self, hook: F)
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Deliver an event to all subscribers, isolating panics.
    pub fn emit(&self, event: &TaskEvent) {
        let hooks: Vec<Hook> = self.hooks.read().clone();
        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
                warn!(
                    "[swarm] {} hook panicked for task {} — ignored",
                    event.name(),
                    event.task().id
                );
            }
        }
    }
}
