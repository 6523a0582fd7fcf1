// Swarm task rows — creation, the atomic claim primitive, state
// transitions, and maintenance queries. All writes go through a single-row
// conditional UPDATE keyed on the current status, so two workers sharing
// the store can never both own one task.

use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{now_rfc3339, SwarmStatus, SwarmTask, TaskMode, TaskSpec, TaskStatus};
use crate::store::SwarmStore;
use rusqlite::{params, Row};

const TASK_COLUMNS: &str = "id, swarm_id, seq, description, prompt, status, agent_id, model,
       strategy, mode, result, error, created_at, claimed_at, completed_at, metadata";

impl SwarmTask {
    /// Map a row selected with TASK_COLUMNS.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(5)?;
        let mode: String = row.get(9)?;
        let metadata: String = row.get(15)?;
        Ok(SwarmTask {
            id: row.get(0)?,
            swarm_id: row.get(1)?,
            seq: row.get(2)?,
            description: row.get(3)?,
            prompt: row.get(4)?,
            status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
            agent_id: row.get(6)?,
            model: row.get(7)?,
            strategy: row.get(8)?,
            mode: TaskMode::parse(&mode).unwrap_or(TaskMode::Inline),
            result: row.get(10)?,
            error: row.get(11)?,
            created_at: row.get(12)?,
            claimed_at: row.get(13)?,
            completed_at: row.get(14)?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        })
    }
}

impl SwarmStore {
    // ── Swarm creation ─────────────────────────────────────────────────────

    /// Insert a batch of tasks as one swarm, in a single transaction.
    /// Returns the swarm id and the task ids in insertion order.
    pub fn create_swarm(
        &self,
        swarm_id: Option<String>,
        tasks: &[TaskSpec],
    ) -> CoreResult<(String, Vec<String>)> {
        if tasks.is_empty() {
            return Err(CoreError::InvalidArgument("create_swarm: no tasks".into()));
        }
        let swarm_id =
            swarm_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..12].to_string());

        // Dependencies may only point backwards within the swarm.
        for (seq, spec) in tasks.iter().enumerate() {
            if let Some(deps) = spec
                .metadata
                .as_ref()
                .and_then(|m| m["depends_on"].as_array())
            {
                for d in deps {
                    match d.as_i64() {
                        Some(i) if i >= 0 && (i as usize) < seq => {}
                        _ => {
                            return Err(CoreError::InvalidArgument(format!(
                                "task {} has invalid dependency {}",
                                seq, d
                            )))
                        }
                    }
                }
            }
        }

        let now = now_rfc3339();
        let mut task_ids = Vec::with_capacity(tasks.len());
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (seq, spec) in tasks.iter().enumerate() {
            let id = format!("{}-task-{}", swarm_id, seq);
            let metadata = spec
                .metadata
                .clone()
                .unwrap_or_else(|| serde_json::json!({}));
            tx.execute(
                "INSERT INTO swarm_tasks (id, swarm_id, seq, description, prompt, status,
                                          model, strategy, mode, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    swarm_id,
                    seq as i64,
                    spec.description,
                    spec.prompt,
                    spec.model,
                    spec.strategy,
                    spec.mode.unwrap_or(TaskMode::Inline).as_str(),
                    now,
                    metadata.to_string(),
                ],
            )?;
            task_ids.push(id);
        }
        tx.commit()?;
        Ok((swarm_id, task_ids))
    }

    // ── Reads ──────────────────────────────────────────────────────────────

    pub fn get_task(&self, task_id: &str) -> CoreResult<SwarmTask> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM swarm_tasks WHERE id = ?1",
            TASK_COLUMNS
        ))?;
        stmt.query_row(params![task_id], SwarmTask::from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    CoreError::TaskNotFound(task_id.to_string())
                }
                other => other.into(),
            })
    }

    /// All tasks of one swarm, in seq order.
    pub fn get_swarm_results(&self, swarm_id: &str) -> CoreResult<Vec<SwarmTask>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM swarm_tasks WHERE swarm_id = ?1 ORDER BY seq",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![swarm_id], SwarmTask::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    pub fn get_swarm_status(&self, swarm_id: &str) -> CoreResult<SwarmStatus> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM swarm_tasks WHERE swarm_id = ?1 GROUP BY status",
        )?;
        let mut status = SwarmStatus::default();
        let rows = stmt.query_map(params![swarm_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            status.total += row.1;
            match TaskStatus::parse(&row.0) {
                Some(TaskStatus::Pending) => status.pending = row.1,
                Some(TaskStatus::Claimed) => status.claimed = row.1,
                Some(TaskStatus::Running) => status.running = row.1,
                Some(TaskStatus::Done) => status.done = row.1,
                Some(TaskStatus::Failed) => status.failed = row.1,
                None => {}
            }
        }
        Ok(status)
    }

    /// True when the swarm exists and every task is terminal.
    pub fn is_swarm_complete(&self, swarm_id: &str) -> CoreResult<bool> {
        let s = self.get_swarm_status(swarm_id)?;
        Ok(s.total > 0 && s.done + s.failed == s.total)
    }

    // ── Atomic claim ───────────────────────────────────────────────────────

    /// Claim the next pending task for `agent_id`.
    ///
    /// Without `check_deps`: the single lowest-seq pending task is attempted;
    /// losing the conditional update means someone else won the race and the
    /// call returns None.
    ///
    /// With `check_deps`: pending tasks are scanned in seq order and the
    /// first whose `depends_on` entries are all done is attempted; the first
    /// successful update wins.
    pub fn claim_task(
        &self,
        swarm_id: &str,
        agent_id: &str,
        check_deps: bool,
    ) -> CoreResult<Option<SwarmTask>> {
        let candidates: Vec<(String, serde_json::Value)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, metadata FROM swarm_tasks
                 WHERE swarm_id = ?1 AND status = 'pending' ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![swarm_id], |row| {
                    let metadata: String = row.get(1)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        for (task_id, metadata) in candidates {
            if check_deps && !self.deps_satisfied(swarm_id, &metadata)? {
                continue;
            }

            // The one true serialization point: a conditional single-row
            // update on the pending predicate.
            let changed = {
                let conn = self.conn.lock();
                conn.execute(
                    "UPDATE swarm_tasks
                     SET status = 'claimed', agent_id = ?2, claimed_at = ?3
                     WHERE id = ?1 AND status = 'pending'",
                    params![task_id, agent_id, now_rfc3339()],
                )?
            };
            if changed > 0 {
                return Ok(Some(self.get_task(&task_id)?));
            }
            // Lost the race. Without dependency checking the contract is
            // one attempt on the head task; with it, keep scanning.
            if !check_deps {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Claim one specific task. Same conditional-update primitive as
    /// `claim_task`; used by the executor, whose level scheduling already
    /// knows which task each worker slot owns.
    pub fn claim_specific(&self, task_id: &str, agent_id: &str) -> CoreResult<Option<SwarmTask>> {
        let changed = {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE swarm_tasks
                 SET status = 'claimed', agent_id = ?2, claimed_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![task_id, agent_id, now_rfc3339()],
            )?
        };
        if changed == 0 {
            return Ok(None);
        }
        Ok(Some(self.get_task(task_id)?))
    }

    fn deps_satisfied(&self, swarm_id: &str, metadata: &serde_json::Value) -> CoreResult<bool> {
        let deps: Vec<i64> = metadata["depends_on"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default();
        if deps.is_empty() {
            return Ok(true);
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT status FROM swarm_tasks WHERE swarm_id = ?1 AND seq = ?2",
        )?;
        for dep in deps {
            let status: Option<String> = stmt
                .query_row(params![swarm_id, dep], |row| row.get(0))
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            if status.as_deref() != Some("done") {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Transitions ────────────────────────────────────────────────────────

    /// claimed → running.
    pub fn mark_running(&self, task_id: &str) -> CoreResult<SwarmTask> {
        self.transition(
            task_id,
            "UPDATE swarm_tasks SET status = 'running'
             WHERE id = ?1 AND status = 'claimed'",
            &[],
        )
    }

    /// Any non-terminal → done. Sets completed_at; backfills claimed_at for
    /// tasks completed without an explicit claim.
    pub fn complete_task(&self, task_id: &str, result: &str) -> CoreResult<SwarmTask> {
        self.transition(
            task_id,
            "UPDATE swarm_tasks
             SET status = 'done', result = ?2, error = NULL, completed_at = ?3,
                 claimed_at = COALESCE(claimed_at, ?3)
             WHERE id = ?1 AND status NOT IN ('done', 'failed')",
            &[result],
        )
    }

    /// Any non-terminal → failed.
    pub fn fail_task(&self, task_id: &str, error: &str) -> CoreResult<SwarmTask> {
        self.transition(
            task_id,
            "UPDATE swarm_tasks
             SET status = 'failed', error = ?2, completed_at = ?3,
                 claimed_at = COALESCE(claimed_at, ?3)
             WHERE id = ?1 AND status NOT IN ('done', 'failed')",
            &[error],
        )
    }

    /// Any non-terminal → pending, clearing ownership. Used to recover
    /// tasks whose workers vanished.
    pub fn reset_task(&self, task_id: &str) -> CoreResult<SwarmTask> {
        self.transition(
            task_id,
            "UPDATE swarm_tasks
             SET status = 'pending', agent_id = NULL, claimed_at = NULL
             WHERE id = ?1 AND status NOT IN ('done', 'failed')",
            &[],
        )
    }

    /// Run a guarded transition; distinguishes "no such task" from
    /// "state machine forbids it".
    fn transition(&self, task_id: &str, sql: &str, extra: &[&str]) -> CoreResult<SwarmTask> {
        let changed = {
            let conn = self.conn.lock();
            match extra {
                [] => conn.execute(sql, params![task_id])?,
                [arg] => conn.execute(sql, params![task_id, arg, now_rfc3339()])?,
                _ => unreachable!("transitions take at most one extra argument"),
            }
        };
        if changed == 0 {
            // Either missing (TaskNotFound from get_task) or frozen.
            let current = self.get_task(task_id)?;
            return Err(CoreError::InvalidArgument(format!(
                "task {} cannot transition from {}",
                task_id, current.status
            )));
        }
        self.get_task(task_id)
    }

    // ── Maintenance ────────────────────────────────────────────────────────

    /// Claimed/running tasks whose claim is older than the cutoff.
    pub fn get_stale_tasks(&self, stale_minutes: i64) -> CoreResult<Vec<SwarmTask>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::minutes(stale_minutes)).to_rfc3339();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM swarm_tasks
             WHERE status IN ('claimed', 'running') AND claimed_at < ?1
             ORDER BY claimed_at",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![cutoff], SwarmTask::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    /// Delete swarms where every task is terminal and the newest completion
    /// is older than the retention window. Returns rows deleted.
    pub fn clean_completed_swarms(&self, retention_days: i64) -> CoreResult<u64> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM swarm_tasks WHERE swarm_id IN (
                SELECT swarm_id FROM swarm_tasks
                GROUP BY swarm_id
                HAVING SUM(status NOT IN ('done', 'failed')) = 0
                   AND MAX(completed_at) < ?1
            )",
            params![cutoff],
        )?;
        Ok(deleted as u64)
    }
}
