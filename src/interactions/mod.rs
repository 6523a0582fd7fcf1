// ── Hivecore Interactions: Call Log Store ──────────────────────────────────
// Append-only record of every LLM invocation, in its own SQLite database
// (WAL mode). Writes go through a bounded in-process queue drained by a
// background task, so `log_call` is fire-and-forget: it never blocks on I/O
// and never surfaces an error to the originating LLM call. A full queue
// drops the oldest record and counts the drop.
//
// Module layout:
//   mod.rs    — store, writer queue, stats/analytics queries, estimators
//   redact.rs — secret redaction + storage truncation

pub mod redact;

use crate::atoms::constants::CALL_LOG_QUEUE_CAP;
use crate::atoms::error::CoreResult;
use crate::atoms::types::{now_rfc3339, CallRecord, ModelStats, Pricing};
use crate::registry;
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Estimate tokens from raw text: one token per four characters, rounded up.
pub fn estimate_tokens_from_chars(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Shared writer queue. Bounded; overflow evicts the oldest pending record.
struct WriteQueue {
    buf: Mutex<VecDeque<CallRecord>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Thread-safe call-log store.
pub struct InteractionStore {
    /// The SQLite connection, protected by a Mutex. WAL mode keeps external
    /// analytical readers from blocking the writer.
    conn: Mutex<Connection>,
    queue: Arc<WriteQueue>,
    writer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Caller-supplied pricing overrides, keyed by model name.
    pricing_overrides: RwLock<HashMap<String, Pricing>>,
}

impl InteractionStore {
    /// Open (or create) the call-log database and initialize the schema.
    pub fn open(path: &Path) -> CoreResult<Self> {
        info!("[interactions] Opening call log at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        run_migrations(&conn)?;
        Ok(Self::with_connection(conn))
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        InteractionStore {
            conn: Mutex::new(conn),
            queue: Arc::new(WriteQueue {
                buf: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            writer: Mutex::new(None),
            pricing_overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn the background writer. Must run inside a tokio runtime; called
    /// once by `Core::init`.
    pub fn start_writer(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let next = store.queue.buf.lock().pop_front();
                match next {
                    Some(record) => {
                        if let Err(e) = store.insert_record(&record) {
                            // Diagnose to the side channel, drop the record.
                            error!("[interactions] Failed to persist call record: {}", e);
                        }
                    }
                    None => {
                        if store.queue.closed.load(Ordering::Acquire) {
                            break;
                        }
                        store.queue.notify.notified().await;
                    }
                }
            }
            info!("[interactions] Writer drained and stopped");
        });
        *self.writer.lock() = Some(handle);
    }

    /// Flush remaining records and stop the writer.
    pub async fn shutdown(&self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.notify.notify_waiters();
        self.queue.notify.notify_one();
        let handle = self.writer.lock().take();
        if let Some(h) = handle {
            h.await.ok();
        }
    }

    /// Queue a call record for persistence. Fire-and-forget: sanitizes the
    /// prompt/response, normalizes invariants, and returns immediately.
    pub fn log_call(&self, mut record: CallRecord) {
        record.prompt = redact::sanitize(&record.prompt);
        record.response = redact::sanitize(&record.response);
        if record.timestamp.is_empty() {
            record.timestamp = now_rfc3339();
        }
        if record.cost_estimate < 0.0 {
            record.cost_estimate = 0.0;
        }
        // A failed call always carries an error string.
        if !record.ok && record.error.is_none() {
            record.error = Some("unknown error".into());
        }

        let mut buf = self.queue.buf.lock();
        if buf.len() >= CALL_LOG_QUEUE_CAP {
            buf.pop_front();
            let dropped = self.queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("[interactions] Write queue full — dropped oldest record ({} total)", dropped);
        }
        buf.push_back(record);
        drop(buf);
        self.queue.notify.notify_one();
    }

    /// Records evicted from a full queue since open.
    pub fn dropped_records(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Synchronously drain the queue. Test helper for deterministic asserts
    /// without the background writer.
    pub fn flush_pending(&self) -> CoreResult<usize> {
        let mut flushed = 0;
        loop {
            let next = self.queue.buf.lock().pop_front();
            match next {
                Some(record) => {
                    self.insert_record(&record)?;
                    flushed += 1;
                }
                None => return Ok(flushed),
            }
        }
    }

    fn insert_record(&self, r: &CallRecord) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO llm_calls (timestamp, provider, model, caller, prompt, response,
                                    input_tokens, output_tokens, cost_estimate, duration_ms, ok, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                r.timestamp,
                r.provider,
                r.model,
                r.caller,
                r.prompt,
                r.response,
                r.input_tokens as i64,
                r.output_tokens as i64,
                r.cost_estimate,
                r.duration_ms as i64,
                r.ok as i32,
                r.error,
            ],
        )?;
        Ok(())
    }

    /// Estimate USD cost for a call. Pricing overrides win over the
    /// registry; unknown models cost 0.
    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let pricing = self
            .pricing_overrides
            .read()
            .get(model)
            .copied()
            .or_else(|| registry::info(model).map(|d| d.pricing));
        match pricing {
            Some(p) => {
                input_tokens as f64 * p.input_per_million / 1_000_000.0
                    + output_tokens as f64 * p.output_per_million / 1_000_000.0
            }
            None => 0.0,
        }
    }

    /// Override pricing for one model (registry entries marked TODO
    /// upstream, fine-tunes, …).
    pub fn configure_pricing(&self, model: &str, pricing: Pricing) {
        self.pricing_overrides.write().insert(model.to_string(), pricing);
    }

    /// Per-model aggregates over the last `hours_back` hours, keeping only
    /// models with at least `min_samples` calls. Powers strategy selection.
    pub fn model_stats(&self, hours_back: i64, min_samples: u64) -> CoreResult<Vec<ModelStats>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(hours_back)).to_rfc3339();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT model, COUNT(*), AVG(duration_ms), AVG(ok), AVG(cost_estimate)
             FROM llm_calls
             WHERE timestamp >= ?1
             GROUP BY model
             HAVING COUNT(*) >= ?2
             ORDER BY model",
        )?;
        let stats = stmt
            .query_map(params![cutoff, min_samples as i64], |row| {
                Ok(ModelStats {
                    model: row.get(0)?,
                    call_count: row.get::<_, i64>(1)? as u64,
                    avg_latency_ms: row.get::<_, f64>(2)?,
                    success_rate: row.get::<_, f64>(3)?,
                    avg_cost: row.get::<_, f64>(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(stats)
    }

    /// Newest call records first, up to `limit`.
    pub fn recent_calls(&self, limit: u32) -> CoreResult<Vec<CallRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, provider, model, caller, prompt, response,
                    input_tokens, output_tokens, cost_estimate, duration_ms, ok, error
             FROM llm_calls ORDER BY id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit], |row| {
                Ok(CallRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    provider: row.get(2)?,
                    model: row.get(3)?,
                    caller: row.get(4)?,
                    prompt: row.get(5)?,
                    response: row.get(6)?,
                    input_tokens: row.get::<_, i64>(7)? as u64,
                    output_tokens: row.get::<_, i64>(8)? as u64,
                    cost_estimate: row.get(9)?,
                    duration_ms: row.get::<_, i64>(10)? as u64,
                    ok: row.get::<_, i32>(11)? != 0,
                    error: row.get(12)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}

fn run_migrations(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS llm_calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            caller TEXT NOT NULL DEFAULT '',
            prompt TEXT NOT NULL DEFAULT '',
            response TEXT NOT NULL DEFAULT '',
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cost_estimate REAL NOT NULL DEFAULT 0.0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            ok INTEGER NOT NULL DEFAULT 1,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_llm_calls_model ON llm_calls(model, timestamp);
        CREATE INDEX IF NOT EXISTS idx_llm_calls_timestamp ON llm_calls(timestamp);
    ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, ok: bool, duration_ms: u64, cost: f64) -> CallRecord {
        CallRecord {
            id: 0,
            timestamp: now_rfc3339(),
            provider: "anthropic".into(),
            model: model.into(),
            caller: "test".into(),
            prompt: "p".into(),
            response: "r".into(),
            input_tokens: 10,
            output_tokens: 20,
            cost_estimate: cost,
            duration_ms,
            ok,
            error: if ok { None } else { Some("boom".into()) },
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens_from_chars(""), 0);
        assert_eq!(estimate_tokens_from_chars("abcd"), 1);
        assert_eq!(estimate_tokens_from_chars("abcde"), 2);
    }

    #[test]
    fn cost_estimate_uses_registry_and_overrides() {
        let store = InteractionStore::open_in_memory().unwrap();
        // claude-sonnet-4-5: $3 in / $15 out per million
        let cost = store.estimate_cost("claude-sonnet-4-5", 1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
        assert_eq!(store.estimate_cost("mystery-model", 1_000_000, 0), 0.0);

        store.configure_pricing(
            "mystery-model",
            Pricing { input_per_million: 2.0, output_per_million: 4.0 },
        );
        let cost = store.estimate_cost("mystery-model", 500_000, 500_000);
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn log_call_sanitizes_and_normalizes() {
        let store = InteractionStore::open_in_memory().unwrap();
        let mut r = record("claude-haiku-4-5", false, 5, -1.0);
        r.error = None;
        r.prompt = "key sk-abcdefghijklmnopqrstuvwx1234".into();
        store.log_call(r);
        store.flush_pending().unwrap();

        let rows = store.recent_calls(10).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(!row.ok);
        assert!(row.error.is_some(), "failed calls always carry an error");
        assert!(row.cost_estimate >= 0.0);
        assert!(!row.prompt.contains("sk-abcdef"));
    }

    #[test]
    fn queue_overflow_drops_oldest() {
        let store = InteractionStore::open_in_memory().unwrap();
        for i in 0..(CALL_LOG_QUEUE_CAP + 10) {
            store.log_call(record(&format!("m{}", i), true, 1, 0.0));
        }
        assert_eq!(store.dropped_records(), 10);
        let flushed = store.flush_pending().unwrap();
        assert_eq!(flushed, CALL_LOG_QUEUE_CAP);

        // The oldest ten (m0..m9) were evicted.
        let rows = store.recent_calls(1_000).unwrap();
        assert!(!rows.iter().any(|r| r.model == "m0"));
        assert!(rows.iter().any(|r| r.model == "m10"));
    }

    #[test]
    fn model_stats_groups_and_filters() {
        let store = InteractionStore::open_in_memory().unwrap();
        for _ in 0..4 {
            store.log_call(record("claude-haiku-4-5", true, 100, 0.01));
        }
        store.log_call(record("claude-haiku-4-5", false, 300, 0.01));
        // Below the sample floor:
        store.log_call(record("gpt-4o", true, 50, 0.02));
        store.flush_pending().unwrap();

        let stats = store.model_stats(24, 3).unwrap();
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.model, "claude-haiku-4-5");
        assert_eq!(s.call_count, 5);
        assert!((s.success_rate - 0.8).abs() < 1e-9);
        assert!((s.avg_latency_ms - 140.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn background_writer_persists_and_shuts_down() {
        let store = Arc::new(InteractionStore::open_in_memory().unwrap());
        store.start_writer();
        for _ in 0..5 {
            store.log_call(record("claude-haiku-4-5", true, 10, 0.0));
        }
        store.shutdown().await;
        let rows = store.recent_calls(10).unwrap();
        assert_eq!(rows.len(), 5);
    }
}
