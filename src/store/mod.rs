// ── Hivecore Store ─────────────────────────────────────────────────────────
// Swarm tasks and the agent message bus share one SQLite database, opened
// in WAL mode so readers never block the writer. The connection is wrapped
// in a Mutex; the conditional UPDATE in tasks.rs is the one true
// serialization point for task ownership.
//
// Module layout:
//   schema.rs   — idempotent migrations
//   tasks.rs    — task rows, atomic claim, maintenance queries
//   messages.rs — message bus + per-agent read cursors

mod messages;
mod schema;
mod tasks;

pub use messages::NewMessage;

use crate::atoms::error::CoreResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

/// Thread-safe swarm + message store.
pub struct SwarmStore {
    pub(crate) conn: Mutex<Connection>,
}

impl SwarmStore {
    /// Open (or create) the store and run migrations.
    pub fn open(path: &Path) -> CoreResult<Self> {
        info!("[store] Opening swarm store at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        schema::run_migrations(&conn)?;
        Ok(SwarmStore { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(SwarmStore { conn: Mutex::new(conn) })
    }
}

/// Initialise an already-open connection with the full schema.
/// Used by integration tests that create in-memory databases.
pub fn schema_for_testing(conn: &Connection) {
    schema::run_migrations(conn).expect("schema_for_testing: migrations failed");
}
