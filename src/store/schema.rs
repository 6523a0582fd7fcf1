// Database schema and migrations for the swarm + message store.
// Called once at open() after WAL is enabled. Adding a table or column:
// append an idempotent CREATE TABLE IF NOT EXISTS or ALTER TABLE … ADD
// COLUMN at the end of run_migrations() — never modify existing SQL, to
// keep upgrade paths clean.

use crate::atoms::error::CoreResult;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "
        -- ═══ Swarm task queue ═══

        CREATE TABLE IF NOT EXISTS swarm_tasks (
            id TEXT PRIMARY KEY,
            swarm_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            prompt TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            agent_id TEXT,
            model TEXT,
            strategy TEXT,
            mode TEXT NOT NULL DEFAULT 'inline',
            result TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            claimed_at TEXT,
            completed_at TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_swarm_tasks_swarm ON swarm_tasks(swarm_id);
        CREATE INDEX IF NOT EXISTS idx_swarm_tasks_status ON swarm_tasks(status);
        CREATE INDEX IF NOT EXISTS idx_swarm_tasks_claimed ON swarm_tasks(status, claimed_at);

        -- ═══ Agent message bus ═══
        -- id is the monotonic insertion order; read cursors compare
        -- against it, never against created_at.

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel TEXT NOT NULL,
            sender TEXT NOT NULL,
            recipient TEXT,
            type TEXT NOT NULL DEFAULT 'data',
            payload TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            expires_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel);
        CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient);
        CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);

        CREATE TABLE IF NOT EXISTS read_cursors (
            agent_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            last_read_id INTEGER NOT NULL DEFAULT 0,
            last_read_at TEXT NOT NULL,
            PRIMARY KEY (agent_id, channel)
        );
    ",
    )?;
    Ok(())
}
