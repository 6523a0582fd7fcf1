// Agent message bus — persisted channel/direct messaging with per-agent
// read cursors, typed messages, and TTL expiry. Cursor comparisons use the
// monotonic row id, so messages created within the same timestamp tick are
// still delivered exactly once per agent.

use crate::atoms::constants::{
    CONTEXT_TTL_MINUTES, DEFAULT_READ_LIMIT, SIGNAL_TTL_MINUTES,
};
use crate::atoms::error::{CoreError, CoreResult};
use crate::atoms::types::{now_rfc3339, BusMessage, MessageType, ReadFilter};
use crate::store::SwarmStore;
use rusqlite::{params, Row};
use serde_json::Value;

/// Input for `post_message`. Non-string payloads are serialized to JSON
/// text before storage.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub msg_type: MessageType,
    pub payload: Value,
    pub ttl_minutes: Option<i64>,
}

impl NewMessage {
    pub fn data(channel: &str, sender: &str, payload: Value) -> Self {
        NewMessage {
            channel: channel.into(),
            sender: sender.into(),
            recipient: None,
            msg_type: MessageType::Data,
            payload,
            ttl_minutes: None,
        }
    }
}

/// Store string payloads verbatim; everything else as JSON text.
fn payload_to_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The direct-message channel for a pair of agents, order-independent.
pub(crate) fn dm_channel(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("dm:{}:{}", lo, hi)
}

const MESSAGE_COLUMNS: &str =
    "id, channel, sender, recipient, type, payload, created_at, expires_at";

impl BusMessage {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let msg_type: String = row.get(4)?;
        Ok(BusMessage {
            id: row.get(0)?,
            channel: row.get(1)?,
            sender: row.get(2)?,
            recipient: row.get(3)?,
            msg_type: MessageType::parse(&msg_type).unwrap_or(MessageType::Data),
            payload: row.get(5)?,
            created_at: row.get(6)?,
            expires_at: row.get(7)?,
        })
    }
}

impl SwarmStore {
    // ── Posting ────────────────────────────────────────────────────────────

    /// Persist one message; returns its monotonic id. A ttl of 0 expires
    /// the message on creation — it is never visible to readers.
    pub fn post_message(&self, msg: &NewMessage) -> CoreResult<i64> {
        if msg.channel.is_empty() {
            return Err(CoreError::InvalidArgument("post_message: empty channel".into()));
        }
        if msg.sender.is_empty() {
            return Err(CoreError::InvalidArgument("post_message: empty sender".into()));
        }
        let now = chrono::Utc::now();
        let expires_at = msg
            .ttl_minutes
            .map(|ttl| (now + chrono::Duration::minutes(ttl)).to_rfc3339());

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (channel, sender, recipient, type, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                msg.channel,
                msg.sender,
                msg.recipient,
                msg.msg_type.as_str(),
                payload_to_text(&msg.payload),
                now.to_rfc3339(),
                expires_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ── Reading ────────────────────────────────────────────────────────────

    /// Read a channel in insertion order, honouring expiry, recipient
    /// addressing, and (when `agent_id` is set) the agent's read cursor.
    /// Returned messages advance the cursor past the last one.
    pub fn read_messages(
        &self,
        channel: &str,
        filter: &ReadFilter,
    ) -> CoreResult<Vec<BusMessage>> {
        let limit = if filter.limit == 0 { DEFAULT_READ_LIMIT } else { filter.limit };
        let now = now_rfc3339();

        let conn = self.conn.lock();
        let mut sql = format!(
            "SELECT {} FROM messages
             WHERE channel = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            MESSAGE_COLUMNS
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(channel.to_string()), Box::new(now)];

        if let Some(agent) = &filter.agent_id {
            let cursor: i64 = conn
                .query_row(
                    "SELECT last_read_id FROM read_cursors WHERE agent_id = ?1 AND channel = ?2",
                    params![agent, channel],
                    |row| row.get(0),
                )
                .unwrap_or(0);
            args.push(Box::new(agent.clone()));
            sql.push_str(&format!(
                " AND (recipient IS NULL OR recipient = ?{})",
                args.len()
            ));
            args.push(Box::new(cursor));
            sql.push_str(&format!(" AND id > ?{}", args.len()));
        }
        if let Some(t) = filter.msg_type {
            args.push(Box::new(t.as_str().to_string()));
            sql.push_str(&format!(" AND type = ?{}", args.len()));
        }
        if let Some(since) = &filter.since {
            args.push(Box::new(since.clone()));
            sql.push_str(&format!(" AND created_at > ?{}", args.len()));
        }
        args.push(Box::new(limit as i64));
        sql.push_str(&format!(
            " ORDER BY created_at ASC, id ASC LIMIT ?{}",
            args.len()
        ));

        let mut stmt = conn.prepare(&sql)?;
        let messages: Vec<BusMessage> = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), BusMessage::from_row)?
            .filter_map(|r| r.ok())
            .collect();

        // Advance the cursor to the last delivered message.
        if let (Some(agent), Some(last)) = (&filter.agent_id, messages.last()) {
            conn.execute(
                "INSERT INTO read_cursors (agent_id, channel, last_read_id, last_read_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_id, channel)
                 DO UPDATE SET last_read_id = ?3, last_read_at = ?4",
                params![agent, channel, last.id, now_rfc3339()],
            )?;
        }
        Ok(messages)
    }

    // ── Direct messages ────────────────────────────────────────────────────

    /// Send a direct message on the pair's `dm:` channel.
    pub fn send_direct(
        &self,
        sender: &str,
        recipient: &str,
        payload: Value,
        msg_type: MessageType,
        ttl_minutes: Option<i64>,
    ) -> CoreResult<i64> {
        self.post_message(&NewMessage {
            channel: dm_channel(sender, recipient),
            sender: sender.into(),
            recipient: Some(recipient.into()),
            msg_type,
            payload,
            ttl_minutes,
        })
    }

    /// Read direct messages addressed to `agent_id`. With `from_agent` the
    /// pair's channel cursor advances as usual; without it, unexpired
    /// messages across all dm channels are returned (no cursor to advance).
    pub fn read_direct(
        &self,
        agent_id: &str,
        from_agent: Option<&str>,
        filter: &ReadFilter,
    ) -> CoreResult<Vec<BusMessage>> {
        match from_agent {
            Some(from) => {
                let mut filter = filter.clone();
                filter.agent_id = Some(agent_id.to_string());
                self.read_messages(&dm_channel(agent_id, from), &filter)
            }
            None => {
                let limit = if filter.limit == 0 { DEFAULT_READ_LIMIT } else { filter.limit };
                let conn = self.conn.lock();
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE recipient = ?1 AND channel LIKE 'dm:%'
                       AND (expires_at IS NULL OR expires_at > ?2)
                     ORDER BY created_at ASC, id ASC LIMIT ?3",
                    MESSAGE_COLUMNS
                ))?;
                let messages = stmt
                    .query_map(
                        params![agent_id, now_rfc3339(), limit as i64],
                        BusMessage::from_row,
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(messages)
            }
        }
    }

    // ── Signals & shared context ───────────────────────────────────────────

    /// Broadcast a short-lived signal to a channel.
    pub fn broadcast_signal(
        &self,
        channel: &str,
        sender: &str,
        signal: &str,
        data: Option<Value>,
    ) -> CoreResult<i64> {
        self.post_message(&NewMessage {
            channel: channel.into(),
            sender: sender.into(),
            recipient: None,
            msg_type: MessageType::Signal,
            payload: serde_json::json!({ "signal": signal, "data": data }),
            ttl_minutes: Some(SIGNAL_TTL_MINUTES),
        })
    }

    /// Publish a keyed context value to a channel.
    pub fn share_context(
        &self,
        channel: &str,
        sender: &str,
        key: &str,
        value: Value,
    ) -> CoreResult<i64> {
        self.post_message(&NewMessage {
            channel: channel.into(),
            sender: sender.into(),
            recipient: None,
            msg_type: MessageType::Context,
            payload: serde_json::json!({ "key": key, "value": value }),
            ttl_minutes: Some(CONTEXT_TTL_MINUTES),
        })
    }

    /// Newest unexpired context value for a key. The key match is a direct
    /// SQL filter, not a scan over channel history.
    pub fn get_context(&self, channel: &str, key: &str) -> CoreResult<Option<Value>> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM messages
                 WHERE channel = ?1 AND type = 'context'
                   AND json_extract(payload, '$.key') = ?2
                   AND (expires_at IS NULL OR expires_at > ?3)
                 ORDER BY id DESC LIMIT 1",
                params![channel, key, now_rfc3339()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match payload {
            Some(text) => {
                let parsed: Value = serde_json::from_str(&text)?;
                Ok(Some(parsed["value"].clone()))
            }
            None => Ok(None),
        }
    }

    // ── Maintenance ────────────────────────────────────────────────────────

    /// Delete every expired message; returns the count.
    pub fn clean_expired(&self) -> CoreResult<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now_rfc3339()],
        )?;
        Ok(deleted as u64)
    }
}
