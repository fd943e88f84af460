use crate::events::{EventRow, NewEvent, schema};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(300);

/// Append-only task queue over the shared SQLite file. Producers append;
/// competing consumers in a named group read and acknowledge. A delivery
/// left unacked for `requeue_after` becomes claimable again, which gives
/// at-least-once semantics without consumer liveness tracking.
pub struct TaskQueue {
    conn: Connection,
    requeue_after: Duration,
}

impl TaskQueue {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_requeue(path, DEFAULT_REQUEUE_AFTER)
    }

    pub fn open_with_requeue(path: &Path, requeue_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn,
            requeue_after,
        })
    }

    /// Durably append one event. Returns the assigned sequence number, or
    /// `None` when the dedupe key already exists.
    pub fn append(&self, event: &NewEvent) -> Result<Option<i64>> {
        let ts = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO events (ts, event_type, payload_json, dedupe_key)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                ts,
                event.event_type,
                event.payload_json.to_string(),
                event.dedupe_key
            ],
        )?;
        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    /// Idempotent: creating a group that already exists is not an error.
    pub fn create_group(&self, group: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO consumer_groups (name, last_delivered_seq) VALUES (?1, 0)",
            params![group],
        )?;
        Ok(())
    }

    /// Block up to `block_timeout` for the next event assigned to this
    /// consumer group: a stale unacked delivery first, otherwise the next
    /// never-delivered event. Returns zero-or-more (seq, event) pairs.
    pub fn read_next(
        &self,
        group: &str,
        consumer_id: &str,
        block_timeout: Duration,
    ) -> Result<Vec<(i64, EventRow)>> {
        let start = Instant::now();
        loop {
            if let Some(pair) = self.claim_next(group, consumer_id)? {
                return Ok(vec![pair]);
            }
            let elapsed = start.elapsed();
            if elapsed >= block_timeout {
                return Ok(Vec::new());
            }
            thread::sleep(POLL_INTERVAL.min(block_timeout - elapsed));
        }
    }

    /// Mark an event processed for this group. Unacked deliveries become
    /// redeliverable after the requeue window.
    pub fn ack(&self, group: &str, seq: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE deliveries SET acked = 1 WHERE group_name = ?1 AND seq = ?2",
            params![group, seq],
        )?;
        Ok(())
    }

    pub fn unacked_count(&self, group: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM deliveries WHERE group_name = ?1 AND acked = 0",
                params![group],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn claim_next(&self, group: &str, consumer_id: &str) -> Result<Option<(i64, EventRow)>> {
        let now = Utc::now();
        let stale_before =
            (now - chrono::Duration::from_std(self.requeue_after)?).to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;

        let redeliverable: Option<i64> = tx
            .query_row(
                "SELECT seq FROM deliveries
                 WHERE group_name = ?1 AND acked = 0 AND delivered_at <= ?2
                 ORDER BY seq ASC LIMIT 1",
                params![group, stale_before],
                |row| row.get(0),
            )
            .optional()?;

        let seq = if let Some(seq) = redeliverable {
            tx.execute(
                "UPDATE deliveries SET consumer_id = ?3, delivered_at = ?4
                 WHERE group_name = ?1 AND seq = ?2",
                params![group, seq, consumer_id, now.to_rfc3339()],
            )?;
            Some(seq)
        } else {
            let last_delivered: i64 = tx.query_row(
                "SELECT last_delivered_seq FROM consumer_groups WHERE name = ?1",
                params![group],
                |row| row.get(0),
            )?;
            let next: Option<i64> = tx
                .query_row(
                    "SELECT seq FROM events WHERE seq > ?1 ORDER BY seq ASC LIMIT 1",
                    params![last_delivered],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(seq) = next {
                tx.execute(
                    "INSERT INTO deliveries (group_name, seq, consumer_id, delivered_at, acked)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                    params![group, seq, consumer_id, now.to_rfc3339()],
                )?;
                tx.execute(
                    "UPDATE consumer_groups SET last_delivered_seq = ?2 WHERE name = ?1",
                    params![group, seq],
                )?;
            }
            next
        };

        let pair = match seq {
            Some(seq) => {
                let event = tx.query_row(
                    "SELECT seq, ts, event_type, payload_json, dedupe_key FROM events WHERE seq = ?1",
                    params![seq],
                    |row| {
                        let payload: String = row.get(3)?;
                        Ok(EventRow {
                            seq: row.get(0)?,
                            ts: row.get(1)?,
                            event_type: row.get(2)?,
                            payload_json: serde_json::from_str(&payload)
                                .unwrap_or(serde_json::Value::Null),
                            dedupe_key: row.get(4)?,
                        })
                    },
                )?;
                Some((seq, event))
            }
            None => None,
        };
        tx.commit()?;
        Ok(pair)
    }
}
