use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            dedupe_key TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_dedupe
            ON events(dedupe_key) WHERE dedupe_key IS NOT NULL;

        CREATE TABLE IF NOT EXISTS consumer_groups (
            name TEXT PRIMARY KEY,
            last_delivered_seq INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS deliveries (
            group_name TEXT NOT NULL REFERENCES consumer_groups(name),
            seq INTEGER NOT NULL REFERENCES events(seq),
            consumer_id TEXT NOT NULL,
            delivered_at TEXT NOT NULL,
            acked INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (group_name, seq)
        );

        CREATE INDEX IF NOT EXISTS idx_deliveries_unacked
            ON deliveries(group_name, acked, delivered_at);
        ",
    )?;

    Ok(())
}
