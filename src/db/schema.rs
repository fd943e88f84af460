use rusqlite::{Connection, Result};

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            api_id TEXT NOT NULL,
            api_hash TEXT NOT NULL,
            phone_number TEXT UNIQUE NOT NULL,
            session TEXT,
            proxy_url TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            health_status TEXT NOT NULL DEFAULT 'unknown'
                CHECK(health_status IN ('alive','spam_block','flood_wait','banned','restricted','unknown','error','connection_error')),
            last_health_check TEXT,
            warmup_enabled INTEGER NOT NULL DEFAULT 0,
            warmup_last_run TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_lists (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            members_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK(status IN ('draft','scheduled','running','paused','stopped','completed','failed')),
            config_json TEXT NOT NULL,
            config_sha256 TEXT NOT NULL,
            scheduled_for TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ab_tests (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ab_test_variants (
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL REFERENCES ab_tests(id),
            template_id TEXT NOT NULL REFERENCES message_templates(id),
            weight INTEGER NOT NULL DEFAULT 50
        );

        -- campaign_id also carries drip pseudo-ids, so no FK here;
        -- campaign deletion cascades these rows in code.
        CREATE TABLE IF NOT EXISTS send_outcomes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id TEXT NOT NULL,
            account_id TEXT,
            recipient TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('sent','failed','skipped')),
            error TEXT,
            ts TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outcomes_campaign ON send_outcomes(campaign_id);

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS drip_campaigns (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            list_id TEXT NOT NULL REFERENCES user_lists(id),
            account_id TEXT NOT NULL REFERENCES accounts(id),
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK(status IN ('draft','active','paused','completed')),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS drip_steps (
            id TEXT PRIMARY KEY,
            drip_campaign_id TEXT NOT NULL REFERENCES drip_campaigns(id),
            template_id TEXT NOT NULL REFERENCES message_templates(id),
            delay_minutes INTEGER NOT NULL DEFAULT 0,
            step_order INTEGER NOT NULL,
            UNIQUE(drip_campaign_id, step_order)
        );

        CREATE TABLE IF NOT EXISTS drip_progress (
            id TEXT PRIMARY KEY,
            drip_campaign_id TEXT NOT NULL REFERENCES drip_campaigns(id),
            profile_json TEXT NOT NULL,
            current_step_order INTEGER NOT NULL,
            next_execution_time TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending','completed','failed','replied'))
        );

        CREATE INDEX IF NOT EXISTS idx_drip_progress_due
            ON drip_progress(status, next_execution_time);
        ",
    )?;

    Ok(())
}
