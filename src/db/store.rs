use crate::db::{
    AbVariant, AccountRow, CampaignRow, DripCampaignRow, DripProgressRow, DripStepRow, ListRow,
    NewOutcome, OutcomeRow, TemplateRow, schema,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db parent dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    // -- accounts --

    pub fn insert_account(&self, row: &AccountRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO accounts (id, api_id, api_hash, phone_number, session, proxy_url, is_active,
                                   health_status, last_health_check, warmup_enabled, warmup_last_run, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.id,
                row.api_id,
                row.api_hash,
                row.phone_number,
                row.session,
                row.proxy_url,
                row.is_active,
                row.health_status,
                row.last_health_check,
                row.warmup_enabled,
                row.warmup_last_run,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Result<Option<AccountRow>> {
        self.conn
            .query_row(
                "SELECT id, api_id, api_hash, phone_number, session, proxy_url, is_active,
                        health_status, last_health_check, warmup_enabled, warmup_last_run, created_at
                 FROM accounts WHERE id = ?1",
                params![id],
                account_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn count_accounts(&self, ids: &[String]) -> Result<usize> {
        let mut found = 0usize;
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM accounts WHERE id = ?1")?;
        for id in ids {
            let n: i64 = stmt.query_row(params![id], |row| row.get(0))?;
            found += n as usize;
        }
        Ok(found)
    }

    // -- templates --

    pub fn insert_template(&self, row: &TemplateRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO message_templates (id, name, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![row.id, row.name, row.content, row.created_at],
        )?;
        Ok(())
    }

    pub fn get_template(&self, id: &str) -> Result<Option<TemplateRow>> {
        self.conn
            .query_row(
                "SELECT id, name, content, created_at FROM message_templates WHERE id = ?1",
                params![id],
                |row| {
                    Ok(TemplateRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        content: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // -- recipient lists --

    pub fn insert_list(&self, row: &ListRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_lists (id, name, members_json, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                row.id,
                row.name,
                serde_json::to_string(&row.members)?,
                row.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_list(&self, id: &str) -> Result<Option<ListRow>> {
        self.conn
            .query_row(
                "SELECT id, name, members_json, created_at FROM user_lists WHERE id = ?1",
                params![id],
                |row| {
                    let members: String = row.get(2)?;
                    Ok(ListRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        members: serde_json::from_str::<Vec<Value>>(&members)
                            .unwrap_or_default(),
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // -- campaigns --

    pub fn create_campaign(&self, row: &CampaignRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO campaigns (id, name, status, config_json, config_sha256, scheduled_for, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.id,
                row.name,
                row.status,
                serde_json::to_string(&row.config)?,
                row.config_sha256,
                row.scheduled_for,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_campaign(&self, id: &str) -> Result<Option<CampaignRow>> {
        self.conn
            .query_row(
                "SELECT id, name, status, config_json, config_sha256, scheduled_for, created_at
                 FROM campaigns WHERE id = ?1",
                params![id],
                campaign_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn update_campaign_status(&self, id: &str, status: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE campaigns SET status = ?2 WHERE id = ?1",
            params![id, status],
        )?;
        Ok(())
    }

    pub fn due_scheduled_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<CampaignRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, status, config_json, config_sha256, scheduled_for, created_at
             FROM campaigns
             WHERE status = 'scheduled' AND scheduled_for IS NOT NULL AND scheduled_for <= ?1
             ORDER BY scheduled_for ASC",
        )?;
        let rows = stmt
            .query_map(params![now], campaign_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn running_campaigns(&self) -> Result<Vec<CampaignRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, status, config_json, config_sha256, scheduled_for, created_at
             FROM campaigns WHERE status = 'running' ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], campaign_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_campaign(&self, id: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM send_outcomes WHERE campaign_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM campaigns WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    // -- A/B tests --

    pub fn insert_ab_test(&self, id: &str, name: &str, created_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ab_tests (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, name, created_at],
        )?;
        Ok(())
    }

    pub fn insert_ab_variant(
        &self,
        id: &str,
        test_id: &str,
        template_id: &str,
        weight: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ab_test_variants (id, test_id, template_id, weight) VALUES (?1, ?2, ?3, ?4)",
            params![id, test_id, template_id, weight],
        )?;
        Ok(())
    }

    pub fn ab_test_exists(&self, id: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ab_tests WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn ab_variants(&self, test_id: &str) -> Result<Vec<AbVariant>> {
        let mut stmt = self.conn.prepare(
            "SELECT template_id, weight FROM ab_test_variants WHERE test_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![test_id], |row| {
                Ok(AbVariant {
                    template_id: row.get(0)?,
                    weight: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- send outcomes --

    pub fn insert_outcome(&self, outcome: &NewOutcome) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO send_outcomes (campaign_id, account_id, recipient, status, error, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                outcome.campaign_id,
                outcome.account_id,
                outcome.recipient,
                outcome.status,
                outcome.error,
                Utc::now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn count_outcomes(&self, campaign_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM send_outcomes WHERE campaign_id = ?1",
                params![campaign_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn list_outcomes(&self, campaign_id: &str) -> Result<Vec<OutcomeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, campaign_id, account_id, recipient, status, error, ts
             FROM send_outcomes WHERE campaign_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![campaign_id], |row| {
                Ok(OutcomeRow {
                    id: row.get(0)?,
                    campaign_id: row.get(1)?,
                    account_id: row.get(2)?,
                    recipient: row.get(3)?,
                    status: row.get(4)?,
                    error: row.get(5)?,
                    ts: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- shared settings documents --

    pub fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_setting(&self, key: &str, value: &Value) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value_json) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
            params![key, value.to_string()],
        )?;
        Ok(())
    }

    // -- drip campaigns --

    pub fn insert_drip_campaign(&self, row: &DripCampaignRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO drip_campaigns (id, name, list_id, account_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.name,
                row.list_id,
                row.account_id,
                row.status,
                row.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_drip_campaign(&self, id: &str) -> Result<Option<DripCampaignRow>> {
        self.conn
            .query_row(
                "SELECT id, name, list_id, account_id, status, created_at
                 FROM drip_campaigns WHERE id = ?1",
                params![id],
                drip_campaign_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn update_drip_campaign_status(&self, id: &str, status: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE drip_campaigns SET status = ?2 WHERE id = ?1",
            params![id, status],
        )?;
        Ok(())
    }

    pub fn insert_drip_step(&self, row: &DripStepRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO drip_steps (id, drip_campaign_id, template_id, delay_minutes, step_order)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id,
                row.drip_campaign_id,
                row.template_id,
                row.delay_minutes,
                row.step_order
            ],
        )?;
        Ok(())
    }

    pub fn first_drip_step(&self, drip_campaign_id: &str) -> Result<Option<DripStepRow>> {
        self.conn
            .query_row(
                "SELECT id, drip_campaign_id, template_id, delay_minutes, step_order
                 FROM drip_steps WHERE drip_campaign_id = ?1
                 ORDER BY step_order ASC LIMIT 1",
                params![drip_campaign_id],
                drip_step_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn drip_step_at(
        &self,
        drip_campaign_id: &str,
        step_order: i64,
    ) -> Result<Option<DripStepRow>> {
        self.conn
            .query_row(
                "SELECT id, drip_campaign_id, template_id, delay_minutes, step_order
                 FROM drip_steps WHERE drip_campaign_id = ?1 AND step_order = ?2",
                params![drip_campaign_id, step_order],
                drip_step_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn next_drip_step_after(
        &self,
        drip_campaign_id: &str,
        step_order: i64,
    ) -> Result<Option<DripStepRow>> {
        self.conn
            .query_row(
                "SELECT id, drip_campaign_id, template_id, delay_minutes, step_order
                 FROM drip_steps WHERE drip_campaign_id = ?1 AND step_order > ?2
                 ORDER BY step_order ASC LIMIT 1",
                params![drip_campaign_id, step_order],
                drip_step_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn insert_drip_progress(&self, row: &DripProgressRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO drip_progress (id, drip_campaign_id, profile_json, current_step_order, next_execution_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.drip_campaign_id,
                row.profile.to_string(),
                row.current_step_order,
                row.next_execution_time,
                row.status,
            ],
        )?;
        Ok(())
    }

    pub fn update_drip_progress(&self, row: &DripProgressRow) -> Result<()> {
        self.conn.execute(
            "UPDATE drip_progress
             SET current_step_order = ?2, next_execution_time = ?3, status = ?4
             WHERE id = ?1",
            params![
                row.id,
                row.current_step_order,
                row.next_execution_time,
                row.status
            ],
        )?;
        Ok(())
    }

    /// Due pending rows whose owning campaign is active, oldest first.
    pub fn due_drip_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(DripProgressRow, DripCampaignRow)>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.drip_campaign_id, p.profile_json, p.current_step_order, p.next_execution_time, p.status,
                    c.id, c.name, c.list_id, c.account_id, c.status, c.created_at
             FROM drip_progress p
             JOIN drip_campaigns c ON p.drip_campaign_id = c.id
             WHERE p.status = 'pending' AND p.next_execution_time <= ?1 AND c.status = 'active'
             ORDER BY p.next_execution_time ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![now, limit as i64], |row| {
                let progress = drip_progress_from_row(row)?;
                Ok((
                    progress,
                    DripCampaignRow {
                        id: row.get(6)?,
                        name: row.get(7)?,
                        list_id: row.get(8)?,
                        account_id: row.get(9)?,
                        status: row.get(10)?,
                        created_at: row.get(11)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_drip_progress(&self, drip_campaign_id: &str) -> Result<Vec<DripProgressRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, drip_campaign_id, profile_json, current_step_order, next_execution_time, status
             FROM drip_progress WHERE drip_campaign_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![drip_campaign_id], drip_progress_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn drip_stats(&self, drip_campaign_id: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM drip_progress
             WHERE drip_campaign_id = ?1 GROUP BY status ORDER BY status ASC",
        )?;
        let rows = stmt
            .query_map(params![drip_campaign_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        id: row.get(0)?,
        api_id: row.get(1)?,
        api_hash: row.get(2)?,
        phone_number: row.get(3)?,
        session: row.get(4)?,
        proxy_url: row.get(5)?,
        is_active: row.get(6)?,
        health_status: row.get(7)?,
        last_health_check: row.get(8)?,
        warmup_enabled: row.get(9)?,
        warmup_last_run: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<CampaignRow> {
    let config: String = row.get(3)?;
    Ok(CampaignRow {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        config: serde_json::from_str(&config).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        config_sha256: row.get(4)?,
        scheduled_for: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn drip_campaign_from_row(row: &Row<'_>) -> rusqlite::Result<DripCampaignRow> {
    Ok(DripCampaignRow {
        id: row.get(0)?,
        name: row.get(1)?,
        list_id: row.get(2)?,
        account_id: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn drip_step_from_row(row: &Row<'_>) -> rusqlite::Result<DripStepRow> {
    Ok(DripStepRow {
        id: row.get(0)?,
        drip_campaign_id: row.get(1)?,
        template_id: row.get(2)?,
        delay_minutes: row.get(3)?,
        step_order: row.get(4)?,
    })
}

fn drip_progress_from_row(row: &Row<'_>) -> rusqlite::Result<DripProgressRow> {
    let profile: String = row.get(2)?;
    Ok(DripProgressRow {
        id: row.get(0)?,
        drip_campaign_id: row.get(1)?,
        profile: serde_json::from_str(&profile).unwrap_or(Value::Null),
        current_step_order: row.get(3)?,
        next_execution_time: row.get(4)?,
        status: row.get(5)?,
    })
}
