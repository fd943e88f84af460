use crate::db::store::Store;
use crate::db::{DripCampaignRow, DripProgressRow, NewOutcome, recipient_identifier};
use crate::dispatch::{pool::IdentityPool, render_template};
use crate::transport::{Connection, Delivery};
use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_BATCH: usize = 100;

/// Activate a drip campaign and enroll every member of its list: one pending
/// progress row per member, due after the first step's delay.
pub fn start_drip_campaign(store: &Store, campaign_id: &str, now: DateTime<Utc>) -> Result<usize> {
    let campaign = store
        .get_drip_campaign(campaign_id)?
        .ok_or_else(|| anyhow!("drip campaign not found: {campaign_id}"))?;
    if campaign.status == "active" {
        return Ok(0);
    }

    let first_step = store
        .first_drip_step(&campaign.id)?
        .ok_or_else(|| anyhow!("drip campaign {campaign_id} has no steps"))?;
    let members = store
        .get_list(&campaign.list_id)?
        .map(|list| list.members)
        .unwrap_or_default();

    let due = now + Duration::minutes(first_step.delay_minutes);
    let mut enrolled = 0;
    for member in members {
        store.insert_drip_progress(&DripProgressRow {
            id: Uuid::new_v4().to_string(),
            drip_campaign_id: campaign.id.clone(),
            profile: member,
            current_step_order: first_step.step_order,
            next_execution_time: Some(due),
            status: "pending".to_string(),
        })?;
        enrolled += 1;
    }

    store.update_drip_campaign_status(&campaign.id, "active")?;
    Ok(enrolled)
}

pub fn pause_drip_campaign(store: &Store, campaign_id: &str) -> Result<()> {
    if store.get_drip_campaign(campaign_id)?.is_none() {
        bail!("drip campaign not found: {campaign_id}");
    }
    store.update_drip_campaign_status(campaign_id, "paused")
}

/// One scheduler-tick worth of drip progression: a bounded batch of due
/// pending rows, grouped by owning account to amortize connection setup.
/// Returns the number of rows whose state advanced.
pub fn process_drip_batch(
    store: &Store,
    pool: &mut IdentityPool,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<usize> {
    let items = store.due_drip_items(now, limit)?;
    if items.is_empty() {
        return Ok(0);
    }
    println!("Processing {} drip items", items.len());

    let mut by_account: BTreeMap<String, Vec<(DripProgressRow, DripCampaignRow)>> = BTreeMap::new();
    for (progress, campaign) in items {
        by_account
            .entry(campaign.account_id.clone())
            .or_default()
            .push((progress, campaign));
    }

    let mut advanced = 0;
    for (account_id, group) in by_account {
        let conn = match pool.acquire(store, &account_id) {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                // rows stay pending and come back next tick
                eprintln!("drip: account {account_id} has no usable session, skipping its batch");
                continue;
            }
            Err(e) => {
                eprintln!("drip: account {account_id} connection failed, skipping its batch: {e:#}");
                continue;
            }
        };

        for (mut progress, campaign) in group {
            if let Err(e) = advance_progress(store, conn, &mut progress, &campaign, now) {
                eprintln!("drip: item {} failed: {e:#}", progress.id);
                progress.status = "failed".to_string();
                progress.next_execution_time = None;
            }
            if let Err(e) = store.update_drip_progress(&progress) {
                eprintln!("drip: could not persist item {}: {e:#}", progress.id);
                continue;
            }
            advanced += 1;
        }
    }
    Ok(advanced)
}

/// The per-row state machine. Terminal states (`completed`, `replied`,
/// `failed`) clear `next_execution_time`; a pending row always leaves with a
/// new due time and a step order pointing at an existing step.
fn advance_progress(
    store: &Store,
    conn: &dyn Connection,
    progress: &mut DripProgressRow,
    campaign: &DripCampaignRow,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(recipient) = recipient_identifier(&progress.profile) else {
        progress.status = "failed".to_string();
        progress.next_execution_time = None;
        return Ok(());
    };

    // stop-on-reply: an inbound last message ends the sequence regardless of
    // remaining steps; a failed probe never blocks progression
    match conn.last_message(&recipient) {
        Ok(Some(last)) if last.inbound => {
            println!("Recipient {recipient} replied, stopping drip");
            progress.status = "replied".to_string();
            progress.next_execution_time = None;
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => {
            eprintln!("drip: reply check failed for {recipient}: {e:#}");
        }
    }

    let Some(step) = store.drip_step_at(&campaign.id, progress.current_step_order)? else {
        progress.status = "failed".to_string();
        progress.next_execution_time = None;
        return Ok(());
    };

    // a failed send still advances; this step is not retried
    let (status, error) = match store.get_template(&step.template_id)? {
        Some(template) => {
            let content = render_template(&template.content, &progress.profile);
            match conn.send(&recipient, &content) {
                Delivery::Sent => ("sent", None),
                Delivery::RateLimited { wait_secs } => {
                    ("skipped", Some(format!("rate limited: wait {wait_secs}s")))
                }
                Delivery::Rejected { code, message } => {
                    ("failed", Some(format!("protocol error {code}: {message}")))
                }
                Delivery::Failed { message } => ("failed", Some(message)),
            }
        }
        None => (
            "failed",
            Some(format!("template {} not found", step.template_id)),
        ),
    };
    store.insert_outcome(&NewOutcome {
        campaign_id: format!("drip_{}_{}", campaign.id, progress.id),
        account_id: Some(campaign.account_id.clone()),
        recipient: recipient.clone(),
        status: status.to_string(),
        error,
    })?;

    match store.next_drip_step_after(&campaign.id, progress.current_step_order)? {
        Some(next) => {
            progress.current_step_order = next.step_order;
            progress.next_execution_time = Some(now + Duration::minutes(next.delay_minutes));
        }
        None => {
            progress.status = "completed".to_string();
            progress.next_execution_time = None;
        }
    }
    Ok(())
}
