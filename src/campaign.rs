use crate::db::store::Store;
use crate::db::{CampaignConfig, CampaignRow, RotationStep, recipient_identifier};
use crate::dispatch::selection::{self, SelectionStrategy};
use crate::events::stream::TaskQueue;
use crate::events::{NewEvent, SEND_MESSAGE, SendTask};
use crate::logging::ndjson;
use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

/// Campaign-start request, read from a TOML file by the CLI or built
/// directly by callers.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignRequest {
    pub name: String,
    pub list_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub ab_test_id: Option<String>,
    #[serde(default)]
    pub rotation_steps: Option<Vec<RotationStep>>,
    pub account_ids: Vec<String>,
    #[serde(default = "default_delay")]
    pub delay: f64,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

fn default_delay() -> f64 {
    1.0
}

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub status: String,
    pub campaign_id: String,
}

pub fn load_request(path: &Path) -> Result<CampaignRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read campaign request {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

/// Start a campaign: configuration errors are rejected synchronously before
/// any task is queued; for an unscheduled start, exactly one task per
/// identifier-bearing recipient is appended before returning.
pub fn start_campaign(
    store: &Store,
    queue: &TaskQueue,
    rng: &mut StdRng,
    request: &CampaignRequest,
    ndjson_log: Option<&Path>,
) -> Result<StartOutcome> {
    if store.get_list(&request.list_id)?.is_none() {
        bail!("recipient list {} not found", request.list_id);
    }
    if request.account_ids.is_empty() {
        bail!("at least one account id is required");
    }
    if store.count_accounts(&request.account_ids)? != request.account_ids.len() {
        bail!("one or more accounts not found");
    }

    let config = CampaignConfig {
        list_id: request.list_id.clone(),
        template_id: request.template_id.clone(),
        ab_test_id: request.ab_test_id.clone(),
        rotation_steps: request.rotation_steps.clone(),
        account_ids: request.account_ids.clone(),
        delay: request.delay,
    };
    let strategy = selection::resolve_strategy(store, &config)?;

    let status = if request.scheduled_for.is_some() {
        "scheduled"
    } else {
        "running"
    };
    let config_json = serde_json::to_value(&config)?;
    let row = CampaignRow {
        id: Uuid::new_v4().to_string(),
        name: request.name.clone(),
        status: status.to_string(),
        config,
        config_sha256: sha256_hex(&config_json.to_string()),
        scheduled_for: request.scheduled_for,
        created_at: Utc::now(),
    };
    store.create_campaign(&row)?;

    if status == "running" {
        let queued = queue_tasks_with(store, queue, rng, &row, &strategy, ndjson_log)?;
        println!("Campaign {} started with {queued} tasks", row.id);
    }

    Ok(StartOutcome {
        status: status.to_string(),
        campaign_id: row.id,
    })
}

/// Fan out one task per recipient for an already-persisted campaign. Used by
/// the scheduler when a scheduled campaign comes due.
pub fn queue_campaign_tasks(
    store: &Store,
    queue: &TaskQueue,
    rng: &mut StdRng,
    campaign: &CampaignRow,
    ndjson_log: Option<&Path>,
) -> Result<usize> {
    let strategy = selection::resolve_strategy(store, &campaign.config)?;
    queue_tasks_with(store, queue, rng, campaign, &strategy, ndjson_log)
}

fn queue_tasks_with(
    store: &Store,
    queue: &TaskQueue,
    rng: &mut StdRng,
    campaign: &CampaignRow,
    strategy: &SelectionStrategy,
    ndjson_log: Option<&Path>,
) -> Result<usize> {
    let list = store
        .get_list(&campaign.config.list_id)?
        .ok_or_else(|| anyhow!("recipient list {} not found", campaign.config.list_id))?;

    let mut queued = 0;
    for (index, member) in list.members.iter().enumerate() {
        let Some(recipient) = recipient_identifier(member) else {
            continue;
        };
        let task = SendTask {
            campaign_id: campaign.id.clone(),
            recipient: recipient.clone(),
            template_id: selection::select_template(strategy, index, rng),
            account_ids: campaign.config.account_ids.clone(),
            delay: campaign.config.delay,
            variables: member.clone(),
            ab_test_id: campaign.config.ab_test_id.clone(),
        };
        let event = NewEvent {
            event_type: SEND_MESSAGE.to_string(),
            payload_json: serde_json::to_value(&task)?,
            dedupe_key: Some(format!("send:{}:{recipient}", campaign.id)),
        };
        if let Some(seq) = queue.append(&event)? {
            if let Some(path) = ndjson_log
                && let Err(e) = ndjson::mirror_task(path, seq, &task)
            {
                eprintln!("ndjson mirror failed: {e:#}");
            }
            queued += 1;
        }
    }
    Ok(queued)
}

pub fn stop_campaign(store: &Store, campaign_id: &str) -> Result<()> {
    let campaign = store
        .get_campaign(campaign_id)?
        .ok_or_else(|| anyhow!("campaign not found: {campaign_id}"))?;
    store.update_campaign_status(&campaign.id, "stopped")?;
    Ok(())
}

pub fn delete_campaign(store: &Store, campaign_id: &str) -> Result<()> {
    if store.get_campaign(campaign_id)?.is_none() {
        bail!("campaign not found: {campaign_id}");
    }
    store.delete_campaign(campaign_id)
}

pub fn inspect_campaign(store: &Store, campaign_id: &str) -> Result<()> {
    let campaign = store
        .get_campaign(campaign_id)?
        .ok_or_else(|| anyhow!("campaign not found: {campaign_id}"))?;
    let outcomes = store.list_outcomes(campaign_id)?;
    let sent = outcomes.iter().filter(|o| o.status == "sent").count();
    let failed = outcomes.iter().filter(|o| o.status == "failed").count();
    let skipped = outcomes.iter().filter(|o| o.status == "skipped").count();

    println!("campaign_id: {}", campaign.id);
    println!("name: {}", campaign.name);
    println!("status: {}", campaign.status);
    println!("list_id: {}", campaign.config.list_id);
    println!("accounts: {}", campaign.config.account_ids.join(", "));
    if let Some(ts) = campaign.scheduled_for {
        println!("scheduled_for: {}", ts.to_rfc3339());
    }
    println!("outcomes: sent={sent} failed={failed} skipped={skipped}");
    Ok(())
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
