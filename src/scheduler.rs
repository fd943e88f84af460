use crate::campaign;
use crate::db::recipient_identifier;
use crate::db::store::Store;
use crate::dispatch::pool::IdentityPool;
use crate::drip;
use crate::events::stream::TaskQueue;
use crate::warmup::WarmupRunner;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SchedulerInput {
    pub tick: Duration,
    pub drip_batch: usize,
    pub ndjson_log: Option<PathBuf>,
}

/// The orchestrator: runs forever at a fixed period. Must run as exactly one
/// instance; a second scheduler risks duplicate activations and drip sends.
pub fn run_scheduler_loop(
    store: &Store,
    queue: &TaskQueue,
    pool: &mut IdentityPool,
    rng: &mut StdRng,
    warmup: &mut dyn WarmupRunner,
    input: &SchedulerInput,
) -> Result<()> {
    println!("Scheduler started, tick every {}s", input.tick.as_secs());
    loop {
        scheduler_tick(store, queue, pool, rng, warmup, input, Utc::now());
        thread::sleep(input.tick);
    }
}

/// One tick: activation, then completion detection, then the drip batch,
/// then warm-up. Each phase is error-isolated so one failure never starves
/// the rest.
pub fn scheduler_tick(
    store: &Store,
    queue: &TaskQueue,
    pool: &mut IdentityPool,
    rng: &mut StdRng,
    warmup: &mut dyn WarmupRunner,
    input: &SchedulerInput,
    now: DateTime<Utc>,
) {
    if let Err(e) = activate_due_campaigns(store, queue, rng, now, input) {
        eprintln!("scheduler: campaign activation failed: {e:#}");
    }
    if let Err(e) = detect_completed_campaigns(store) {
        eprintln!("scheduler: completion detection failed: {e:#}");
    }
    if let Err(e) = drip::process_drip_batch(store, pool, now, input.drip_batch) {
        eprintln!("scheduler: drip batch failed: {e:#}");
    }
    if let Err(e) = warmup.run_cycle() {
        eprintln!("scheduler: warmup cycle failed: {e:#}");
    }
}

fn activate_due_campaigns(
    store: &Store,
    queue: &TaskQueue,
    rng: &mut StdRng,
    now: DateTime<Utc>,
    input: &SchedulerInput,
) -> Result<()> {
    for row in store.due_scheduled_campaigns(now)? {
        println!("Starting scheduled campaign: {} ({})", row.name, row.id);
        store.update_campaign_status(&row.id, "running")?;
        match campaign::queue_campaign_tasks(
            store,
            queue,
            rng,
            &row,
            input.ndjson_log.as_deref(),
        ) {
            Ok(queued) => println!("Campaign {} started with {queued} tasks", row.id),
            Err(e) => {
                eprintln!("scheduler: could not start campaign {}: {e:#}", row.id);
                store.update_campaign_status(&row.id, "failed")?;
            }
        }
    }
    Ok(())
}

/// A running campaign completes once its outcome count reaches the number of
/// identifier-bearing recipients on its list; an empty (or vanished) list
/// completes immediately.
fn detect_completed_campaigns(store: &Store) -> Result<()> {
    for row in store.running_campaigns()? {
        let target = store
            .get_list(&row.config.list_id)?
            .map(|list| {
                list.members
                    .iter()
                    .filter(|m| recipient_identifier(m).is_some())
                    .count() as i64
            })
            .unwrap_or(0);
        let done = store.count_outcomes(&row.id)?;
        if done >= target {
            store.update_campaign_status(&row.id, "completed")?;
            println!("Campaign {} completed ({done}/{target})", row.id);
        }
    }
    Ok(())
}
