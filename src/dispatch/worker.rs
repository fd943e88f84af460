use crate::db::NewOutcome;
use crate::db::store::Store;
use crate::dispatch::{delay, filters, pool::IdentityPool, render_template};
use crate::events::stream::TaskQueue;
use crate::events::{EventRow, SEND_MESSAGE, SendTask};
use crate::logging::ndjson;
use crate::transport::Delivery;
use anyhow::Result;
use rand::Rng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerInput {
    pub group: String,
    pub consumer_id: String,
    pub block_timeout: Duration,
    pub ndjson_log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: &'static str,
    pub account_id: Option<String>,
    pub error: Option<String>,
}

fn failed(account_id: Option<String>, error: String) -> TaskOutcome {
    TaskOutcome {
        status: "failed",
        account_id,
        error: Some(error),
    }
}

/// The dispatch consumer: pull one task at a time, run the send pipeline,
/// persist the outcome, ack, pause. Never terminates; iteration failures are
/// logged and the loop backs off briefly.
pub fn run_worker_loop(
    store: &Store,
    queue: &TaskQueue,
    pool: &mut IdentityPool,
    rng: &mut StdRng,
    input: &WorkerInput,
) -> Result<()> {
    queue.create_group(&input.group)?;
    println!(
        "Worker {} started, listening on group {}",
        input.consumer_id, input.group
    );
    loop {
        match queue.read_next(&input.group, &input.consumer_id, input.block_timeout) {
            Ok(batch) => {
                for (seq, event) in batch {
                    if let Err(e) = handle_delivery(store, queue, pool, rng, input, seq, &event) {
                        eprintln!("worker {}: {e:#}", input.consumer_id);
                        thread::sleep(ERROR_BACKOFF);
                    }
                }
            }
            Err(e) => {
                eprintln!("worker {}: queue read failed: {e:#}", input.consumer_id);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

/// Process everything currently claimable without blocking, then return the
/// number of tasks handled. The long-running loop is this, repeated.
pub fn drain_available(
    store: &Store,
    queue: &TaskQueue,
    pool: &mut IdentityPool,
    rng: &mut StdRng,
    input: &WorkerInput,
) -> Result<usize> {
    queue.create_group(&input.group)?;
    let mut processed = 0;
    loop {
        let batch = queue.read_next(&input.group, &input.consumer_id, Duration::ZERO)?;
        if batch.is_empty() {
            return Ok(processed);
        }
        for (seq, event) in batch {
            handle_delivery(store, queue, pool, rng, input, seq, &event)?;
            processed += 1;
        }
    }
}

fn handle_delivery(
    store: &Store,
    queue: &TaskQueue,
    pool: &mut IdentityPool,
    rng: &mut StdRng,
    input: &WorkerInput,
    seq: i64,
    event: &EventRow,
) -> Result<()> {
    if event.event_type != SEND_MESSAGE {
        queue.ack(&input.group, seq)?;
        return Ok(());
    }
    let task: SendTask = match serde_json::from_value(event.payload_json.clone()) {
        Ok(task) => task,
        Err(e) => {
            // an unparseable payload can never succeed; discard it
            eprintln!("worker {}: dropping malformed task {seq}: {e}", input.consumer_id);
            queue.ack(&input.group, seq)?;
            return Ok(());
        }
    };

    let outcome = process_task(store, pool, rng, &task);
    let row = NewOutcome {
        campaign_id: task.campaign_id.clone(),
        account_id: outcome.account_id.clone(),
        recipient: task.recipient.clone(),
        status: outcome.status.to_string(),
        error: outcome.error.clone(),
    };
    match store.insert_outcome(&row) {
        Ok(_) => {
            if let Some(path) = input.ndjson_log.as_deref()
                && let Err(e) = ndjson::mirror_outcome(path, &row)
            {
                eprintln!("worker {}: ndjson mirror failed: {e:#}", input.consumer_id);
            }
            // ack strictly after the outcome row is committed, so a crash in
            // between redelivers rather than losing the attempt
            queue.ack(&input.group, seq)?;
        }
        Err(e) => {
            eprintln!(
                "worker {}: outcome persist failed, leaving {seq} unacked: {e:#}",
                input.consumer_id
            );
        }
    }

    let pause = delay::resolve(store, task.delay, rng);
    if !pause.is_zero() {
        thread::sleep(pause);
    }
    Ok(())
}

/// The per-task send pipeline. Store failures become a `failed` outcome;
/// nothing in here escalates out of the task.
pub fn process_task(
    store: &Store,
    pool: &mut IdentityPool,
    rng: &mut StdRng,
    task: &SendTask,
) -> TaskOutcome {
    match run_pipeline(store, pool, rng, task) {
        Ok(outcome) => outcome,
        Err(e) => failed(None, format!("{e:#}")),
    }
}

fn run_pipeline(
    store: &Store,
    pool: &mut IdentityPool,
    rng: &mut StdRng,
    task: &SendTask,
) -> Result<TaskOutcome> {
    if task.account_ids.is_empty() {
        return Ok(failed(None, "no candidate accounts on task".to_string()));
    }
    let Some(template) = store.get_template(&task.template_id)? else {
        return Ok(failed(
            None,
            format!("template {} not found", task.template_id),
        ));
    };

    let account_id = task.account_ids[rng.gen_range(0..task.account_ids.len())].clone();
    let content = render_template(&template.content, &task.variables);

    let conn = match pool.acquire(store, &account_id) {
        Ok(Some(conn)) => conn,
        Ok(None) => {
            return Ok(failed(
                Some(account_id.clone()),
                format!("could not initialize connection for account {account_id}"),
            ));
        }
        Err(e) => return Ok(failed(Some(account_id), format!("{e:#}"))),
    };

    // best-effort resolution; an unresolvable identity yields no verdict
    if let Ok(identity) = conn.resolve(&task.recipient) {
        let settings = filters::load(store);
        if let Some(reason) = filters::evaluate(&settings, &identity) {
            println!("Skipping {}: {reason}", task.recipient);
            return Ok(TaskOutcome {
                status: "skipped",
                account_id: Some(account_id),
                error: Some(reason),
            });
        }
    }

    let outcome = match conn.send(&task.recipient, &content) {
        Delivery::Sent => {
            println!("Sent to {} via account {account_id}", task.recipient);
            TaskOutcome {
                status: "sent",
                account_id: Some(account_id),
                error: None,
            }
        }
        Delivery::RateLimited { wait_secs } => {
            println!("Rate limit hit, waiting {wait_secs}s");
            thread::sleep(Duration::from_secs(wait_secs));
            TaskOutcome {
                status: "skipped",
                account_id: Some(account_id),
                error: Some(format!("rate limited: wait {wait_secs}s")),
            }
        }
        Delivery::Rejected { code, message } => failed(
            Some(account_id),
            format!("protocol error {code}: {message}"),
        ),
        Delivery::Failed { message } => failed(Some(account_id), message),
    };
    Ok(outcome)
}
