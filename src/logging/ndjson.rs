use crate::db::NewOutcome;
use crate::events::SendTask;
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub fn mirror_task(path: &Path, seq: i64, task: &SendTask) -> Result<()> {
    write_line(
        path,
        json!({
            "seq": seq,
            "ts": Utc::now().to_rfc3339(),
            "event": "task_queued",
            "campaign": task.campaign_id,
            "recipient": task.recipient,
            "template": task.template_id
        }),
    )
}

pub fn mirror_outcome(path: &Path, outcome: &NewOutcome) -> Result<()> {
    write_line(
        path,
        json!({
            "ts": Utc::now().to_rfc3339(),
            "event": "outcome",
            "campaign": outcome.campaign_id,
            "recipient": outcome.recipient,
            "account": outcome.account_id,
            "status": outcome.status,
            "error": outcome.error
        }),
    )
}

fn write_line(path: &Path, line: serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", line)?;
    Ok(())
}
