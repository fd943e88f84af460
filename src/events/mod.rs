pub mod schema;
pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SEND_MESSAGE: &str = "send_message";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub seq: i64,
    pub ts: String,
    pub event_type: String,
    pub payload_json: Value,
    pub dedupe_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub payload_json: Value,
    pub dedupe_key: Option<String>,
}

impl NewEvent {
    pub fn simple(event_type: &str, payload_json: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload_json,
            dedupe_key: None,
        }
    }
}

/// One recipient/template/account-pool unit of work. Exists only as a queue
/// event payload, never as a standalone row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTask {
    pub campaign_id: String,
    pub recipient: String,
    pub template_id: String,
    pub account_ids: Vec<String>,
    #[serde(default)]
    pub delay: f64,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub ab_test_id: Option<String>,
}
