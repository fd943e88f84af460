pub mod schema;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: String,
    pub api_id: String,
    pub api_hash: String,
    pub phone_number: String,
    pub session: Option<String>,
    pub proxy_url: Option<String>,
    pub is_active: bool,
    pub health_status: String,
    pub last_health_check: Option<DateTime<Utc>>,
    pub warmup_enabled: bool,
    pub warmup_last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub id: String,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ListRow {
    pub id: String,
    pub name: String,
    pub members: Vec<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CampaignRow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub config: CampaignConfig,
    pub config_sha256: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The configuration blob frozen onto a campaign row at start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
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
}

fn default_delay() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationStep {
    pub template_id: String,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct AbVariant {
    pub template_id: String,
    pub weight: i64,
}

#[derive(Debug, Clone)]
pub struct OutcomeRow {
    pub id: i64,
    pub campaign_id: String,
    pub account_id: Option<String>,
    pub recipient: String,
    pub status: String,
    pub error: Option<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOutcome {
    pub campaign_id: String,
    pub account_id: Option<String>,
    pub recipient: String,
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DripCampaignRow {
    pub id: String,
    pub name: String,
    pub list_id: String,
    pub account_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DripStepRow {
    pub id: String,
    pub drip_campaign_id: String,
    pub template_id: String,
    pub delay_minutes: i64,
    pub step_order: i64,
}

#[derive(Debug, Clone)]
pub struct DripProgressRow {
    pub id: String,
    pub drip_campaign_id: String,
    pub profile: Value,
    pub current_step_order: i64,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub status: String,
}

/// Recipient identifier for a profile record: phone first, then username.
pub fn recipient_identifier(profile: &Value) -> Option<String> {
    for key in ["phone", "username"] {
        if let Some(v) = profile.get(key).and_then(|v| v.as_str())
            && !v.is_empty()
        {
            return Some(v.to_string());
        }
    }
    None
}
