#![allow(dead_code)]

use chrono::Utc;
use herald::db::store::Store;
use herald::db::{AccountRow, ListRow, TemplateRow};
use serde_json::{Value, json};
use uuid::Uuid;

pub fn seed_account(store: &Store, id: &str, with_session: bool) {
    store
        .insert_account(&AccountRow {
            id: id.to_string(),
            api_id: "12345".to_string(),
            api_hash: "abcdef".to_string(),
            phone_number: format!("+1555{}", &Uuid::new_v4().simple().to_string()[..7]),
            session: with_session.then(|| format!("session-{id}")),
            proxy_url: None,
            is_active: true,
            health_status: "alive".to_string(),
            last_health_check: None,
            warmup_enabled: false,
            warmup_last_run: None,
            created_at: Utc::now(),
        })
        .unwrap();
}

pub fn seed_template(store: &Store, id: &str, content: &str) {
    store
        .insert_template(&TemplateRow {
            id: id.to_string(),
            name: format!("template {id}"),
            content: content.to_string(),
            created_at: Utc::now(),
        })
        .unwrap();
}

pub fn seed_list(store: &Store, id: &str, members: Vec<Value>) {
    store
        .insert_list(&ListRow {
            id: id.to_string(),
            name: format!("list {id}"),
            members,
            created_at: Utc::now(),
        })
        .unwrap();
}

pub fn member(username: &str) -> Value {
    json!({"username": username, "first_name": "Test"})
}
