mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{member, seed_account, seed_list, seed_template};
use herald::db::store::Store;
use herald::db::{DripCampaignRow, DripProgressRow, DripStepRow};
use herald::dispatch::pool::IdentityPool;
use herald::drip;
use herald::transport::sim::SimTransport;
use serde_json::json;
use std::path::Path;
use tempfile::tempdir;
use uuid::Uuid;

fn open_engine(db: &Path) -> (Store, IdentityPool, SimTransport) {
    let store = Store::open(db).unwrap();
    let transport = SimTransport::new();
    let pool = IdentityPool::new(Box::new(transport.clone()));
    (store, pool, transport)
}

fn seed_drip_campaign(store: &Store, id: &str, list_id: &str, account_id: &str) {
    store
        .insert_drip_campaign(&DripCampaignRow {
            id: id.to_string(),
            name: format!("drip {id}"),
            list_id: list_id.to_string(),
            account_id: account_id.to_string(),
            status: "draft".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();
}

fn seed_step(store: &Store, campaign_id: &str, template_id: &str, order: i64, delay_minutes: i64) {
    store
        .insert_drip_step(&DripStepRow {
            id: Uuid::new_v4().to_string(),
            drip_campaign_id: campaign_id.to_string(),
            template_id: template_id.to_string(),
            delay_minutes,
            step_order: order,
        })
        .unwrap();
}

#[test]
fn enrollment_snapshots_first_step_and_delay() {
    let tmp = tempdir().unwrap();
    let (store, _pool, _transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "step one");
    seed_list(&store, "l-1", vec![member("alice"), member("bob")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 30);

    let now = Utc::now();
    let enrolled = drip::start_drip_campaign(&store, "d-1", now).unwrap();
    assert_eq!(enrolled, 2);
    assert_eq!(
        store.get_drip_campaign("d-1").unwrap().unwrap().status,
        "active"
    );

    let rows = store.list_drip_progress("d-1").unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row.status, "pending");
        assert_eq!(row.current_step_order, 1);
        assert_eq!(
            row.next_execution_time.unwrap(),
            now + ChronoDuration::minutes(30)
        );
    }
}

#[test]
fn starting_a_stepless_campaign_is_rejected() {
    let tmp = tempdir().unwrap();
    let (store, _pool, _transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_list(&store, "l-1", vec![member("alice")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");

    let err = drip::start_drip_campaign(&store, "d-1", Utc::now()).unwrap_err();
    assert!(format!("{err}").contains("no steps"));
}

#[test]
fn due_step_advances_to_next_with_its_delay() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "step one, {first_name}");
    seed_template(&store, "t-2", "step two");
    seed_list(&store, "l-1", vec![member("alice")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);
    seed_step(&store, "d-1", "t-2", 2, 60);

    let enrolled_at = Utc::now();
    drip::start_drip_campaign(&store, "d-1", enrolled_at).unwrap();

    let dispatch_at = enrolled_at + ChronoDuration::seconds(5);
    let advanced = drip::process_drip_batch(&store, &mut pool, dispatch_at, 100).unwrap();
    assert_eq!(advanced, 1);

    let row = &store.list_drip_progress("d-1").unwrap()[0];
    assert_eq!(row.status, "pending");
    assert_eq!(row.current_step_order, 2);
    assert_eq!(
        row.next_execution_time.unwrap(),
        dispatch_at + ChronoDuration::minutes(60)
    );

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "step one, Test");
    assert_eq!(sent[0].account_id, "acc-1");

    // step outcome is logged under the drip pseudo campaign id
    let outcomes = store
        .list_outcomes(&format!("drip_d-1_{}", row.id))
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, "sent");

    // not due again until the 60 minute delay elapses
    let again = drip::process_drip_batch(
        &store,
        &mut pool,
        dispatch_at + ChronoDuration::minutes(59),
        100,
    )
    .unwrap();
    assert_eq!(again, 0);
}

#[test]
fn last_step_completes_and_clears_due_time() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, _transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "only step");
    seed_list(&store, "l-1", vec![member("alice")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);

    let now = Utc::now();
    drip::start_drip_campaign(&store, "d-1", now).unwrap();
    drip::process_drip_batch(&store, &mut pool, now + ChronoDuration::seconds(1), 100).unwrap();

    let row = &store.list_drip_progress("d-1").unwrap()[0];
    assert_eq!(row.status, "completed");
    assert!(row.next_execution_time.is_none());
}

#[test]
fn inbound_reply_terminates_regardless_of_remaining_steps() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "step one");
    seed_template(&store, "t-2", "step two");
    seed_list(&store, "l-1", vec![member("dave[replied]")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);
    seed_step(&store, "d-1", "t-2", 2, 0);

    let now = Utc::now();
    drip::start_drip_campaign(&store, "d-1", now).unwrap();
    drip::process_drip_batch(&store, &mut pool, now + ChronoDuration::seconds(1), 100).unwrap();

    let row = &store.list_drip_progress("d-1").unwrap()[0];
    assert_eq!(row.status, "replied");
    assert!(row.next_execution_time.is_none());
    assert!(transport.sent().is_empty());

    // terminal rows never re-enter a batch, however late the clock runs
    let later = drip::process_drip_batch(
        &store,
        &mut pool,
        now + ChronoDuration::days(30),
        100,
    )
    .unwrap();
    assert_eq!(later, 0);
}

#[test]
fn failed_reply_probe_does_not_block_progression() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "step one");
    seed_list(&store, "l-1", vec![member("erin[reply-err]")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);

    let now = Utc::now();
    drip::start_drip_campaign(&store, "d-1", now).unwrap();
    drip::process_drip_batch(&store, &mut pool, now + ChronoDuration::seconds(1), 100).unwrap();

    assert_eq!(transport.sent().len(), 1);
    let row = &store.list_drip_progress("d-1").unwrap()[0];
    assert_eq!(row.status, "completed");
}

#[test]
fn send_failure_still_advances_without_retry() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, _transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "step one");
    seed_template(&store, "t-2", "step two");
    seed_list(&store, "l-1", vec![member("eve[drop]")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);
    seed_step(&store, "d-1", "t-2", 2, 15);

    let now = Utc::now();
    drip::start_drip_campaign(&store, "d-1", now).unwrap();
    let dispatch_at = now + ChronoDuration::seconds(1);
    drip::process_drip_batch(&store, &mut pool, dispatch_at, 100).unwrap();

    let row = &store.list_drip_progress("d-1").unwrap()[0];
    assert_eq!(row.status, "pending");
    assert_eq!(row.current_step_order, 2);

    let outcomes = store
        .list_outcomes(&format!("drip_d-1_{}", row.id))
        .unwrap();
    assert_eq!(outcomes[0].status, "failed");
}

#[test]
fn missing_step_and_missing_recipient_fail_the_row() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, _transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "step one");
    seed_list(&store, "l-1", vec![json!({"note": "no identifier"})]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);

    let now = Utc::now();
    drip::start_drip_campaign(&store, "d-1", now).unwrap();

    // a row whose step order points at nothing
    store
        .insert_drip_progress(&DripProgressRow {
            id: "p-dangling".to_string(),
            drip_campaign_id: "d-1".to_string(),
            profile: member("frank"),
            current_step_order: 99,
            next_execution_time: Some(now),
            status: "pending".to_string(),
        })
        .unwrap();

    drip::process_drip_batch(&store, &mut pool, now + ChronoDuration::seconds(1), 100).unwrap();

    for row in store.list_drip_progress("d-1").unwrap() {
        assert_eq!(row.status, "failed");
        assert!(row.next_execution_time.is_none());
    }
    assert_eq!(
        store.drip_stats("d-1").unwrap(),
        vec![("failed".to_string(), 2)]
    );
}

#[test]
fn paused_campaign_rows_are_not_selected() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, _transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", true);
    seed_template(&store, "t-1", "step one");
    seed_list(&store, "l-1", vec![member("alice")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);

    let now = Utc::now();
    drip::start_drip_campaign(&store, "d-1", now).unwrap();
    drip::pause_drip_campaign(&store, "d-1").unwrap();

    let advanced =
        drip::process_drip_batch(&store, &mut pool, now + ChronoDuration::seconds(1), 100)
            .unwrap();
    assert_eq!(advanced, 0);
}

#[test]
fn broken_account_leaves_rows_pending_for_next_tick() {
    let tmp = tempdir().unwrap();
    let (store, mut pool, _transport) = open_engine(&tmp.path().join("state.db"));

    seed_account(&store, "acc-1", false);
    seed_template(&store, "t-1", "step one");
    seed_list(&store, "l-1", vec![member("alice")]);
    seed_drip_campaign(&store, "d-1", "l-1", "acc-1");
    seed_step(&store, "d-1", "t-1", 1, 0);

    let now = Utc::now();
    drip::start_drip_campaign(&store, "d-1", now).unwrap();
    let advanced =
        drip::process_drip_batch(&store, &mut pool, now + ChronoDuration::seconds(1), 100)
            .unwrap();
    assert_eq!(advanced, 0);

    let row = &store.list_drip_progress("d-1").unwrap()[0];
    assert_eq!(row.status, "pending");
    assert!(row.next_execution_time.is_some());
}
