/// Overlapping refreshes against the shared snapshot cell.
#[path = "../src/models.rs"]
mod models;

#[path = "../src/normalize.rs"]
mod normalize;

#[path = "../src/staleness.rs"]
mod staleness;

#[path = "../src/reconcile.rs"]
mod reconcile;

#[path = "../src/state.rs"]
mod state;

use chrono::{Duration, TimeZone, Utc};
use models::{SortDirection, SortKey, ViewConfig};
use normalize::RawAccountRecord;
use reconcile::{reconcile, restamp, resort};
use serde_json::json;
use staleness::StalenessRule;
use state::SnapshotCell;
use std::sync::Arc;

fn batch(equity: f64) -> Vec<RawAccountRecord> {
    vec![serde_json::from_value(json!({
        "account_id": "1",
        "account_name": "Main",
        "equity": equity,
        "balance": 1000,
        "updated_at": "2025-06-01T12:00:00Z",
    }))
    .expect("raw record")]
}

#[tokio::test]
async fn slow_older_refresh_never_overwrites_newer_one() {
    let cell = Arc::new(SnapshotCell::new());
    let rule = StalenessRule::default();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 30).unwrap();

    let slow_seq = cell.begin_refresh();
    let fast_seq = cell.begin_refresh();
    assert!(fast_seq > slow_seq);

    let slow = {
        let cell = Arc::clone(&cell);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let snap = reconcile(&batch(500.0), slow_seq, now, &rule, ViewConfig::default());
            cell.publish(snap)
        })
    };
    let fast = {
        let cell = Arc::clone(&cell);
        tokio::spawn(async move {
            let snap = reconcile(&batch(900.0), fast_seq, now, &rule, ViewConfig::default());
            cell.publish(snap)
        })
    };

    assert!(fast.await.expect("fast task"));
    assert!(!slow.await.expect("slow task"));

    let current = cell.load();
    assert_eq!(current.seq, fast_seq);
    assert_eq!(current.net_equity_usd, 900.0);
}

#[tokio::test]
async fn concurrent_publishes_settle_on_highest_sequence() {
    let cell = Arc::new(SnapshotCell::new());
    let rule = StalenessRule::default();
    let now = Utc::now();

    let seqs: Vec<u64> = (0..16).map(|_| cell.begin_refresh()).collect();
    let mut tasks = tokio::task::JoinSet::new();
    for seq in seqs.iter().rev().copied() {
        let cell = Arc::clone(&cell);
        tasks.spawn(async move {
            tokio::task::yield_now().await;
            let snap = reconcile(&batch(seq as f64), seq, now, &rule, ViewConfig::default());
            cell.publish(snap);
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.expect("publish task");
    }

    let max = *seqs.iter().max().expect("non-empty");
    assert_eq!(cell.load().seq, max);
    assert_eq!(cell.load().net_equity_usd, max as f64);
}

#[test]
fn clock_tick_and_resort_keep_the_published_sequence() {
    let cell = SnapshotCell::new();
    let rule = StalenessRule::default();
    let fetched = Utc.with_ymd_and_hms(2025, 6, 1, 12, 1, 0).unwrap();

    let seq = cell.begin_refresh();
    assert!(cell.publish(reconcile(&batch(1000.0), seq, fetched, &rule, ViewConfig::default())));
    assert!(!cell.load().rows[0].offline);

    let later = fetched + Duration::minutes(10);
    let ticked = cell.update(|s| restamp(s, &rule, later));
    assert_eq!(ticked.seq, seq);
    assert!(ticked.rows[0].offline);

    let view = ViewConfig::new(SortKey::Equity, SortDirection::Descending);
    let sorted = cell.update(|s| resort(s, view));
    assert_eq!(sorted.seq, seq);
    assert_eq!(sorted.view, view);
    assert!(sorted.rows[0].offline);

    // A newer refresh still replaces the restamped copy.
    let next = cell.begin_refresh();
    assert!(cell.publish(reconcile(&batch(1200.0), next, later, &rule, view)));
    assert_eq!(cell.load().net_equity_usd, 1200.0);
}
