/// refresh.rs – Full-collection refreshes and how their results reach the UI.
///
/// Every signal (startup, change notice, resubscribe, manual key) spawns one
/// refresh task. Tasks may overlap; the snapshot cell's sequence check keeps a
/// slow older fetch from replacing a newer view.
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dashboard;
use crate::models::{AccountSnapshot, AppState, ViewConfig};
use crate::reconcile::{reconcile, resort};
use crate::staleness::StalenessRule;
use crate::state::SnapshotCell;
use crate::store::StoreClient;

#[derive(Debug)]
pub enum RefreshOutcome {
    Published { seq: u64, accounts: usize, raw: usize },
    /// A newer refresh was already published; this result was dropped.
    Superseded { seq: u64 },
    Failed { seq: u64, error: String },
}

pub fn start_refresh(
    tasks: &mut JoinSet<RefreshOutcome>,
    cell: &Arc<SnapshotCell>,
    client: &StoreClient,
    rule: StalenessRule,
    view: ViewConfig,
    state: &mut AppState,
    reason: &str,
) {
    let seq = cell.begin_refresh();
    state.refreshes_started += 1;
    debug!("Refresh #{seq} started ({reason})");

    let cell = Arc::clone(cell);
    let client = client.clone();
    tasks.spawn(async move { run_refresh(seq, &client, &cell, &rule, view).await });
}

async fn run_refresh(
    seq: u64,
    client: &StoreClient,
    cell: &SnapshotCell,
    rule: &StalenessRule,
    view: ViewConfig,
) -> RefreshOutcome {
    let raw = match client.fetch_accounts().await {
        Ok(raw) => raw,
        Err(e) => {
            return RefreshOutcome::Failed {
                seq,
                error: format!("{e:#}"),
            }
        }
    };

    let snapshot = reconcile(&raw, seq, Utc::now(), rule, view);
    let accounts = snapshot.rows.len();
    if cell.publish(snapshot) {
        RefreshOutcome::Published {
            seq,
            accounts,
            raw: raw.len(),
        }
    } else {
        RefreshOutcome::Superseded { seq }
    }
}

pub fn apply_outcome(
    outcome: RefreshOutcome,
    cell: &SnapshotCell,
    state: &mut AppState,
    quiet: bool,
) {
    match outcome {
        RefreshOutcome::Published { seq, accounts, raw } => {
            state.last_error = None;
            let view = state.view;
            // The view may have changed while the fetch was in flight.
            state.snapshot = if cell.load().view == view {
                cell.load()
            } else {
                cell.update(|s| resort(s, view))
            };
            state.add_log(format!(
                "Refreshed #{seq}: {accounts} account(s) from {raw} row(s)"
            ));
            info!("Refresh #{seq} published: {accounts} account(s) from {raw} row(s)");
            if !quiet {
                log_snapshot(&state.snapshot);
            }
        }
        RefreshOutcome::Superseded { seq } => {
            state.add_log(format!("Discarded refresh #{seq} (newer view already shown)"));
            debug!("Refresh #{seq} superseded");
        }
        RefreshOutcome::Failed { seq, error } => {
            warn!("Refresh #{seq} failed, keeping previous view: {error}");
            state.add_log(format!("ERROR refresh #{seq} failed: {error}"));
            state.last_error = Some(error);
        }
    }
}

pub fn apply_view(cell: &SnapshotCell, state: &mut AppState, view: ViewConfig) {
    state.view = view;
    state.snapshot = cell.update(|s| resort(s, view));
    state.add_log(format!("Sort: {}", view.label()));
}

fn log_snapshot(snapshot: &AccountSnapshot) {
    info!(
        "Net real equity ${} – {}/{} online",
        dashboard::format_money(snapshot.net_equity_usd, 2),
        snapshot.online_count(),
        snapshot.rows.len()
    );
    for row in &snapshot.rows {
        info!(
            "  {:<20} {:>10} {} eq=${} bal=${} dd={:.2}% lots={:.2} {}{}",
            row.account.display_name(),
            row.account.id,
            row.account.denomination(),
            dashboard::format_money(row.equity_usd, 2),
            dashboard::format_money(row.balance_usd, 2),
            row.drawdown_pct,
            row.account.total_lots,
            if row.offline { "OFFLINE" } else { "ONLINE" },
            if row.account.is_demo { " DEMO" } else { "" },
        );
    }
}
