/// main.rs – Entry point for the AOT account terminal.
///
/// Orchestrates startup, the Realtime change feed, full-collection refreshes,
/// the staleness clock, the price poller and the live ratatui dashboard.
mod config;
mod dashboard;
mod models;
mod normalize;
mod price;
mod reconcile;
mod refresh;
mod staleness;
mod state;
mod store;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use crossterm::event::{Event, EventStream};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use config::Settings;
use dashboard::Action;
use models::{AppState, PriceReading, SortKey, ViewConfig};
use price::PriceFeed;
use reconcile::{reconcile, restamp};
use refresh::{apply_outcome, apply_view, start_refresh, RefreshOutcome};
use staleness::StalenessRule;
use state::SnapshotCell;
use store::{StoreClient, StoreSignal};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "aot-terminal",
    about = "Live trading-account terminal – equity, drawdown and connectivity per account",
    version
)]
struct Cli {
    /// Disable the interactive dashboard and log each refreshed view instead.
    #[arg(long, default_value_t = false)]
    no_dashboard: bool,

    /// Fetch once, print the reconciled table to stdout and exit.
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Sort key: default, equity, drawdown or name.
    #[arg(long)]
    sort: Option<SortKey>,

    /// Sort descending.
    #[arg(long, default_value_t = false)]
    desc: bool,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load settings (YAML + env override)
    let mut settings = Settings::load(&cli.config)?;
    settings.override_view(cli.sort, cli.desc);

    let use_dashboard = !cli.no_dashboard && !cli.once;
    init_logging(&settings, use_dashboard)?;

    if !settings.has_store() {
        bail!("store.url (or SUPABASE_URL) and SUPABASE_ANON_KEY must both be set");
    }
    let store_key = settings.store_key.clone().unwrap_or_default();
    let client = StoreClient::new(&settings.store, store_key)?;
    let rule = settings.staleness.rule();

    if cli.once {
        return print_once(&client, &rule, settings.view).await;
    }

    info!(
        "Watching {}.{} via channel {}",
        settings.store.schema, settings.store.table, settings.store.channel
    );

    let cell = Arc::new(SnapshotCell::new());
    let mut state = AppState {
        title: settings.terminal.title.clone(),
        started_at: Some(Utc::now()),
        view: settings.view,
        price: PriceReading::unavailable(settings.price.symbol.clone()),
        ..AppState::default()
    };

    // Background producers
    let mut refreshes: JoinSet<RefreshOutcome> = JoinSet::new();
    start_refresh(&mut refreshes, &cell, &client, rule, state.view, &mut state, "startup");

    let (mut rt_rx, rt_handle) = client.start_realtime();
    state.add_log("Realtime subscription started");

    let (mut price_rx, price_handle) = match PriceFeed::from_config(&settings.price)? {
        Some(feed) => {
            let every = Duration::from_secs_f64(settings.price.poll_interval_seconds);
            let (rx, handle) = feed.spawn(every);
            (Some(rx), Some(handle))
        }
        None => (None, None),
    };

    let mut clock_ticker =
        tokio::time::interval(Duration::from_secs_f64(settings.terminal.clock_tick_seconds));
    clock_ticker.tick().await;

    // Dashboard setup (unless --no-dashboard)
    let mut terminal = if use_dashboard {
        Some(dashboard::setup_terminal()?)
    } else {
        None
    };
    let mut event_stream = terminal.as_ref().map(|_| EventStream::new());
    let mut dash_ticker =
        tokio::time::interval(Duration::from_secs_f64(settings.dashboard.refresh_rate));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Terminal started.  Press 'q' to quit.");

    // -----------------------------------------------------------------------
    // Main event loop
    // -----------------------------------------------------------------------
    loop {
        if let Some(ref mut term) = terminal {
            if let Err(e) = term.draw(|f| dashboard::render(f, &state)) {
                error!("Render error: {e}");
                break;
            }
        }

        tokio::select! {
            _ = &mut ctrl_c => break,

            // ── Dashboard keyboard events ──────────────────────────────────
            Some(Ok(event)) = next_event(&mut event_stream) => {
                let view = state.view;
                match dashboard::handle_event(&event) {
                    Some(Action::Quit) => break,
                    Some(Action::CycleSort) => apply_view(&cell, &mut state, view.with_next_key()),
                    Some(Action::FlipDirection) => {
                        apply_view(&cell, &mut state, view.with_flipped_direction())
                    }
                    Some(Action::DefaultOrder) => apply_view(&cell, &mut state, ViewConfig::default()),
                    Some(Action::Refresh) => {
                        start_refresh(&mut refreshes, &cell, &client, rule, view, &mut state, "manual");
                    }
                    None => {}
                }
            }

            // ── Dashboard redraw tick ──────────────────────────────────────
            _ = dash_ticker.tick() => {}

            // ── Realtime change notifications ──────────────────────────────
            Some(signal) = rt_rx.recv() => match signal {
                StoreSignal::Subscribed => {
                    state.realtime_connected = true;
                    state.add_log("Subscribed to change feed");
                    let view = state.view;
                    start_refresh(&mut refreshes, &cell, &client, rule, view, &mut state, "subscribed");
                }
                StoreSignal::Changed => {
                    let view = state.view;
                    start_refresh(&mut refreshes, &cell, &client, rule, view, &mut state, "change");
                }
                StoreSignal::Disconnected => {
                    if state.realtime_connected {
                        state.add_log("Change feed disconnected");
                    }
                    state.realtime_connected = false;
                }
            },

            // ── Completed refreshes ────────────────────────────────────────
            Some(joined) = refreshes.join_next(), if !refreshes.is_empty() => match joined {
                Ok(outcome) => apply_outcome(outcome, &cell, &mut state, use_dashboard),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Refresh task failed: {e}"),
            },

            // ── Staleness clock ────────────────────────────────────────────
            _ = clock_ticker.tick() => {
                let now = Utc::now();
                state.snapshot = cell.update(|s| restamp(s, &rule, now));
                debug!(
                    "Clock tick: {}/{} online",
                    state.snapshot.online_count(),
                    state.snapshot.rows.len()
                );
            }

            // ── Price feed ─────────────────────────────────────────────────
            reading = price_changed(&mut price_rx) => {
                state.price = reading;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown – every producer goes down together
    // -----------------------------------------------------------------------
    rt_handle.abort();
    if let Some(handle) = price_handle {
        handle.abort();
    }
    refreshes.abort_all();

    if let Some(ref mut term) = terminal {
        dashboard::teardown_terminal(term)?;
    }

    info!(
        "Terminal closed – {} refresh(es) started, last view #{}",
        state.refreshes_started, state.snapshot.seq
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_logging(settings: &Settings, to_file: bool) -> Result<()> {
    // Respects RUST_LOG; falls back to config
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.terminal.log_level.to_lowercase()));

    if to_file {
        // The dashboard owns stdout, so logs go to a file.
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&settings.terminal.log_file)
            .with_context(|| format!("opening log file {}", settings.terminal.log_file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// One-shot mode
// ---------------------------------------------------------------------------

async fn print_once(client: &StoreClient, rule: &StalenessRule, view: ViewConfig) -> Result<()> {
    let raw = client.fetch_accounts().await?;
    let snapshot = reconcile(&raw, 1, Utc::now(), rule, view);

    println!(
        "{:<22} {:>12} {:>4} {:>14} {:>14} {:>14} {:>8} {:>8} {:>9} {:>8}",
        "NAME", "ID", "CUR", "EQUITY", "BALANCE", "EQUITY $", "DD %", "VOL", "SYNC", "STATUS"
    );
    for row in &snapshot.rows {
        let acc = &row.account;
        let name = if acc.is_demo {
            format!("{} [DEMO]", acc.display_name())
        } else {
            acc.display_name().to_string()
        };
        println!(
            "{:<22} {:>12} {:>4} {:>14} {:>14} {:>14} {:>8.2} {:>8.2} {:>9} {:>8}",
            name,
            acc.id,
            acc.denomination(),
            dashboard::format_money(acc.equity, 2),
            dashboard::format_money(acc.balance, 2),
            dashboard::format_money(row.equity_usd, 2),
            row.drawdown_pct,
            acc.total_lots,
            acc.last_updated_at
                .map(dashboard::local_time)
                .unwrap_or_else(|| "--:--:--".into()),
            if row.offline { "OFFLINE" } else { "ONLINE" },
        );
    }
    println!(
        "\nNET REAL EQUITY (USD): ${}",
        dashboard::format_money(snapshot.net_equity_usd, 2)
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// select! helpers for optional sources
// ---------------------------------------------------------------------------

async fn next_event(stream: &mut Option<EventStream>) -> Option<std::io::Result<Event>> {
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

async fn price_changed(rx: &mut Option<watch::Receiver<PriceReading>>) -> PriceReading {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => rx.borrow_and_update().clone(),
            // Poller gone; keep the last reading.
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}
