/// dashboard.rs – ratatui live terminal dashboard.
///
/// Layout:
///  ┌─ Header ──────────────────────────────────────────────────────────┐
///  │ Title │ Net real equity │ Price │ RT status │ Sort │ Last refresh  │
///  ├─ Accounts ────────────────────────────────────────────────────────┤
///  │ one row per canonical account                                     │
///  ├─ Logs ────────────────────────────────────────────────────────────┤
///  │ timestamped log lines                                             │
///  └───────────────────────────────────────────────────────────────────┘
use chrono::{DateTime, Local, Utc};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table},
    Frame, Terminal,
};
use std::io::{self, Stdout};

use crate::models::{AccountView, AppState, PriceReading};

pub type CrossTerm = Terminal<CrosstermBackend<Stdout>>;

// ---------------------------------------------------------------------------
// Setup / teardown
// ---------------------------------------------------------------------------

pub fn setup_terminal() -> anyhow::Result<CrossTerm> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

pub fn teardown_terminal(terminal: &mut CrossTerm) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Key event handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    CycleSort,
    FlipDirection,
    DefaultOrder,
    Refresh,
}

/// Map a terminal event to a dashboard action.
pub fn handle_event(event: &Event) -> Option<Action> {
    let Event::Key(k) = event else {
        return None;
    };
    if k.kind == KeyEventKind::Release {
        return None;
    }
    match k.code {
        KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('s') | KeyCode::Char('S') => Some(Action::CycleSort),
        KeyCode::Char('d') | KeyCode::Char('D') => Some(Action::FlipDirection),
        KeyCode::Char('0') => Some(Action::DefaultOrder),
        KeyCode::Char('r') | KeyCode::Char('R') => Some(Action::Refresh),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

pub fn render(frame: &mut Frame, state: &AppState) {
    let area = frame.size();

    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(6),
            Constraint::Length(10),
        ])
        .split(area);

    render_header(frame, outer[0], state);
    render_accounts(frame, outer[1], state);
    render_logs(frame, outer[2], state);
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn render_header(frame: &mut Frame, area: Rect, state: &AppState) {
    let snap = &state.snapshot;

    let rt_status = if state.realtime_connected {
        Span::styled("RT●", Style::default().fg(Color::Green))
    } else {
        Span::styled("RT○", Style::default().fg(Color::Red))
    };

    let refreshed = snap
        .fetched_at
        .map(|t| format!("#{} {}", snap.seq, local_time(t)))
        .unwrap_or_else(|| "waiting…".into());
    let checked = snap
        .evaluated_at
        .map(local_time)
        .unwrap_or_else(|| "--:--:--".into());
    let uptime = state
        .started_at
        .map(|t| {
            let secs = (Utc::now() - t).num_seconds();
            format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
        })
        .unwrap_or_else(|| "—".into());

    let top = Line::from(vec![
        Span::styled(
            format!("  {}  │ ", state.title),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("NET REAL EQUITY (USD) ", Style::default().fg(Color::Blue)),
        Span::styled(
            format!("${}  │ ", format_money(snap.net_equity_usd, 2)),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("{}  │ ", price_label(&state.price))),
        Span::raw(format!(
            "Online: {}/{}  │ ",
            snap.online_count(),
            snap.rows.len()
        )),
        rt_status,
    ]);

    let status = match &state.last_error {
        Some(err) => Span::styled(
            format!("  ERROR {err}"),
            Style::default().fg(Color::Red),
        ),
        None => Span::styled(
            format!("  Refresh {refreshed}"),
            Style::default().fg(Color::DarkGray),
        ),
    };
    let bottom = Line::from(vec![
        status,
        Span::raw(format!("  │ Checked {checked}  │ Up {uptime}")),
        Span::raw(format!("  │ Sort: {}", state.view.label())),
        Span::styled(
            "  [s] sort [d] dir [0] default [r] refresh [q] quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(vec![top, bottom]).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", state.title)),
    );
    frame.render_widget(header, area);
}

// ---------------------------------------------------------------------------
// Accounts table
// ---------------------------------------------------------------------------

fn render_accounts(frame: &mut Frame, area: Rect, state: &AppState) {
    let header_cells = [
        "Name", "ID", "Cur", "Equity", "Balance", "Equity $", "DD %", "Vol (L)", "Sync", "Status",
    ]
    .iter()
    .map(|h| Cell::from(*h).style(Style::default().add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows: Vec<Row> = state.snapshot.rows.iter().map(account_row).collect();

    let table = Table::new(
        rows,
        [
            Constraint::Min(14),
            Constraint::Length(12),
            Constraint::Length(4),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(13),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(9),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!(
        " Accounts ({} · {} demo · {} raw rows) ",
        state.snapshot.rows.len(),
        state.snapshot.demo_count(),
        state.snapshot.raw_count,
    )));

    frame.render_widget(table, area);
}

fn account_row(row: &AccountView) -> Row<'static> {
    let acc = &row.account;
    let dd_color = if row.drawdown_pct < 0.0 {
        Color::Red
    } else {
        Color::Green
    };
    let (status, status_color) = if row.offline {
        ("OFFLINE", Color::Red)
    } else {
        ("ONLINE", Color::Green)
    };
    let name = if acc.is_demo {
        format!("{} [DEMO]", acc.display_name())
    } else {
        acc.display_name().to_string()
    };
    let sync = acc
        .last_updated_at
        .map(local_time)
        .unwrap_or_else(|| "--:--:--".into());

    let cells = vec![
        Cell::from(name).style(Style::default().add_modifier(Modifier::BOLD)),
        Cell::from(acc.id.clone()),
        Cell::from(acc.denomination()),
        Cell::from(format_money(acc.equity, 2)),
        Cell::from(format_money(acc.balance, 2)),
        Cell::from(format_money(row.equity_usd, 2)),
        Cell::from(format!("{:.2}", row.drawdown_pct)).style(Style::default().fg(dd_color)),
        Cell::from(format!("{:.2}", acc.total_lots)),
        Cell::from(sync),
        Cell::from(status).style(Style::default().fg(status_color)),
    ];

    let row_style = if acc.is_demo {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };
    Row::new(cells).style(row_style)
}

// ---------------------------------------------------------------------------
// Logs panel
// ---------------------------------------------------------------------------

fn render_logs(frame: &mut Frame, area: Rect, state: &AppState) {
    let items: Vec<ListItem> = state
        .logs
        .iter()
        .take(area.height as usize)
        .map(|line| {
            let color = if line.contains("ERROR") || line.contains("failed") {
                Color::Red
            } else if line.contains("Discarded") || line.contains("disconnected") {
                Color::Yellow
            } else if line.contains("Refreshed") || line.contains("Subscribed") {
                Color::Green
            } else {
                Color::Gray
            };
            ListItem::new(Line::from(Span::styled(
                line.clone(),
                Style::default().fg(color),
            )))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Logs "))
        .style(Style::default().fg(Color::White));

    frame.render_widget(list, area);
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn price_label(price: &PriceReading) -> String {
    match (price.value, price.updated_at) {
        (Some(v), Some(t)) => format!("{} {} @{}", price.symbol, format_money(v, 2), local_time(t)),
        (Some(v), None) => format!("{} {}", price.symbol, format_money(v, 2)),
        (None, _) => format!("{} —", price.symbol),
    }
}

/// Timestamp as wall-clock time in the viewer's zone.
pub fn local_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Fixed-point number with thousands separators, e.g. `-12,345.60`.
pub fn format_money(value: f64, decimals: usize) -> String {
    let text = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let negative = value < 0.0 && text.chars().any(|c| c != '0' && c != '.');
    let sign = if negative { "-" } else { "" };
    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyEventState};

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn format_money_groups_thousands() {
        assert_eq!(format_money(0.0, 2), "0.00");
        assert_eq!(format_money(1234.5, 2), "1,234.50");
        assert_eq!(format_money(1_234_567.891, 2), "1,234,567.89");
        assert_eq!(format_money(-9876.0, 0), "-9,876");
        assert_eq!(format_money(-0.001, 2), "0.00");
    }

    #[test]
    fn keys_map_to_actions() {
        assert_eq!(
            handle_event(&key(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(Action::Quit)
        );
        assert_eq!(
            handle_event(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Quit)
        );
        assert_eq!(
            handle_event(&key(KeyCode::Char('s'), KeyModifiers::NONE)),
            Some(Action::CycleSort)
        );
        assert_eq!(
            handle_event(&key(KeyCode::Char('r'), KeyModifiers::NONE)),
            Some(Action::Refresh)
        );
        assert_eq!(handle_event(&key(KeyCode::Char('x'), KeyModifiers::NONE)), None);
    }
}
