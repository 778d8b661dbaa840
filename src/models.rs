/// models.rs – Core data types shared across the terminal modules.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Column the account table is ordered by.
///
/// `Default` is the house ordering (real accounts first, then numeric-aware
/// account id) and ignores the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Default,
    Equity,
    Drawdown,
    Name,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Default => "default",
            SortKey::Equity => "equity",
            SortKey::Drawdown => "drawdown",
            SortKey::Name => "name",
        }
    }

    /// Next key in the dashboard's cycle order.
    pub fn next(self) -> Self {
        match self {
            SortKey::Default => SortKey::Equity,
            SortKey::Equity => SortKey::Drawdown,
            SortKey::Drawdown => SortKey::Name,
            SortKey::Name => SortKey::Default,
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SortKey {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" | "" => Ok(SortKey::Default),
            "equity" => Ok(SortKey::Equity),
            "drawdown" | "dd" => Ok(SortKey::Drawdown),
            "name" => Ok(SortKey::Name),
            _ => Err(anyhow::anyhow!("Unknown sort key: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "asc", alias = "ascending")]
    Ascending,
    #[serde(rename = "desc", alias = "descending")]
    Descending,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }

    pub fn flip(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// View selection
// ---------------------------------------------------------------------------

/// Immutable sort selection handed to the sorter. The dashboard swaps in a new
/// value on key press instead of mutating this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub sort: SortKey,
    pub direction: SortDirection,
}

impl ViewConfig {
    pub fn new(sort: SortKey, direction: SortDirection) -> Self {
        Self { sort, direction }
    }

    pub fn with_next_key(self) -> Self {
        Self {
            sort: self.sort.next(),
            ..self
        }
    }

    pub fn with_flipped_direction(self) -> Self {
        Self {
            direction: self.direction.flip(),
            ..self
        }
    }

    /// Short label for the dashboard, e.g. "equity DESC".
    pub fn label(&self) -> String {
        match self.sort {
            SortKey::Default => "default".to_string(),
            key => format!("{key} {}", self.direction),
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A normalized account row in its native denomination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub equity: f64,
    pub balance: f64,
    /// Equity/balance are in 1/100 units of the standard currency (USC).
    pub is_cent_denominated: bool,
    pub is_demo: bool,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub total_lots: f64,
}

impl Account {
    /// "USC" for cent accounts, "USD" otherwise.
    pub fn denomination(&self) -> &'static str {
        if self.is_cent_denominated {
            "USC"
        } else {
            "USD"
        }
    }

    /// Name for display; falls back to the id when the store has none.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// An account with its derived, standard-currency figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountView {
    pub account: Account,
    pub equity_usd: f64,
    pub balance_usd: f64,
    pub drawdown_pct: f64,
    pub offline: bool,
}

// ---------------------------------------------------------------------------
// Snapshot (one reconciled view)
// ---------------------------------------------------------------------------

/// The canonical, sorted view produced by one refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Sequence number of the refresh that produced the rows. 0 = nothing fetched yet.
    pub seq: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    /// When `offline` flags were last evaluated.
    pub evaluated_at: Option<DateTime<Utc>>,
    pub view: ViewConfig,
    pub rows: Vec<AccountView>,
    pub net_equity_usd: f64,
    /// Raw rows received before deduplication.
    pub raw_count: usize,
}

impl AccountSnapshot {
    pub fn online_count(&self) -> usize {
        self.rows.iter().filter(|r| !r.offline).count()
    }

    pub fn demo_count(&self) -> usize {
        self.rows.iter().filter(|r| r.account.is_demo).count()
    }
}

// ---------------------------------------------------------------------------
// Price reading
// ---------------------------------------------------------------------------

/// Last value seen from the price feed. `value == None` is the placeholder
/// shown before the first successful poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceReading {
    pub symbol: String,
    pub value: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PriceReading {
    pub fn unavailable(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            value: None,
            updated_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared application state (for dashboard + async tasks)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub title: String,
    pub started_at: Option<DateTime<Utc>>,
    pub snapshot: Arc<AccountSnapshot>,
    pub view: ViewConfig,
    pub price: PriceReading,
    pub realtime_connected: bool,
    pub refreshes_started: u64,
    pub last_error: Option<String>,
    pub logs: VecDeque<String>,
}

impl AppState {
    pub fn add_log(&mut self, msg: impl Into<String>) {
        let entry = format!("[{}] {}", Utc::now().format("%H:%M:%S"), msg.into());
        self.logs.push_front(entry);
        while self.logs.len() > 200 {
            self.logs.pop_back();
        }
    }
}
