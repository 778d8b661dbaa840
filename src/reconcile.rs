/// reconcile.rs – Turn a raw batch of account rows into the canonical view.
///
/// Pipeline (run in full on every refresh):
///   normalize → dedup → convert + drawdown + staleness → aggregate → sort
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::models::{Account, AccountSnapshot, AccountView, SortDirection, SortKey, ViewConfig};
use crate::normalize::{normalize, RawAccountRecord};
use crate::staleness::StalenessRule;

const CENTS_PER_UNIT: f64 = 100.0;

// ---------------------------------------------------------------------------
// Deduplicator
// ---------------------------------------------------------------------------

/// Collapse accounts sharing an id into one per id.
///
/// An entry is replaced only by a row with a valid timestamp that is strictly
/// later than the held one, or when the held one has no timestamp at all. Ties
/// and timestamp-less rows keep the first-seen entry. Output keeps first-seen
/// id order.
pub fn dedup(accounts: &[Account]) -> Vec<Account> {
    let mut slots: HashMap<&str, usize> = HashMap::with_capacity(accounts.len());
    let mut out: Vec<Account> = Vec::with_capacity(accounts.len());

    for acc in accounts {
        match slots.get(acc.id.as_str()) {
            None => {
                slots.insert(acc.id.as_str(), out.len());
                out.push(acc.clone());
            }
            Some(&idx) => {
                if supersedes(acc.last_updated_at, out[idx].last_updated_at) {
                    out[idx] = acc.clone();
                }
            }
        }
    }
    out
}

fn supersedes(incoming: Option<DateTime<Utc>>, held: Option<DateTime<Utc>>) -> bool {
    match (incoming, held) {
        (Some(new), Some(old)) => new > old,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

// ---------------------------------------------------------------------------
// Currency converter + metrics
// ---------------------------------------------------------------------------

/// (equity, balance) in the standard currency.
pub fn to_standard(acc: &Account) -> (f64, f64) {
    if acc.is_cent_denominated {
        (acc.equity / CENTS_PER_UNIT, acc.balance / CENTS_PER_UNIT)
    } else {
        (acc.equity, acc.balance)
    }
}

/// Percentage of equity above (positive) or below (negative) balance.
/// A non-positive balance gives 0 rather than a division error.
pub fn drawdown_pct(equity: f64, balance: f64) -> f64 {
    if balance > 0.0 {
        (equity - balance) / balance * 100.0
    } else {
        0.0
    }
}

pub fn to_view(acc: Account, rule: &StalenessRule, now: DateTime<Utc>) -> AccountView {
    let (equity_usd, balance_usd) = to_standard(&acc);
    let offline = rule.is_offline(acc.last_updated_at, now);
    AccountView {
        drawdown_pct: drawdown_pct(equity_usd, balance_usd),
        equity_usd,
        balance_usd,
        offline,
        account: acc,
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Net equity in the standard currency over real (non-demo) accounts.
pub fn net_equity_usd(rows: &[AccountView]) -> f64 {
    rows.iter()
        .filter(|r| !r.account.is_demo)
        .map(|r| r.equity_usd)
        .sum()
}

// ---------------------------------------------------------------------------
// Sorter
// ---------------------------------------------------------------------------

/// Stable sort of `rows` according to `view`.
pub fn sort_rows(rows: &mut [AccountView], view: ViewConfig) {
    match view.sort {
        SortKey::Default => rows.sort_by(|a, b| default_cmp(&a.account, &b.account)),
        key => rows.sort_by(|a, b| {
            let ord = key_cmp(key, a, b);
            match view.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        }),
    }
}

/// House order first, then `view`. Equal keys therefore always fall back to
/// the default order, whatever order the rows arrived in.
pub fn order_rows(rows: &mut [AccountView], view: ViewConfig) {
    rows.sort_by(|a, b| default_cmp(&a.account, &b.account));
    if view.sort != SortKey::Default {
        sort_rows(rows, view);
    }
}

fn key_cmp(key: SortKey, a: &AccountView, b: &AccountView) -> Ordering {
    match key {
        SortKey::Equity => a.equity_usd.total_cmp(&b.equity_usd),
        SortKey::Drawdown => a.drawdown_pct.total_cmp(&b.drawdown_pct),
        SortKey::Name => a
            .account
            .display_name()
            .to_lowercase()
            .cmp(&b.account.display_name().to_lowercase()),
        SortKey::Default => default_cmp(&a.account, &b.account),
    }
}

/// Real accounts before demo accounts, then numeric-aware id order.
pub fn default_cmp(a: &Account, b: &Account) -> Ordering {
    a.is_demo
        .cmp(&b.is_demo)
        .then_with(|| natural_cmp(&a.id, &b.id))
}

/// Compare strings treating runs of ASCII digits as numbers, so "2" < "10"
/// and "acc9" < "acc10". Non-digit runs compare case-insensitively; a full
/// tie falls back to plain byte order to keep the result total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut xs = Chunks::new(a);
    let mut ys = Chunks::new(b);
    loop {
        let ord = match (xs.next(), ys.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(Chunk::Digits(x)), Some(Chunk::Digits(y))) => cmp_digit_runs(x, y),
            (Some(Chunk::Text(x)), Some(Chunk::Text(y))) => {
                x.to_lowercase().cmp(&y.to_lowercase())
            }
            // Digits sort ahead of letters, as in locale collation.
            (Some(Chunk::Digits(_)), Some(Chunk::Text(_))) => Ordering::Less,
            (Some(Chunk::Text(_)), Some(Chunk::Digits(_))) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn cmp_digit_runs(x: &str, y: &str) -> Ordering {
    let x = x.trim_start_matches('0');
    let y = y.trim_start_matches('0');
    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (head, tail) = self.rest.split_at(end);
        self.rest = tail;
        Some(if digits {
            Chunk::Digits(head)
        } else {
            Chunk::Text(head)
        })
    }
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// Run the whole pipeline over one fetched batch.
pub fn reconcile(
    raw: &[RawAccountRecord],
    seq: u64,
    now: DateTime<Utc>,
    rule: &StalenessRule,
    view: ViewConfig,
) -> AccountSnapshot {
    let normalized: Vec<Account> = raw.iter().filter_map(normalize).collect();
    if normalized.len() < raw.len() {
        debug!(
            "Skipped {} row(s) without an account id",
            raw.len() - normalized.len()
        );
    }

    let canonical = dedup(&normalized);
    debug!(
        "Reconciled {} raw row(s) into {} account(s)",
        raw.len(),
        canonical.len()
    );

    let mut rows: Vec<AccountView> = canonical
        .into_iter()
        .map(|acc| to_view(acc, rule, now))
        .collect();
    let net = net_equity_usd(&rows);
    order_rows(&mut rows, view);

    AccountSnapshot {
        seq,
        fetched_at: Some(now),
        evaluated_at: Some(now),
        view,
        rows,
        net_equity_usd: net,
        raw_count: raw.len(),
    }
}

/// Copy of `snapshot` with `offline` re-evaluated at `now`. Rows and order are
/// untouched.
pub fn restamp(
    snapshot: &AccountSnapshot,
    rule: &StalenessRule,
    now: DateTime<Utc>,
) -> AccountSnapshot {
    let mut next = snapshot.clone();
    for row in &mut next.rows {
        row.offline = rule.is_offline(row.account.last_updated_at, now);
    }
    next.evaluated_at = Some(now);
    next
}

/// Copy of `snapshot` re-ordered for a new view selection.
pub fn resort(snapshot: &AccountSnapshot, view: ViewConfig) -> AccountSnapshot {
    let mut next = snapshot.clone();
    order_rows(&mut next.rows, view);
    next.view = view;
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(id: &str) -> Account {
        Account {
            id: id.to_string(),
            name: String::new(),
            equity: 0.0,
            balance: 0.0,
            is_cent_denominated: false,
            is_demo: false,
            last_updated_at: None,
            total_lots: 0.0,
        }
    }

    #[test]
    fn natural_cmp_orders_numbers_by_value() {
        assert_eq!(natural_cmp("2", "10"), Ordering::Less);
        assert_eq!(natural_cmp("acc9", "acc10"), Ordering::Less);
        assert_eq!(natural_cmp("007", "7"), Ordering::Less);
        assert_eq!(natural_cmp("7", "7"), Ordering::Equal);
        assert_eq!(natural_cmp("abc", "ABD"), Ordering::Less);
        assert_eq!(natural_cmp("10", "10a"), Ordering::Less);
    }

    #[test]
    fn drawdown_with_zero_or_negative_balance_is_zero() {
        assert_eq!(drawdown_pct(500.0, 0.0), 0.0);
        assert_eq!(drawdown_pct(500.0, -20.0), 0.0);
        assert!((drawdown_pct(900.0, 1000.0) + 10.0).abs() < 1e-12);
    }

    #[test]
    fn cent_accounts_are_divided_by_100() {
        let mut a = acc("1");
        a.is_cent_denominated = true;
        a.equity = 10_000.0;
        a.balance = 12_000.0;
        assert_eq!(to_standard(&a), (100.0, 120.0));
    }

    #[test]
    fn default_cmp_puts_real_accounts_first() {
        let mut demo = acc("1");
        demo.is_demo = true;
        assert_eq!(default_cmp(&acc("99"), &demo), Ordering::Less);
    }
}
