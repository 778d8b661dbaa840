/// state.rs – Versioned holder for the current account snapshot.
///
/// Refreshes may overlap: a push notification can arrive while the previous
/// fetch is still in flight. Every refresh takes a sequence number from
/// `begin_refresh`, and `publish` accepts a result only if no newer refresh
/// has been published yet. Readers get an `Arc` and never see a half-built set.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::models::AccountSnapshot;

#[derive(Debug, Default)]
pub struct SnapshotCell {
    next_seq: AtomicU64,
    current: RwLock<Arc<AccountSnapshot>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the sequence number for a new refresh. Starts at 1.
    pub fn begin_refresh(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<AccountSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install a refresh result. Returns `false` (and drops `snapshot`) when a
    /// result with a newer or equal sequence is already published.
    pub fn publish(&self, snapshot: AccountSnapshot) -> bool {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if snapshot.seq <= guard.seq {
            return false;
        }
        *guard = Arc::new(snapshot);
        true
    }

    /// Replace the current snapshot with `f(current)` without touching the
    /// sequence. Used for clock-tick restamps and re-sorting.
    pub fn update<F>(&self, f: F) -> Arc<AccountSnapshot>
    where
        F: FnOnce(&AccountSnapshot) -> AccountSnapshot,
    {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(f(&guard));
        *guard = Arc::clone(&next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(seq: u64, net: f64) -> AccountSnapshot {
        AccountSnapshot {
            seq,
            net_equity_usd: net,
            ..AccountSnapshot::default()
        }
    }

    #[test]
    fn sequences_increase_from_one() {
        let cell = SnapshotCell::new();
        assert_eq!(cell.begin_refresh(), 1);
        assert_eq!(cell.begin_refresh(), 2);
    }

    #[test]
    fn older_result_does_not_replace_newer() {
        let cell = SnapshotCell::new();
        let first = cell.begin_refresh();
        let second = cell.begin_refresh();

        assert!(cell.publish(snap(second, 200.0)));
        assert!(!cell.publish(snap(first, 100.0)));
        assert_eq!(cell.load().net_equity_usd, 200.0);
    }

    #[test]
    fn readers_keep_their_snapshot_after_swap() {
        let cell = SnapshotCell::new();
        assert!(cell.publish(snap(cell.begin_refresh(), 1.0)));
        let held = cell.load();
        assert!(cell.publish(snap(cell.begin_refresh(), 2.0)));
        assert_eq!(held.net_equity_usd, 1.0);
        assert_eq!(cell.load().net_equity_usd, 2.0);
    }

    #[test]
    fn update_keeps_sequence() {
        let cell = SnapshotCell::new();
        assert!(cell.publish(snap(cell.begin_refresh(), 5.0)));
        let next = cell.update(|s| AccountSnapshot {
            net_equity_usd: s.net_equity_usd * 2.0,
            ..s.clone()
        });
        assert_eq!(next.seq, 1);
        assert_eq!(cell.load().net_equity_usd, 10.0);
    }
}
