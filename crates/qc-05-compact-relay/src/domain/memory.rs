//! # Memory Governor
//!
//! Bounds the bytes held by in-flight reconstructions.
//!
//! One process-wide atomic counter plus one [`SessionBudget`] per session.
//! Every charge goes to both; a session's budget is released in full when
//! the session ends, whoever ends it.
//!
//! ## Breach Handling
//!
//! The governor only reports a breach. The caller decides whom to evict
//! (see [`largest_consumer`]) after dropping any pool locks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of charging bytes to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCheck {
    Within { total: u64 },
    /// The global total is above the ceiling.
    GlobalBreach { total: u64, ceiling: u64 },
    /// This session alone is above the ceiling.
    SessionBreach { used: u64, ceiling: u64 },
    /// The session was already released (evicted); nothing was charged.
    Closed,
}

impl MemoryCheck {
    pub fn is_within(&self) -> bool {
        matches!(self, MemoryCheck::Within { .. })
    }
}

#[derive(Debug, Default)]
struct BudgetState {
    used: u64,
    closed: bool,
}

/// Bytes charged to one session.
#[derive(Debug, Default)]
pub struct SessionBudget {
    state: Mutex<BudgetState>,
}

impl SessionBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used(&self) -> u64 {
        self.state.lock().used
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Global byte counter with a fixed ceiling.
#[derive(Debug)]
pub struct MemoryGovernor {
    total: AtomicU64,
    ceiling: u64,
}

impl MemoryGovernor {
    pub fn new(ceiling: u64) -> Self {
        Self {
            total: AtomicU64::new(0),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn in_use(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Charge `bytes` to `budget` and to the global total.
    pub fn add(&self, bytes: u64, budget: &SessionBudget) -> MemoryCheck {
        let mut state = budget.state.lock();
        if state.closed {
            return MemoryCheck::Closed;
        }
        state.used = state.used.saturating_add(bytes);
        let total = self.total.fetch_add(bytes, Ordering::SeqCst).saturating_add(bytes);

        if state.used > self.ceiling {
            MemoryCheck::SessionBreach {
                used: state.used,
                ceiling: self.ceiling,
            }
        } else if total > self.ceiling {
            MemoryCheck::GlobalBreach {
                total,
                ceiling: self.ceiling,
            }
        } else {
            MemoryCheck::Within { total }
        }
    }

    /// Saturating inverse of [`add`](Self::add).
    pub fn remove(&self, bytes: u64, budget: &SessionBudget) {
        let mut state = budget.state.lock();
        let bytes = bytes.min(state.used);
        state.used -= bytes;
        self.saturating_sub_total(bytes);
    }

    /// Drop everything `budget` holds but keep it open for new charges.
    pub fn reset(&self, budget: &SessionBudget) -> u64 {
        let mut state = budget.state.lock();
        let freed = std::mem::take(&mut state.used);
        self.saturating_sub_total(freed);
        freed
    }

    /// Drop everything `budget` holds and refuse further charges.
    ///
    /// Idempotent; returns the bytes freed by this call.
    pub fn release(&self, budget: &SessionBudget) -> u64 {
        let mut state = budget.state.lock();
        state.closed = true;
        let freed = std::mem::take(&mut state.used);
        self.saturating_sub_total(freed);
        freed
    }

    fn saturating_sub_total(&self, bytes: u64) {
        let _ = self
            .total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

/// The entry holding the most bytes. Ties go to the first seen.
pub fn largest_consumer<K>(usage: impl IntoIterator<Item = (K, u64)>) -> Option<(K, u64)> {
    usage.into_iter().fold(None, |best, (key, used)| match best {
        Some((_, best_used)) if best_used >= used => best,
        _ => Some((key, used)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_track_both_counters() {
        let governor = MemoryGovernor::new(100);
        let budget = SessionBudget::new();

        assert_eq!(governor.add(40, &budget), MemoryCheck::Within { total: 40 });
        assert_eq!(budget.used(), 40);

        governor.remove(15, &budget);
        assert_eq!(budget.used(), 25);
        assert_eq!(governor.in_use(), 25);

        // Saturates instead of underflowing
        governor.remove(1_000, &budget);
        assert_eq!(budget.used(), 0);
        assert_eq!(governor.in_use(), 0);
    }

    #[test]
    fn test_global_breach() {
        let governor = MemoryGovernor::new(100);
        let a = SessionBudget::new();
        let b = SessionBudget::new();

        assert!(governor.add(70, &a).is_within());
        assert_eq!(
            governor.add(40, &b),
            MemoryCheck::GlobalBreach {
                total: 110,
                ceiling: 100
            }
        );
    }

    #[test]
    fn test_session_breach_reported_first() {
        let governor = MemoryGovernor::new(100);
        let a = SessionBudget::new();
        assert_eq!(
            governor.add(101, &a),
            MemoryCheck::SessionBreach {
                used: 101,
                ceiling: 100
            }
        );
    }

    #[test]
    fn test_release_closes_budget() {
        let governor = MemoryGovernor::new(100);
        let a = SessionBudget::new();
        governor.add(30, &a);

        assert_eq!(governor.release(&a), 30);
        assert_eq!(governor.release(&a), 0);
        assert!(a.is_closed());
        assert_eq!(governor.add(10, &a), MemoryCheck::Closed);
        assert_eq!(governor.in_use(), 0);
    }

    #[test]
    fn test_reset_keeps_budget_open() {
        let governor = MemoryGovernor::new(100);
        let a = SessionBudget::new();
        governor.add(30, &a);
        assert_eq!(governor.reset(&a), 30);
        assert!(governor.add(10, &a).is_within());
    }

    #[test]
    fn test_largest_consumer() {
        assert_eq!(largest_consumer(Vec::<(u8, u64)>::new()), None);
        assert_eq!(
            largest_consumer(vec![('a', 5), ('b', 9), ('c', 9), ('d', 1)]),
            Some(('b', 9))
        );
    }
}
