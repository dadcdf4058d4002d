//! Shared payment-state table.
//!
//! The table is the single point of truth between the settlement listener (which
//! marks tokens settled) and the request path (which reads state and registers new
//! pending tokens). The two sides never talk to each other directly.
//!
//! # Invariants
//!
//! - A settled entry never goes back to pending: [`PaymentTable::register_pending`]
//!   only inserts into vacant slots and [`PaymentTable::prune_pending`] skips settled entries.
//! - Settling is an idempotent upsert, so settlement for a token that was never
//!   registered locally is accepted.
//!
//! # Thread Safety
//!
//! Entries live in an `Arc<DashMap>` shared by all clones. Each operation takes the
//! shard lock for its key only for the duration of the call and never across an
//! await point, giving per-key sequential consistency.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::timestamp::UnixTimestamp;
use crate::token::CorrelationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentEntry {
    pub status: PaymentStatus,
    /// When the challenge for this token was issued locally. `None` if the first
    /// observation of the token was its settlement.
    pub registered_at: Option<UnixTimestamp>,
    pub settled_at: Option<UnixTimestamp>,
    pub amount_paid_msat: Option<u64>,
}

impl PaymentEntry {
    pub fn is_settled(&self) -> bool {
        self.status == PaymentStatus::Settled
    }
}

/// Details recorded when a token settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub settled_at: UnixTimestamp,
    pub amount_paid_msat: Option<u64>,
}

impl Settlement {
    pub fn now(amount_paid_msat: Option<u64>) -> Self {
        Self {
            settled_at: UnixTimestamp::now(),
            amount_paid_msat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The token moved to settled with this call.
    Newly,
    /// The token was already settled; nothing changed.
    Already,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub pending: usize,
    pub settled: usize,
}

/// Concurrent map from correlation token to payment state.
#[derive(Debug, Clone, Default)]
pub struct PaymentTable {
    entries: Arc<DashMap<CorrelationToken, PaymentEntry>>,
}

impl PaymentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &CorrelationToken) -> Option<PaymentEntry> {
        self.entries.get(token).map(|entry| entry.value().clone())
    }

    /// Unknown tokens read as not settled.
    pub fn is_settled(&self, token: &CorrelationToken) -> bool {
        self.entries
            .get(token)
            .is_some_and(|entry| entry.is_settled())
    }

    /// Inserts a pending entry for `token`.
    ///
    /// Returns `false`, leaving the existing entry untouched, if the token is already known.
    pub fn register_pending(&self, token: CorrelationToken) -> bool {
        match self.entries.entry(token) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(PaymentEntry {
                    status: PaymentStatus::Pending,
                    registered_at: Some(UnixTimestamp::now()),
                    settled_at: None,
                    amount_paid_msat: None,
                });
                true
            }
        }
    }

    /// Marks `token` settled, creating the entry if needed.
    pub fn set_settled(&self, token: CorrelationToken, settlement: Settlement) -> SettleOutcome {
        match self.entries.entry(token) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_settled() {
                    return SettleOutcome::Already;
                }
                entry.status = PaymentStatus::Settled;
                entry.settled_at = Some(settlement.settled_at);
                entry.amount_paid_msat = settlement.amount_paid_msat;
                SettleOutcome::Newly
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PaymentEntry {
                    status: PaymentStatus::Settled,
                    registered_at: None,
                    settled_at: Some(settlement.settled_at),
                    amount_paid_msat: settlement.amount_paid_msat,
                });
                SettleOutcome::Newly
            }
        }
    }

    /// Drops pending entries registered more than `older_than` ago.
    ///
    /// Returns the number of removed entries.
    pub fn prune_pending(&self, older_than: Duration) -> usize {
        self.prune_pending_before(UnixTimestamp::now().saturating_sub(older_than))
    }

    fn prune_pending_before(&self, cutoff: UnixTimestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.is_settled() || entry.registered_at.is_none_or(|at| at >= cutoff)
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> TableStats {
        self.entries
            .iter()
            .fold(TableStats::default(), |mut stats, entry| {
                match entry.status {
                    PaymentStatus::Pending => stats.pending += 1,
                    PaymentStatus::Settled => stats.settled += 1,
                }
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn token(s: &str) -> CorrelationToken {
        s.parse().unwrap()
    }

    #[test]
    fn unknown_token_is_absent_and_unsettled() {
        let table = PaymentTable::new();
        assert_eq!(table.get(&token("nope")), None);
        assert!(!table.is_settled(&token("nope")));
    }

    #[test]
    fn register_then_settle() {
        let table = PaymentTable::new();
        assert!(table.register_pending(token("abc")));
        let entry = table.get(&token("abc")).unwrap();
        assert_eq!(entry.status, PaymentStatus::Pending);
        assert!(entry.registered_at.is_some());
        assert!(!table.is_settled(&token("abc")));

        let outcome = table.set_settled(token("abc"), Settlement::now(Some(1000)));
        assert_eq!(outcome, SettleOutcome::Newly);
        let entry = table.get(&token("abc")).unwrap();
        assert!(entry.is_settled());
        assert_eq!(entry.amount_paid_msat, Some(1000));
        assert!(entry.registered_at.is_some());
    }

    #[test]
    fn duplicate_settlement_is_idempotent() {
        let table = PaymentTable::new();
        let first = Settlement {
            settled_at: UnixTimestamp::from_secs(100),
            amount_paid_msat: Some(1000),
        };
        let second = Settlement {
            settled_at: UnixTimestamp::from_secs(200),
            amount_paid_msat: Some(5000),
        };
        assert_eq!(table.set_settled(token("abc"), first), SettleOutcome::Newly);
        assert_eq!(table.set_settled(token("abc"), second), SettleOutcome::Already);
        let entry = table.get(&token("abc")).unwrap();
        assert_eq!(entry.settled_at, Some(UnixTimestamp::from_secs(100)));
        assert_eq!(entry.amount_paid_msat, Some(1000));
    }

    #[test]
    fn settlement_without_registration_is_accepted() {
        let table = PaymentTable::new();
        table.set_settled(token("stranger"), Settlement::now(None));
        let entry = table.get(&token("stranger")).unwrap();
        assert!(entry.is_settled());
        assert_eq!(entry.registered_at, None);
    }

    #[test]
    fn register_never_unsettles() {
        let table = PaymentTable::new();
        table.set_settled(token("abc"), Settlement::now(None));
        assert!(!table.register_pending(token("abc")));
        assert!(table.is_settled(&token("abc")));
    }

    #[test]
    fn prune_removes_only_old_pending_entries() {
        let table = PaymentTable::new();
        table.register_pending(token("fresh"));
        table.register_pending(token("paid"));
        table.set_settled(token("paid"), Settlement::now(None));
        table.set_settled(token("unregistered"), Settlement::now(None));

        assert_eq!(table.prune_pending(Duration::from_secs(3600)), 0);
        let removed = table.prune_pending_before(UnixTimestamp::now() + 10);
        assert_eq!(removed, 1);
        assert_eq!(table.get(&token("fresh")), None);
        assert!(table.is_settled(&token("paid")));
        assert!(table.is_settled(&token("unregistered")));
    }

    #[test]
    fn stats_count_by_status() {
        let table = PaymentTable::new();
        table.register_pending(token("a"));
        table.register_pending(token("b"));
        table.set_settled(token("b"), Settlement::now(None));
        table.set_settled(token("c"), Settlement::now(None));
        assert_eq!(
            table.stats(),
            TableStats {
                pending: 1,
                settled: 2
            }
        );
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn concurrent_writers_on_distinct_keys() {
        let table = PaymentTable::new();
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let table = table.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        let t = token(&format!("w{worker}-{i}"));
                        table.register_pending(t.clone());
                        if i % 2 == 0 {
                            table.set_settled(t, Settlement::now(None));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(
            table.stats(),
            TableStats {
                pending: 1000,
                settled: 1000
            }
        );
    }
}
