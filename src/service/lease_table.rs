use crate::error::MailpoolError;
use crate::store::AccountId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct LeaseEntry {
    pub leased_at: Instant,
    /// Set while the holder's retirement rename is in flight. Such an entry
    /// is neither expired by the sweep nor handed out again.
    pub retiring: bool,
}

/// Proof that `begin_retire` marked a particular lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetireClaim {
    leased_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Retirement is in flight and will end the lease.
    Retiring,
    NotLeased,
}

impl LeaseEntry {
    fn is_live(&self, now: Instant, duration: Duration) -> bool {
        self.retiring || now.saturating_duration_since(self.leased_at) <= duration
    }
}

/// In-memory set of checked-out accounts.
///
/// Every read and write goes through the single mutex; no method awaits or
/// does I/O while holding it.
#[derive(Debug)]
pub struct LeaseTable {
    duration: Duration,
    entries: Mutex<HashMap<AccountId, LeaseEntry>>,
}

impl LeaseTable {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        self.duration
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AccountId, LeaseEntry>> {
        // Critical sections never leave the map half-updated, so a poisoned
        // lock still guards a consistent table.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep_locked(&self, entries: &mut HashMap<AccountId, LeaseEntry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|id, entry| {
            let keep = entry.is_live(now, self.duration);
            if !keep {
                info!(email = %id, "reclaimed expired lease");
            }
            keep
        });
        before - entries.len()
    }

    /// Drop every lease older than the lease duration. Returns how many were removed.
    pub fn reclaim_expired(&self) -> usize {
        let mut entries = self.lock();
        self.sweep_locked(&mut entries, Instant::now())
    }

    /// Lease the first candidate without a live entry, in the given order.
    ///
    /// Reclamation, the scan and the insert share one lock acquisition, so
    /// two callers can never both lease the same account.
    pub fn lease_first_available<I>(&self, candidates: I) -> Option<AccountId>
    where
        I: IntoIterator<Item = AccountId>,
    {
        let mut entries = self.lock();
        let now = Instant::now();
        self.sweep_locked(&mut entries, now);

        let chosen = candidates
            .into_iter()
            .find(|id| !entries.contains_key(id))?;
        entries.insert(
            chosen.clone(),
            LeaseEntry {
                leased_at: now,
                retiring: false,
            },
        );
        Some(chosen)
    }

    fn check_live(
        &self,
        entries: &mut HashMap<AccountId, LeaseEntry>,
        id: &AccountId,
    ) -> Result<(), MailpoolError> {
        let Some(entry) = entries.get(id) else {
            return Err(MailpoolError::NotLeased(id.clone()));
        };
        if !entry.is_live(Instant::now(), self.duration) {
            entries.remove(id);
            info!(email = %id, "lease expired at guard check");
            return Err(MailpoolError::NotLeased(id.clone()));
        }
        Ok(())
    }

    /// Gate for every lease-scoped operation. An expired entry is removed on the spot.
    pub fn require_live(&self, id: &AccountId) -> Result<(), MailpoolError> {
        let mut entries = self.lock();
        self.check_live(&mut entries, id)
    }

    /// Guard check plus marking the lease as retiring, atomically.
    ///
    /// A lease already being retired is treated as gone, so only one
    /// retirement runs per lease.
    pub fn begin_retire(&self, id: &AccountId) -> Result<RetireClaim, MailpoolError> {
        let mut entries = self.lock();
        self.check_live(&mut entries, id)?;
        match entries.get_mut(id) {
            Some(entry) if !entry.retiring => {
                entry.retiring = true;
                Ok(RetireClaim {
                    leased_at: entry.leased_at,
                })
            }
            _ => Err(MailpoolError::NotLeased(id.clone())),
        }
    }

    fn claimed_entry<'a>(
        entries: &'a mut HashMap<AccountId, LeaseEntry>,
        id: &AccountId,
        claim: RetireClaim,
    ) -> Option<&'a mut LeaseEntry> {
        entries
            .get_mut(id)
            .filter(|e| e.retiring && e.leased_at == claim.leased_at)
    }

    /// The record is retired on disk; drop the lease the claim was taken on.
    pub fn finish_retire(&self, id: &AccountId, claim: RetireClaim) {
        let mut entries = self.lock();
        if Self::claimed_entry(&mut entries, id, claim).is_some() {
            entries.remove(id);
        } else {
            warn!(email = %id, "retired lease was no longer in the table");
        }
    }

    /// The rename failed; keep the lease so the holder can retry or let it expire.
    pub fn abort_retire(&self, id: &AccountId, claim: RetireClaim) {
        let mut entries = self.lock();
        if let Some(entry) = Self::claimed_entry(&mut entries, id, claim) {
            entry.retiring = false;
        }
    }

    /// End a lease. A lease whose retirement is in flight is left for the
    /// retirement to remove.
    pub fn release(&self, id: &AccountId) -> ReleaseOutcome {
        let mut entries = self.lock();
        let Some(retiring) = entries.get(id).map(|e| e.retiring) else {
            return ReleaseOutcome::NotLeased;
        };
        if retiring {
            return ReleaseOutcome::Retiring;
        }
        entries.remove(id);
        ReleaseOutcome::Released
    }

    pub fn is_leased(&self, id: &AccountId) -> bool {
        let entries = self.lock();
        entries
            .get(id)
            .is_some_and(|e| e.is_live(Instant::now(), self.duration))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(email: &str) -> AccountId {
        AccountId::parse(email).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn leases_candidates_in_order_until_exhausted() {
        let table = LeaseTable::new(Duration::from_secs(60));
        let pool = vec![id("a@x.com"), id("b@x.com")];

        assert_eq!(table.lease_first_available(pool.clone()), Some(id("a@x.com")));
        assert_eq!(table.lease_first_available(pool.clone()), Some(id("b@x.com")));
        assert_eq!(table.lease_first_available(pool), None);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn guard_rejects_unknown_and_expired_leases() {
        let table = LeaseTable::new(Duration::from_secs(1));
        let a = id("a@x.com");
        assert!(matches!(
            table.require_live(&a),
            Err(MailpoolError::NotLeased(_))
        ));

        table.lease_first_available([a.clone()]);
        assert!(table.require_live(&a).is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(
            table.require_live(&a),
            Err(MailpoolError::NotLeased(_))
        ));
        // removed inline by the guard
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_at_exact_duration_is_still_live() {
        let table = LeaseTable::new(Duration::from_secs(5));
        let a = id("a@x.com");
        table.lease_first_available([a.clone()]);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(table.require_live(&a).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_expired_drops_only_old_entries() {
        let table = LeaseTable::new(Duration::from_secs(10));
        table.lease_first_available([id("old@x.com")]);
        tokio::time::advance(Duration::from_secs(8)).await;
        table.lease_first_available([id("new@x.com")]);
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(table.reclaim_expired(), 1);
        assert!(!table.is_leased(&id("old@x.com")));
        assert!(table.is_leased(&id("new@x.com")));
    }

    #[tokio::test(start_paused = true)]
    async fn retiring_entry_survives_expiry_and_is_not_reallocated() {
        let table = LeaseTable::new(Duration::from_secs(1));
        let a = id("a@x.com");
        table.lease_first_available([a.clone()]);
        let claim = table.begin_retire(&a).unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(table.reclaim_expired(), 0);
        assert_eq!(table.lease_first_available([a.clone()]), None);

        table.finish_retire(&a, claim);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_retire_keeps_lease_subject_to_expiry() {
        let table = LeaseTable::new(Duration::from_secs(1));
        let a = id("a@x.com");
        table.lease_first_available([a.clone()]);
        let claim = table.begin_retire(&a).unwrap();
        table.abort_retire(&a, claim);
        assert!(table.require_live(&a).is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(table.require_live(&a).is_err());
    }

    #[test]
    fn release_is_idempotent() {
        let table = LeaseTable::new(Duration::from_secs(60));
        let a = id("a@x.com");
        assert_eq!(table.release(&a), ReleaseOutcome::NotLeased);
        table.lease_first_available([a.clone()]);
        assert_eq!(table.release(&a), ReleaseOutcome::Released);
        assert_eq!(table.release(&a), ReleaseOutcome::NotLeased);
    }

    #[tokio::test(start_paused = true)]
    async fn release_during_retirement_cannot_free_the_account() {
        let table = LeaseTable::new(Duration::from_secs(60));
        let a = id("a@x.com");
        table.lease_first_available([a.clone()]);
        let claim = table.begin_retire(&a).unwrap();

        assert_eq!(table.release(&a), ReleaseOutcome::Retiring);
        assert_eq!(table.lease_first_available([a.clone()]), None);

        table.finish_retire(&a, claim);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_retire_while_one_is_in_flight_is_rejected() {
        let table = LeaseTable::new(Duration::from_secs(60));
        let a = id("a@x.com");
        table.lease_first_available([a.clone()]);
        let claim = table.begin_retire(&a).unwrap();

        assert!(matches!(
            table.begin_retire(&a),
            Err(MailpoolError::NotLeased(_))
        ));
        // the original retirement still owns the lease
        table.abort_retire(&a, claim);
        assert!(table.begin_retire(&a).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_claim_leaves_a_newer_lease_alone() {
        let table = LeaseTable::new(Duration::from_secs(60));
        let a = id("a@x.com");
        table.lease_first_available([a.clone()]);
        let stale = table.begin_retire(&a).unwrap();
        table.abort_retire(&a, stale);
        assert_eq!(table.release(&a), ReleaseOutcome::Released);

        tokio::time::advance(Duration::from_secs(1)).await;
        table.lease_first_available([a.clone()]);
        table.finish_retire(&a, stale);
        table.abort_retire(&a, stale);
        assert!(table.is_leased(&a));
    }
}
