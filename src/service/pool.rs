use crate::api::mail_client::MailClient;
use crate::error::MailpoolError;
use crate::service::lease_table::{LeaseTable, ReleaseOutcome};
use crate::store::{
    AccountId, CredentialRecord, CredentialStore, RecordState, RetireOutcome, SweepReport,
};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// A freshly granted lease.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub email: AccountId,
    pub lease_duration: Duration,
    pub expires_at: DateTime<Utc>,
}

/// The account pool: credential store, lease table and mail collaborator.
///
/// Constructed once at startup and shared behind an `Arc`.
pub struct AccountPool {
    store: CredentialStore,
    leases: Arc<LeaseTable>,
    mail: Arc<dyn MailClient>,
}

impl AccountPool {
    pub fn new(store: CredentialStore, lease_duration: Duration, mail: Arc<dyn MailClient>) -> Self {
        Self {
            store,
            leases: Arc::new(LeaseTable::new(lease_duration)),
            mail,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// Lease one live, unleased account chosen at random.
    pub async fn allocate(&self) -> Result<Allocation, MailpoolError> {
        let reclaimed = self.leases.reclaim_expired();
        if reclaimed > 0 {
            debug!(reclaimed, "expired leases reclaimed before allocation");
        }

        let mut candidates = self.store.list_live().await?;
        if candidates.is_empty() {
            warn!("no live account records in store");
            return Err(MailpoolError::NoneAvailable);
        }
        candidates.shuffle(&mut rand::thread_rng());

        // The listing is taken outside the lock, so a record retired since
        // then is re-checked once leased and skipped.
        let email = loop {
            let Some(email) = self.leases.lease_first_available(candidates.iter().cloned()) else {
                warn!(leased = self.leases.len(), "all live accounts are currently leased");
                return Err(MailpoolError::NoneAvailable);
            };
            candidates.retain(|c| c != &email);
            match self.store.state_of(&email).await {
                Ok(Some(RecordState::Live)) => break email,
                Ok(_) => {
                    self.leases.release(&email);
                    debug!(email = %email, "account retired during allocation, skipping");
                }
                Err(e) => {
                    self.leases.release(&email);
                    return Err(e);
                }
            }
        };

        let lease_duration = self.leases.lease_duration();
        let expires_at = chrono::Duration::from_std(lease_duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        info!(email = %email, "assigned and leased account");
        Ok(Allocation {
            email,
            lease_duration,
            expires_at,
        })
    }

    /// Fails with `NotLeased` unless `email` holds an unexpired lease.
    pub fn require_live_lease(&self, email: &AccountId) -> Result<(), MailpoolError> {
        self.leases.require_live(email).inspect_err(|_| {
            warn!(email = %email, "operation on account without a live lease");
        })
    }

    /// Permanently retire a leased account.
    ///
    /// The lease is marked as retiring under the guard's lock, so no other
    /// request can end or reuse it while the rename runs. The rename and the
    /// lease update run in their own task and finish together even if the
    /// request is dropped. On rename failure the lease is left intact.
    pub async fn retire(&self, email: &AccountId) -> Result<RetireOutcome, MailpoolError> {
        let claim = self.leases.begin_retire(email).inspect_err(|_| {
            warn!(email = %email, "retire requested without a live lease");
        })?;

        let store = self.store.clone();
        let leases = self.leases.clone();
        let id = email.clone();
        let task = tokio::spawn(async move {
            let result = store.retire(&id).await;
            match &result {
                Ok(outcome) => {
                    leases.finish_retire(&id, claim);
                    info!(email = %id, ?outcome, "account retired and lease removed");
                }
                Err(e) => {
                    leases.abort_retire(&id, claim);
                    match e {
                        MailpoolError::MissingRecord(_) => {
                            error!(email = %id, "invariant violated: leased account has no backing record");
                        }
                        _ => error!(email = %id, error = %e, "failed to retire account"),
                    }
                }
            }
            result
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                self.leases.abort_retire(email, claim);
                error!(email = %email, error = %join_err, "retire task failed");
                Err(MailpoolError::store(
                    self.store.path_for(email, RecordState::Live),
                    std::io::Error::other(join_err.to_string()),
                ))
            }
        }
    }

    /// Return an account to the pool. Releasing an unleased account succeeds.
    pub fn release(&self, email: &AccountId) {
        match self.leases.release(email) {
            ReleaseOutcome::Released => info!(email = %email, "released lease"),
            ReleaseOutcome::Retiring => {
                info!(email = %email, "release during retirement, lease ends when it completes")
            }
            ReleaseOutcome::NotLeased => {
                info!(email = %email, "no active lease found during release")
            }
        }
    }

    async fn load_leased(&self, email: &AccountId) -> Result<CredentialRecord, MailpoolError> {
        self.store.load(email).await.inspect_err(|e| match e {
            MailpoolError::MissingRecord(_) => {
                error!(email = %email, "invariant violated: leased account has no backing record");
            }
            _ => error!(email = %email, error = %e, "failed to read credential record"),
        })
    }

    /// Latest message for a leased account, passed through from the mail client.
    pub async fn fetch_latest(
        &self,
        email: &AccountId,
        mailbox: &str,
    ) -> Result<Option<Value>, MailpoolError> {
        self.require_live_lease(email)?;
        let record = self.load_leased(email).await?;

        let data = self
            .mail
            .fetch_latest(&record, mailbox)
            .await
            .inspect_err(|e| error!(email = %email, error = %e, "mail client fetch failed"))?;
        if data.is_none() {
            info!(email = %email, "mail client returned no message");
        }
        Ok(data)
    }

    /// Empty a mailbox folder of a leased account.
    pub async fn clear_mailbox(&self, email: &AccountId, mailbox: &str) -> Result<(), MailpoolError> {
        self.require_live_lease(email)?;
        let record = match self.store.load(email).await {
            Ok(record) => record,
            Err(MailpoolError::MissingRecord(id)) => {
                error!(email = %id, "credential file not found for leased account");
                return Err(MailpoolError::NoCredentials(id));
            }
            Err(e) => {
                error!(email = %email, error = %e, "failed to read credential record");
                return Err(e);
            }
        };

        self.mail
            .clear_mailbox(&record, mailbox)
            .await
            .inspect_err(|e| error!(email = %email, error = %e, "mail client clear failed"))?;
        info!(email = %email, mailbox, "mailbox cleared");
        Ok(())
    }

    /// Delete retired records older than `max_age`. Never touches the lease table.
    pub async fn sweep_retired(&self, max_age: Duration) -> Result<SweepReport, MailpoolError> {
        let report = self
            .store
            .sweep_retired(max_age, SystemTime::now())
            .await
            .inspect_err(|e| error!(error = %e, "retirement sweep failed"))?;
        info!(
            deleted = report.deleted,
            failed = report.failed,
            max_age_hours = max_age.as_secs_f64() / 3600.0,
            "retirement sweep finished"
        );
        Ok(report)
    }
}
