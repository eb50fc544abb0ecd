use crate::service::pool::AccountPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Periodic deletion of retired records past the retention window.
pub struct RetirementReclaimer {
    pool: Arc<AccountPool>,
    interval: Duration,
    retention: Duration,
}

impl RetirementReclaimer {
    pub fn new(pool: Arc<AccountPool>, interval: Duration, retention: Duration) -> Self {
        Self {
            pool,
            interval,
            retention,
        }
    }

    /// Spawn the sweep loop. The first sweep runs immediately; the task exits
    /// once `cancel` fires, letting an in-flight sweep finish first.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                retention_hours = self.retention.as_secs_f64() / 3600.0,
                "retirement reclaimer started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("retirement reclaimer shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.pool.sweep_retired(self.retention).await {
                            warn!(error = %e, "scheduled retirement sweep failed (non-fatal)");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mail_client::MailClient;
    use crate::error::MailClientError;
    use crate::store::{AccountId, CredentialRecord, CredentialStore};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::SystemTime;
    use tempfile::tempdir;

    struct NoMail;

    #[async_trait]
    impl MailClient for NoMail {
        async fn fetch_latest(
            &self,
            _account: &CredentialRecord,
            _mailbox: &str,
        ) -> Result<Option<Value>, MailClientError> {
            Ok(None)
        }

        async fn clear_mailbox(
            &self,
            _account: &CredentialRecord,
            _mailbox: &str,
        ) -> Result<(), MailClientError> {
            Ok(())
        }
    }

    fn retired_file(dir: &std::path::Path, email: &str, age: Duration) -> std::path::PathBuf {
        let id = AccountId::parse(email).unwrap();
        let path = dir.join(format!("{}.json.used", id.file_stem()));
        std::fs::write(&path, "{}").unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        path
    }

    #[tokio::test]
    async fn first_tick_sweeps_and_cancel_stops_the_task() {
        let tmp = tempdir().unwrap();
        let old = retired_file(tmp.path(), "old@example.com", Duration::from_secs(72 * 3600));
        let young = retired_file(tmp.path(), "young@example.com", Duration::from_secs(3600));

        let pool = Arc::new(AccountPool::new(
            CredentialStore::new(tmp.path()),
            Duration::from_secs(60),
            Arc::new(NoMail),
        ));
        let cancel = CancellationToken::new();
        let handle = RetirementReclaimer::new(
            pool,
            Duration::from_secs(3600),
            Duration::from_secs(48 * 3600),
        )
        .spawn(cancel.clone());

        // the startup sweep runs on the first tick
        for _ in 0..100 {
            if !old.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!old.exists());
        assert!(young.exists());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reclaimer did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_token_exits_without_sweeping() {
        let tmp = tempdir().unwrap();
        let old = retired_file(tmp.path(), "old@example.com", Duration::from_secs(72 * 3600));
        let pool = Arc::new(AccountPool::new(
            CredentialStore::new(tmp.path()),
            Duration::from_secs(60),
            Arc::new(NoMail),
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();

        RetirementReclaimer::new(pool, Duration::from_secs(1), Duration::ZERO)
            .spawn(cancel)
            .await
            .unwrap();
        assert!(old.exists());
    }
}
