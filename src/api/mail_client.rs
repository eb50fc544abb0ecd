use crate::error::MailClientError;
use crate::store::CredentialRecord;
use async_trait::async_trait;
use serde_json::Value;

pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Remote mail access for one account's credentials.
///
/// Implementations own their retry and timeout policy; callers pass results
/// through unchanged.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Latest message in `mailbox`, or `None` when the mailbox is empty.
    async fn fetch_latest(
        &self,
        account: &CredentialRecord,
        mailbox: &str,
    ) -> Result<Option<Value>, MailClientError>;

    async fn clear_mailbox(
        &self,
        account: &CredentialRecord,
        mailbox: &str,
    ) -> Result<(), MailClientError>;
}
