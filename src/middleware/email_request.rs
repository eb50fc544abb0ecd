use axum::{
    Json,
    extract::{FromRequest, Request},
};

use crate::api::mail_client::DEFAULT_MAILBOX;
use crate::error::MailpoolError;
use crate::store::AccountId;
use crate::types::pool::EmailBody;

/// Validated `{email, mailbox?}` body of a lease-scoped request.
#[derive(Debug, Clone)]
pub struct EmailRequest {
    pub email: AccountId,
    pub mailbox: String,
}

impl<S> FromRequest<S> for EmailRequest
where
    S: Send + Sync,
{
    type Rejection = MailpoolError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<EmailBody>::from_request(req, state)
            .await
            .map_err(|rejection| MailpoolError::InvalidRequest(rejection.body_text()))?;

        let Some(raw) = body.email else {
            return Err(MailpoolError::InvalidRequest(
                "Missing 'email' in request body.".to_string(),
            ));
        };
        let email = AccountId::parse(raw)?;

        let mailbox = body
            .mailbox
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MAILBOX.to_string());

        Ok(Self { email, mailbox })
    }
}
