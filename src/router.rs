use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;

use crate::handlers::pool::{
    cleanup_used_emails, clear_mailbox, get_latest_email, mark_email_used, release_email,
    request_email,
};
use crate::service::pool::AccountPool;

#[derive(Clone)]
pub struct MailpoolState {
    pub pool: Arc<AccountPool>,
    /// Default age threshold for an on-demand retirement sweep.
    pub retention: Duration,
}

impl MailpoolState {
    pub fn new(pool: Arc<AccountPool>, retention: Duration) -> Self {
        Self { pool, retention }
    }
}

pub fn mailpool_router(state: MailpoolState) -> Router {
    Router::new()
        .route("/request-email", get(request_email))
        .route("/get-latest-email", post(get_latest_email))
        .route("/mark-email-used", post(mark_email_used))
        .route("/release-email", post(release_email))
        .route("/clear-mailbox", post(clear_mailbox))
        .route("/cleanup-used-emails", post(cleanup_used_emails))
        .with_state(state)
}
