use axum::{Json, body::Bytes, extract::State};
use std::time::Duration;
use tracing::info;

use crate::middleware::EmailRequest;
use crate::router::MailpoolState;
use crate::store::RetireOutcome;
use crate::types::pool::{
    AllocationResponse, CleanupRequest, CleanupResponse, ClearMailboxResponse,
    LatestEmailResponse, MessageResponse,
};
use crate::MailpoolError;

/// GET /request-email
pub async fn request_email(
    State(state): State<MailpoolState>,
) -> Result<Json<AllocationResponse>, MailpoolError> {
    let allocation = state.pool.allocate().await?;
    Ok(Json(AllocationResponse {
        email: allocation.email.to_string(),
        lease_duration_seconds: allocation.lease_duration.as_secs(),
        expires_at: allocation.expires_at.to_rfc3339(),
    }))
}

/// POST /get-latest-email
pub async fn get_latest_email(
    State(state): State<MailpoolState>,
    req: EmailRequest,
) -> Result<Json<LatestEmailResponse>, MailpoolError> {
    info!(email = %req.email, mailbox = %req.mailbox, "latest email requested");
    let data = state.pool.fetch_latest(&req.email, &req.mailbox).await?;
    Ok(Json(LatestEmailResponse {
        success: true,
        data,
    }))
}

/// POST /mark-email-used
pub async fn mark_email_used(
    State(state): State<MailpoolState>,
    req: EmailRequest,
) -> Result<Json<MessageResponse>, MailpoolError> {
    let message = match state.pool.retire(&req.email).await? {
        RetireOutcome::Renamed => "Email marked as used.",
        RetireOutcome::AlreadyRetired => "Email was already marked as used.",
    };
    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

/// POST /release-email
pub async fn release_email(
    State(state): State<MailpoolState>,
    req: EmailRequest,
) -> Json<MessageResponse> {
    state.pool.release(&req.email);
    Json(MessageResponse {
        message: "Email lease released.".to_string(),
    })
}

/// POST /clear-mailbox
pub async fn clear_mailbox(
    State(state): State<MailpoolState>,
    req: EmailRequest,
) -> Result<Json<ClearMailboxResponse>, MailpoolError> {
    state.pool.clear_mailbox(&req.email, &req.mailbox).await?;
    Ok(Json(ClearMailboxResponse {
        success: true,
        message: format!("Mailbox {} for {} cleared successfully.", req.mailbox, req.email),
    }))
}

/// POST /cleanup-used-emails
///
/// The body is optional; `max_age_hours` falls back to the configured retention.
pub async fn cleanup_used_emails(
    State(state): State<MailpoolState>,
    body: Bytes,
) -> Result<Json<CleanupResponse>, MailpoolError> {
    let request: CleanupRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| MailpoolError::InvalidRequest(format!("invalid JSON body: {e}")))?
    };

    let max_age = match request.max_age_hours {
        None => state.retention,
        Some(hours) if hours.is_finite() && hours >= 0.0 => {
            Duration::try_from_secs_f64(hours * 3600.0).unwrap_or(Duration::MAX)
        }
        Some(hours) => {
            return Err(MailpoolError::InvalidRequest(format!(
                "max_age_hours must be a non-negative number, got {hours}"
            )));
        }
    };

    let report = state.pool.sweep_retired(max_age).await?;
    Ok(Json(CleanupResponse {
        success: true,
        message: format!(
            "Cleanup finished, deleted {} retired account file(s).",
            report.deleted
        ),
        deleted_count: report.deleted,
    }))
}
