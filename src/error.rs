use crate::store::AccountId;
use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum MailpoolError {
    #[error("no email accounts available")]
    NoneAvailable,

    #[error("{0} is not leased or its lease expired")]
    NotLeased(AccountId),

    #[error("no credentials found for {0}")]
    NoCredentials(AccountId),

    /// A record that should exist (leased or being retired) has no file on disk.
    #[error("credential record missing for {0}")]
    MissingRecord(AccountId),

    #[error("malformed credential record for {identifier}: {reason}")]
    MalformedRecord {
        identifier: AccountId,
        reason: String,
    },

    #[error("store I/O error at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mail client error: {0}")]
    MailClient(#[from] MailClientError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl MailpoolError {
    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the remote mail API collaborator.
#[derive(Debug, ThisError)]
pub enum MailClientError {
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("remote mail API reported failure: {0}")]
    Api(String),

    #[error("undecodable mail API response: {0}")]
    Decode(String),
}

impl MailClientError {
    /// Transport failures and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            MailClientError::Reqwest(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

impl IntoResponse for MailpoolError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            MailpoolError::NoneAvailable => (
                StatusCode::CONFLICT,
                "NO_ACCOUNT_AVAILABLE",
                "No available email accounts at the moment.".to_string(),
            ),
            MailpoolError::NotLeased(_) => (
                StatusCode::NOT_FOUND,
                "NOT_LEASED",
                "Email not found or lease expired.".to_string(),
            ),
            MailpoolError::NoCredentials(id) => (
                StatusCode::NOT_FOUND,
                "NO_CREDENTIALS",
                format!("Email credentials not found: {id}"),
            ),
            MailpoolError::MissingRecord(_) | MailpoolError::Store { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                "Credential store error.".to_string(),
            ),
            MailpoolError::MalformedRecord { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CREDENTIAL_INVALID",
                "Invalid credential record.".to_string(),
            ),
            MailpoolError::MailClient(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "MAIL_CLIENT_ERROR",
                e.to_string(),
            ),
            MailpoolError::InvalidRequest(reason) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", reason.clone())
            }
        };
        let body = ApiErrorBody {
            code: code.to_string(),
            message,
        };
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
