use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body shared by every lease-scoped endpoint.
#[derive(Debug, Deserialize)]
pub struct EmailBody {
    pub email: Option<String>,
    #[serde(default)]
    pub mailbox: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    pub max_age_hours: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    pub email: String,
    pub lease_duration_seconds: u64,
    /// RFC3339
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct LatestEmailResponse {
    pub success: bool,
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ClearMailboxResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
    pub deleted_count: usize,
}
