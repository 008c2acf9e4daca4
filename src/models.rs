use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quota value callers pass when a key should never run out.
///
/// Any non-positive quota is treated the same way and stored as `NULL`.
pub const UNLIMITED_USES: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: i64,
    pub key_code: String,
    pub name: String,
    /// `None` means unlimited.
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessKey {
    pub fn is_unlimited(&self) -> bool {
        self.max_uses.is_none()
    }

    pub fn quota_exhausted(&self) -> bool {
        matches!(self.max_uses, Some(max) if self.used_count >= max)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn remaining_uses(&self) -> Option<i64> {
        self.max_uses.map(|max| (max - self.used_count).max(0))
    }
}

/// Maps the quota a caller asked for onto its stored form.
pub fn normalize_max_uses(max_uses: i64) -> Option<i64> {
    if max_uses > 0 {
        Some(max_uses)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct NewAccessKey {
    pub key_code: String,
    pub name: String,
    pub max_uses: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: i64,
    pub key_id: Option<i64>,
    pub user_ip: Option<String>,
    pub request_text: Option<String>,
    pub success: bool,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUsageLog {
    pub key_id: Option<i64>,
    pub user_ip: String,
    pub request_text: String,
    pub success: bool,
    pub error_msg: Option<String>,
}

// Request/Response models
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub access_key: String,
    #[serde(default)]
    pub request_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub key_id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub name: String,
    pub max_uses: Option<i64>,
    pub expires_in_days: Option<i64>,
}
