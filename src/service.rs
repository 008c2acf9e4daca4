use crate::config::KeyConfig;
use crate::database::Database;
use crate::errors::ApiError;
use crate::models::{normalize_max_uses, AccessKey, NewAccessKey, NewUsageLog, UsageLogEntry};
use crate::security::{redact, KeyCodeGenerator};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Access key lifecycle: issuing, validating and recording usage.
#[derive(Clone)]
pub struct AccessKeyService {
    db: Database,
    generator: KeyCodeGenerator,
    request_text_max_chars: usize,
    log_page_size: u32,
}

impl AccessKeyService {
    pub fn new(db: Database, config: &KeyConfig) -> Self {
        Self {
            db,
            generator: KeyCodeGenerator::new(config.prefix.clone()),
            request_text_max_chars: config.request_text_max_chars,
            log_page_size: config.log_page_size,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Decides whether `key_code` may be used at `now`. Read-only.
    ///
    /// Returns the full record on success, otherwise one of
    /// `KeyNotFound`, `QuotaExhausted` or `KeyExpired`. Store failures
    /// propagate unchanged.
    pub fn validate(&self, key_code: &str, now: DateTime<Utc>) -> Result<AccessKey, ApiError> {
        if !self.generator.is_well_formed(key_code) {
            debug!(key = %redact(key_code), "malformed access key");
            return Err(ApiError::KeyNotFound);
        }

        let key = self
            .db
            .find_active_key_by_code(key_code)?
            .ok_or(ApiError::KeyNotFound)?;

        if key.quota_exhausted() {
            return Err(ApiError::QuotaExhausted { key_id: key.id });
        }

        if key.is_expired_at(now) {
            return Err(ApiError::KeyExpired { key_id: key.id });
        }

        Ok(key)
    }

    /// Validates `key_code` and books the attempt, whatever its outcome.
    pub fn verify(
        &self,
        key_code: &str,
        user_ip: &str,
        request_text: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessKey, ApiError> {
        match self.validate(key_code, now) {
            Ok(key) => {
                self.record(Some(key.id), user_ip, request_text, true, None);
                Ok(key)
            }
            Err(err) => {
                if err.is_rejection() {
                    info!(key_id = ?err.key_id(), reason = %err, ip = %user_ip, "access key rejected");
                }
                self.record(err.key_id(), user_ip, request_text, false, Some(&err.to_string()));
                Err(err)
            }
        }
    }

    /// Books one validation attempt. Never fails the caller.
    ///
    /// A successful attempt against a resolved key consumes one use; every
    /// attempt appends one ledger row.
    pub fn record(
        &self,
        key_id: Option<i64>,
        user_ip: &str,
        request_text: &str,
        success: bool,
        error_msg: Option<&str>,
    ) {
        if let (true, Some(id)) = (success, key_id) {
            match self.db.increment_usage(id, Utc::now()) {
                Ok(true) => {}
                Ok(false) => warn!(key_id = id, "usage not incremented, quota already reached"),
                Err(e) => warn!(key_id = id, error = %e, "failed to increment key usage"),
            }
        }

        let entry = NewUsageLog {
            key_id,
            user_ip: user_ip.to_string(),
            request_text: truncate_chars(request_text, self.request_text_max_chars),
            success,
            error_msg: error_msg.map(str::to_string),
        };

        if let Err(e) = self.db.insert_usage_log(&entry) {
            warn!(key_id = ?key_id, error = %e, "failed to write usage log");
        }
    }

    pub fn issue_key(
        &self,
        name: &str,
        max_uses: i64,
        expires_in_days: Option<i64>,
    ) -> Result<AccessKey, ApiError> {
        self.issue_key_at(name, max_uses, expires_in_days, Utc::now())
    }

    /// Mints a key. Non-positive `max_uses` means unlimited and a missing or
    /// non-positive `expires_in_days` means the key never expires.
    pub fn issue_key_at(
        &self,
        name: &str,
        max_uses: i64,
        expires_in_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<AccessKey, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidRequest("name must not be empty".to_string()));
        }

        let expires_at = match expires_in_days {
            Some(days) if days > 0 => {
                let ttl = Duration::try_days(days)
                    .ok_or_else(|| ApiError::InvalidRequest("expires_in_days out of range".to_string()))?;
                Some(
                    now.checked_add_signed(ttl)
                        .ok_or_else(|| ApiError::InvalidRequest("expires_in_days out of range".to_string()))?,
                )
            }
            _ => None,
        };

        let new_key = NewAccessKey {
            key_code: self.generator.generate(),
            name: name.to_string(),
            max_uses: normalize_max_uses(max_uses),
            expires_at,
        };

        let key = self.db.create_access_key(&new_key)?;
        info!(
            key_id = key.id,
            key = %redact(&key.key_code),
            max_uses = ?key.max_uses,
            expires_at = ?key.expires_at,
            "access key issued"
        );

        Ok(key)
    }

    pub fn deactivate_key(&self, key_id: i64) -> Result<AccessKey, ApiError> {
        let key = self
            .db
            .deactivate_access_key(key_id, Utc::now())?
            .ok_or(ApiError::UnknownKey(key_id))?;

        info!(key_id, "access key deactivated");
        Ok(key)
    }

    pub fn list_keys(&self) -> Result<Vec<AccessKey>, ApiError> {
        self.db.list_access_keys()
    }

    pub fn logs_for_key(&self, key_id: i64) -> Result<Vec<UsageLogEntry>, ApiError> {
        self.db.usage_logs_for_key(key_id, self.log_page_size)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
