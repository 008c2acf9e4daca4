use crate::config::DatabaseConfig;
use crate::errors::ApiError;
use crate::models::{AccessKey, NewAccessKey, NewUsageLog, UsageLogEntry};
use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::time::Duration;

const SCHEMA: &str = include_str!("../db/schema.sql");

const KEY_COLUMNS: &str =
    "id, key_code, name, max_uses, used_count, expires_at, is_active, created_at, updated_at";

const LOG_COLUMNS: &str = "id, key_id, user_ip, request_text, success, error_msg, created_at";

type Pool = r2d2::Pool<SqliteConnectionManager>;

/// Pooled handle to the key store. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ApiError> {
        Self::open(&DatabaseConfig {
            path: path.to_string(),
            ..DatabaseConfig::default()
        })
    }

    pub fn open(config: &DatabaseConfig) -> Result<Self, ApiError> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", true)
        });

        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)?;

        let db = Database { pool };
        db.init_schema()?;
        tracing::debug!(path = %config.path, pool_size = config.pool_size, "key store ready");
        Ok(db)
    }

    pub fn init_schema(&self) -> Result<(), ApiError> {
        let conn = self.pool.get()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // Access key operations
    pub fn create_access_key(&self, key: &NewAccessKey) -> Result<AccessKey, ApiError> {
        let conn = self.pool.get()?;
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO access_keys (key_code, name, max_uses, expires_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) RETURNING {KEY_COLUMNS}"
        );

        let created = conn.query_row(
            &sql,
            params![key.key_code, key.name, key.max_uses, key.expires_at, now],
            access_key_from_row,
        )?;

        Ok(created)
    }

    pub fn find_active_key_by_code(&self, key_code: &str) -> Result<Option<AccessKey>, ApiError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {KEY_COLUMNS} FROM access_keys WHERE key_code = ?1 AND is_active = 1");

        let key = conn
            .query_row(&sql, params![key_code], access_key_from_row)
            .optional()?;

        Ok(key)
    }

    pub fn get_access_key(&self, key_id: i64) -> Result<Option<AccessKey>, ApiError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {KEY_COLUMNS} FROM access_keys WHERE id = ?1");

        let key = conn
            .query_row(&sql, params![key_id], access_key_from_row)
            .optional()?;

        Ok(key)
    }

    pub fn list_access_keys(&self) -> Result<Vec<AccessKey>, ApiError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEY_COLUMNS} FROM access_keys ORDER BY created_at DESC, id DESC"
        ))?;

        let keys = stmt
            .query_map([], access_key_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    /// Adds one use to the key unless that would take it past its quota.
    ///
    /// Returns whether a row was updated.
    pub fn increment_usage(&self, key_id: i64, now: DateTime<Utc>) -> Result<bool, ApiError> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE access_keys SET used_count = used_count + 1, updated_at = ?1 \
             WHERE id = ?2 AND (max_uses IS NULL OR used_count < max_uses)",
            params![now, key_id],
        )?;
        Ok(updated == 1)
    }

    pub fn deactivate_access_key(
        &self,
        key_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessKey>, ApiError> {
        let conn = self.pool.get()?;
        let sql = format!(
            "UPDATE access_keys SET is_active = 0, updated_at = ?1 WHERE id = ?2 RETURNING {KEY_COLUMNS}"
        );

        let key = conn
            .query_row(&sql, params![now, key_id], access_key_from_row)
            .optional()?;

        Ok(key)
    }

    // Usage log operations
    pub fn insert_usage_log(&self, entry: &NewUsageLog) -> Result<i64, ApiError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO usage_logs (key_id, user_ip, request_text, success, error_msg, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.key_id,
                entry.user_ip,
                entry.request_text,
                entry.success,
                entry.error_msg,
                Utc::now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Ledger rows booked against `key_id`; `None` counts unresolved attempts.
    pub fn count_usage_logs(&self, key_id: Option<i64>) -> Result<i64, ApiError> {
        let conn = self.pool.get()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM usage_logs WHERE key_id IS ?1",
            params![key_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn usage_logs_for_key(&self, key_id: i64, limit: u32) -> Result<Vec<UsageLogEntry>, ApiError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM usage_logs WHERE key_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;

        let logs = stmt
            .query_map(params![key_id, limit], usage_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(logs)
    }
}

fn access_key_from_row(row: &Row<'_>) -> rusqlite::Result<AccessKey> {
    Ok(AccessKey {
        id: row.get(0)?,
        key_code: row.get(1)?,
        name: row.get(2)?,
        max_uses: row.get(3)?,
        used_count: row.get(4)?,
        expires_at: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn usage_log_from_row(row: &Row<'_>) -> rusqlite::Result<UsageLogEntry> {
    Ok(UsageLogEntry {
        id: row.get(0)?,
        key_id: row.get(1)?,
        user_ip: row.get(2)?,
        request_text: row.get(3)?,
        success: row.get(4)?,
        error_msg: row.get(5)?,
        created_at: row.get(6)?,
    })
}
