use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use cater_core::booking::FeeSettings;
use cater_core::repository::SettingsProvider;
use cater_core::{CoreError, CoreResult};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Current fee percentages, falling back to `defaults` for keys the
    /// `settings` table does not carry.
    pub async fn fetch_fee_settings(&self, defaults: FeeSettings) -> CoreResult<FeeSettings> {
        #[derive(sqlx::FromRow)]
        struct SettingRow {
            key: String,
            value: Value,
        }

        let rows = sqlx::query_as::<_, SettingRow>(
            "SELECT key, value FROM settings WHERE key IN ('commission_fee', 'service_fee')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut fees = defaults;
        for row in rows {
            // Expected format: {"value": <number/string>}
            let Some(parsed) = row.value.get("value").and_then(setting_decimal) else {
                warn!("Ignoring malformed setting {}", row.key);
                continue;
            };
            match row.key.as_str() {
                "commission_fee" => fees.commission_fee = parsed,
                "service_fee" => fees.service_fee = parsed,
                _ => {}
            }
        }

        Ok(fees)
    }
}

fn setting_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Settings read from Postgres on every call, so fee changes apply to the
/// next booking without a restart.
pub struct StoreSettingsProvider {
    db: DbClient,
    defaults: FeeSettings,
}

impl StoreSettingsProvider {
    pub fn new(db: DbClient, defaults: FeeSettings) -> Self {
        Self { db, defaults }
    }
}

#[async_trait]
impl SettingsProvider for StoreSettingsProvider {
    async fn fee_settings(&self) -> CoreResult<FeeSettings> {
        self.db.fetch_fee_settings(self.defaults).await
    }
}

/// Translate driver errors into the domain taxonomy.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let detail = db_err.constraint().unwrap_or("email").to_string();
            return CoreError::Duplicate(detail);
        }
    }
    CoreError::StorageError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setting_decimal_accepts_numbers_and_strings() {
        assert_eq!(setting_decimal(&json!(10)), Some(Decimal::from(10)));
        assert_eq!(setting_decimal(&json!("12.5")), Decimal::from_str("12.5").ok());
        assert_eq!(setting_decimal(&json!(null)), None);
    }

    #[test]
    fn test_non_database_errors_map_to_storage() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
