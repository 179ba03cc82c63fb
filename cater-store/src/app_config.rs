use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

use cater_core::booking::FeeSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub search: SearchConfig,
    pub payments: PaymentsConfig,
    pub mail: MailConfig,
    pub auth: AuthConfig,
    pub fees: FeesConfig,
    pub outbox: OutboxConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub url: String,
    #[serde(default)]
    pub index_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    pub api_url: String,
    pub secret_key: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    cater_core::payment::DEFAULT_CURRENCY.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from_email: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Fee percentages used when the `settings` table has no row for them.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct FeesConfig {
    pub commission_fee: Decimal,
    pub service_fee: Decimal,
}

impl From<FeesConfig> for FeeSettings {
    fn from(fees: FeesConfig) -> Self {
        FeeSettings {
            commission_fee: fees.commission_fee,
            service_fee: fees.service_fee,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `CATER_DATABASE__URL=postgres://...` sets `database.url`
            .add_source(config::Environment::with_prefix("CATER").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
