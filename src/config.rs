use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::recurrence::RecurrencePolicy;
use crate::engine::sweep::SweepOptions;

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    // Miss sweep
    pub sweep_enabled: bool,
    pub sweep_interval_secs: u64,
    pub sweep_run_deadline_secs: u64,
    pub sweep_concurrency: usize,
    pub sweep_lookback_periods: u32,
    pub sweep_token: Option<String>,
    pub marker_retention_days: i64,
    pub claim_ttl_secs: i64,

    // Penalty delivery
    pub penalty_webhook_url: Option<String>,
    pub penalty_timeout_secs: u64,

    pub default_horizon_months: u32,
}

/// `default` when the variable is unset or blank; an error when it is set to
/// something that does not parse.
fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} has invalid value '{value}'")),
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    parse_or(key, env::var(key).ok(), default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: var_or("PORT", 8080)?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),

            sweep_enabled: var_or("SWEEP_ENABLED", true)?,
            sweep_interval_secs: var_or("SWEEP_INTERVAL_SECS", 3600)?,
            sweep_run_deadline_secs: var_or("SWEEP_RUN_DEADLINE_SECS", 120)?,
            sweep_concurrency: var_or("SWEEP_CONCURRENCY", 8)?,
            sweep_lookback_periods: var_or("SWEEP_LOOKBACK_PERIODS", 1)?,
            sweep_token: non_empty("SWEEP_TOKEN"),
            marker_retention_days: var_or("MARKER_RETENTION_DAYS", 400)?,
            claim_ttl_secs: var_or("CLAIM_TTL_SECS", 600)?,

            penalty_webhook_url: non_empty("PENALTY_WEBHOOK_URL"),
            penalty_timeout_secs: var_or("PENALTY_TIMEOUT_SECS", 10)?,

            default_horizon_months: var_or("DEFAULT_HORIZON_MONTHS", 12)?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn recurrence_policy(&self) -> RecurrencePolicy {
        RecurrencePolicy {
            default_horizon_months: self.default_horizon_months,
        }
    }

    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            concurrency: self.sweep_concurrency.max(1),
            run_deadline: Duration::from_secs(self.sweep_run_deadline_secs),
            dispatch_timeout: Duration::from_secs(self.penalty_timeout_secs),
            lookback_periods: self.sweep_lookback_periods.max(1),
            marker_retention: chrono::Duration::days(self.marker_retention_days.max(1)),
            claim_ttl: chrono::Duration::seconds(self.claim_ttl_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "127.0.0.1".into(),
            port: 8080,
            frontend_url: "http://localhost:3000".into(),
            sweep_enabled: false,
            sweep_interval_secs: 3600,
            sweep_run_deadline_secs: 120,
            sweep_concurrency: 8,
            sweep_lookback_periods: 1,
            sweep_token: None,
            marker_retention_days: 400,
            claim_ttl_secs: 600,
            penalty_webhook_url: None,
            penalty_timeout_secs: 10,
            default_horizon_months: 12,
        }
    }
}
