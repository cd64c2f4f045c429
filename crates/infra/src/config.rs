//! Process configuration read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `JWT_SECRET` | insecure dev value (warns) |
//! | `TOKEN_TTL_SECS` | `3600` |
//! | `DATABASE_URL` | unset → in-memory store |
//! | `WALLET_MAX_ATTEMPTS` | `5` |
//! | `WALLET_BACKOFF_BASE_MS` | `5` |
//! | `WALLET_BACKOFF_MAX_MS` | `200` |
//! | `WALLET_CREDIT_MAX_ATTEMPTS` | `8` |
//! | `WALLET_STORE_TIMEOUT_MS` | `2000` |
//! | `WALLET_RECONCILE_INTERVAL_SECS` | `30` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::reconciliation::ReconcilerConfig;
use crate::retry::RetryPolicy;
use crate::transfer::TransferSettings;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Wallet service configuration.
#[derive(Clone, PartialEq)]
pub struct WalletConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub database_url: Option<String>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub credit_max_attempts: u32,
    pub store_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl core::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("credit_max_attempts", &self.credit_max_attempts)
            .field("store_timeout", &self.store_timeout)
            .field("reconcile_interval", &self.reconcile_interval)
            .finish()
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl: Duration::from_secs(3600),
            database_url: None,
            max_attempts: 5,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(200),
            credit_max_attempts: 8,
            store_timeout: Duration::from_millis(2000),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let jwt_secret = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                defaults.jwt_secret
            }
        };

        let max_attempts = parse(&lookup, "WALLET_MAX_ATTEMPTS", defaults.max_attempts)?;
        let credit_max_attempts = parse(
            &lookup,
            "WALLET_CREDIT_MAX_ATTEMPTS",
            defaults.credit_max_attempts,
        )?;
        if max_attempts == 0 {
            return Err(invalid("WALLET_MAX_ATTEMPTS", "0"));
        }
        if credit_max_attempts == 0 {
            return Err(invalid("WALLET_CREDIT_MAX_ATTEMPTS", "0"));
        }

        let store_timeout = millis(&lookup, "WALLET_STORE_TIMEOUT_MS", defaults.store_timeout)?;
        if store_timeout.is_zero() {
            return Err(invalid("WALLET_STORE_TIMEOUT_MS", "0"));
        }

        Ok(Self {
            jwt_secret,
            token_ttl: secs(&lookup, "TOKEN_TTL_SECS", defaults.token_ttl)?,
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            max_attempts,
            backoff_base: millis(&lookup, "WALLET_BACKOFF_BASE_MS", defaults.backoff_base)?,
            backoff_max: millis(&lookup, "WALLET_BACKOFF_MAX_MS", defaults.backoff_max)?,
            credit_max_attempts,
            store_timeout,
            reconcile_interval: secs(
                &lookup,
                "WALLET_RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval,
            )?,
        })
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            retry: RetryPolicy::exponential(self.max_attempts, self.backoff_base, self.backoff_max),
            credit_retry: RetryPolicy::exponential(
                self.credit_max_attempts,
                self.backoff_base,
                self.backoff_max,
            ),
            store_timeout: self.store_timeout,
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig::default()
            .with_interval(self.reconcile_interval)
            .with_store_timeout(self.store_timeout)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, &raw)),
    }
}

fn millis<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn secs<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}
