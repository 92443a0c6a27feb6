//! Environment-driven configuration.
//!
//! Every knob has a default suitable for a local stagenet deployment;
//! values are read once at startup and validated before the server
//! starts accepting work.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GuardianError, GuardianResult};

/// How often the cleanup sweeper scans the pending table.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// How long a pending session may idle before it is reclaimed.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Full wallet RPC endpoint (localhost only).
    pub wallet_rpc_url: String,
    /// Password for wallet files created by the guardian.
    pub wallet_password: String,
    /// Path of the durable escrow registry document.
    pub store_path: PathBuf,
    /// Sweeper period.
    pub sweep_interval: Duration,
    /// Pending session time-to-live.
    pub session_ttl: Duration,
    /// Allowed CORS origin, if any.
    pub allowed_origin: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: u64) -> GuardianResult<u64> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| GuardianError::Validation(format!("{key} must be an integer, got {raw:?}"))),
    }
}

impl GuardianConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> GuardianResult<Self> {
        let config = Self {
            bind_addr: env_or("GUARDIAN_BIND_ADDR", "127.0.0.1:8090"),
            wallet_rpc_url: env_or(
                "GUARDIAN_WALLET_RPC_URL",
                "http://127.0.0.1:18083/json_rpc",
            ),
            wallet_password: env_or("GUARDIAN_WALLET_PASSWORD", ""),
            store_path: PathBuf::from(env_or("GUARDIAN_STORE_PATH", "guardian-escrows.json")),
            sweep_interval: Duration::from_secs(env_secs(
                "GUARDIAN_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?),
            session_ttl: Duration::from_secs(env_secs(
                "GUARDIAN_SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )?),
            allowed_origin: env::var("GUARDIAN_ALLOWED_ORIGIN").ok().filter(|o| !o.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> GuardianResult<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(GuardianError::Validation(
                "GUARDIAN_BIND_ADDR must not be empty".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(GuardianError::Validation(
                "GUARDIAN_SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        if self.session_ttl.is_zero() {
            return Err(GuardianError::Validation(
                "GUARDIAN_SESSION_TTL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        // Only defaults are asserted here; env-var overrides would race
        // with parallel tests mutating the process environment.
        assert_eq!(DEFAULT_SWEEP_INTERVAL_SECS, 60);
        assert_eq!(DEFAULT_SESSION_TTL_SECS, 300);

        let config = GuardianConfig {
            bind_addr: "127.0.0.1:8090".to_string(),
            wallet_rpc_url: "http://127.0.0.1:18083/json_rpc".to_string(),
            wallet_password: String::new(),
            store_path: PathBuf::from("guardian-escrows.json"),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            allowed_origin: None,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let config = GuardianConfig {
            bind_addr: "127.0.0.1:8090".to_string(),
            wallet_rpc_url: "http://127.0.0.1:18083/json_rpc".to_string(),
            wallet_password: String::new(),
            store_path: PathBuf::from("x.json"),
            sweep_interval: Duration::from_secs(60),
            session_ttl: Duration::ZERO,
            allowed_origin: None,
        };
        assert!(matches!(
            config.validate(),
            Err(GuardianError::Validation(_))
        ));
    }
}
