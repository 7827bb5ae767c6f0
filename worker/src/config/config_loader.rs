use anyhow::{Context, Result, bail};
use crates::payments::config::{MoMoConfig, VnPayConfig};

use super::config_model::{Database, DotEnvyConfig, Notifications, Reconciliation, WorkerServer};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let worker_server = WorkerServer {
        port: std::env::var("SERVER_PORT_WORKER")
            .context("SERVER_PORT_WORKER is invalid")?
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .context("SERVER_BODY_LIMIT is invalid")?
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .context("SERVER_TIMEOUT is invalid")?
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").context("DATABASE_URL is invalid")?,
    };

    let reconciliation = Reconciliation {
        interval_secs: env_or("RECONCILE_INTERVAL_SECS", "1800")
            .parse::<u64>()
            .context("RECONCILE_INTERVAL_SECS is invalid")?
            .max(1),
        stale_after_secs: positive_secs(&env_or("RECONCILE_STALE_AFTER_SECS", "1800"))
            .context("RECONCILE_STALE_AFTER_SECS is invalid")?,
        batch_limit: optional_env("RECONCILE_BATCH_LIMIT")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("RECONCILE_BATCH_LIMIT is invalid")?,
        gateway_check_enabled: env_or("RECONCILE_GATEWAY_CHECK_ENABLED", "false")
            .parse::<bool>()
            .context("RECONCILE_GATEWAY_CHECK_ENABLED is invalid")?,
        gateway_check_max: env_or("RECONCILE_GATEWAY_CHECK_MAX", "20")
            .parse::<usize>()
            .context("RECONCILE_GATEWAY_CHECK_MAX is invalid")?,
        gateway_timeout_ms: env_or("RECONCILE_GATEWAY_TIMEOUT_MS", "5000")
            .parse::<u64>()
            .context("RECONCILE_GATEWAY_TIMEOUT_MS is invalid")?,
        internal_token: optional_env("INTERNAL_RECONCILE_TOKEN"),
    };

    let notifications = Notifications {
        webhook_url: optional_env("NOTIFICATION_WEBHOOK_URL"),
    };

    Ok(DotEnvyConfig {
        worker_server,
        database,
        reconciliation,
        vnpay: VnPayConfig::from_env()?,
        momo: MoMoConfig::from_env()?,
        notifications,
    })
}

fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

/// A zero or negative threshold would put the cutoff at or after now and fail
/// rows that were just created.
fn positive_secs(raw: &str) -> Result<i64> {
    let secs = raw.trim().parse::<i64>()?;
    if secs <= 0 {
        bail!("must be a positive number of seconds, got {secs}");
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_threshold_rejects_zero_and_negative_values() {
        assert_eq!(positive_secs("1800").unwrap(), 1800);
        assert!(positive_secs("0").is_err());
        assert!(positive_secs("-60").is_err());
        assert!(positive_secs("").is_err());
    }

    #[test]
    fn env_or_falls_back_on_blank_values() {
        assert_eq!(env_or("RECONCILE_TEST_UNSET_KEY", "1800"), "1800");
    }
}
