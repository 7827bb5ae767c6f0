use anyhow::{Context, Result, bail};
use crates::payments::config::{MoMoConfig, VnPayConfig};

use super::config_model::{BackendServer, Database, DotEnvyConfig, Notifications, PaymentSettings};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: std::env::var("SERVER_PORT_BACKEND")
            .context("SERVER_PORT_BACKEND is invalid")?
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

    let payments = PaymentSettings {
        result_page_url: std::env::var("PAYMENT_RESULT_PAGE_URL")
            .context("PAYMENT_RESULT_PAGE_URL is invalid")?,
        admin_token: optional_env("ADMIN_API_TOKEN"),
        stale_pending_after_minutes: positive_minutes(
            &optional_env("STALE_PENDING_AFTER_MINUTES").unwrap_or_else(|| "30".to_string()),
        )
        .context("STALE_PENDING_AFTER_MINUTES is invalid")?,
    };

    let notifications = Notifications {
        webhook_url: optional_env("NOTIFICATION_WEBHOOK_URL"),
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        payments,
        vnpay: VnPayConfig::from_env()?,
        momo: MoMoConfig::from_env()?,
        notifications,
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn positive_minutes(raw: &str) -> Result<i64> {
    let minutes = raw.trim().parse::<i64>()?;
    if minutes <= 0 {
        bail!("must be a positive number of minutes, got {minutes}");
    }
    Ok(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_threshold_must_be_positive() {
        assert_eq!(positive_minutes("30").unwrap(), 30);
        assert_eq!(positive_minutes(" 5 ").unwrap(), 5);
        assert!(positive_minutes("0").is_err());
        assert!(positive_minutes("-15").is_err());
        assert!(positive_minutes("half an hour").is_err());
    }
}
