mod config;
mod discord;
mod layer;
mod notifier;

use anyhow::Result;
use config::ObservabilityConfig;
use discord::DiscordWebhookProvider;
use layer::OperatorAlertLayer;
use notifier::Notifier;
use std::sync::Arc;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Target for events an operator must look at regardless of level, e.g. a
/// verified notification that contradicts a settled payment.
pub const ANOMALY_TARGET: &str = "payments::anomaly";

pub fn init_observability(component: &str) -> Result<()> {
    let config = ObservabilityConfig::from_env(component);

    let mut warnings = config.warnings.clone();
    let alert_layer = match config.operator.as_ref() {
        Some(operator) => match DiscordWebhookProvider::new(operator.webhook_url.clone()) {
            Ok(provider) => {
                let notifier = Notifier::new(vec![Arc::new(provider)]);
                let min_level = operator.min_level;
                Some(
                    OperatorAlertLayer::new(notifier, config.service_context.clone(), min_level)
                        .with_filter(filter_fn(move |metadata| {
                            layer::forwards(metadata, min_level)
                        })),
                )
            }
            Err(err) => {
                warnings.push(format!("operator alert client failed to build: {err}"));
                None
            }
        },
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Local time so `TZ=Asia/Ho_Chi_Minh` shows `+07:00` in logs.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    for warning in &warnings {
        warn!(
            service = %config.service_context.service_name,
            environment = %config.service_context.environment,
            component = %config.service_context.component,
            warning = %warning,
            "observability: config warning"
        );
    }

    let enabled = config.operator.is_some() && warnings.len() == config.warnings.len();
    info!(
        service = %config.service_context.service_name,
        environment = %config.service_context.environment,
        component = %config.service_context.component,
        operator_alerts = enabled,
        "observability: initialized"
    );

    Ok(())
}
