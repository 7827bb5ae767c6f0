use std::env;
use tracing::Level;
use url::Url;

#[derive(Clone)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

#[derive(Clone)]
pub(crate) struct OperatorChannelConfig {
    pub(crate) webhook_url: Url,
    pub(crate) min_level: Level,
}

#[derive(Clone)]
pub(crate) struct ObservabilityConfig {
    pub(crate) service_context: ServiceContext,
    pub(crate) operator: Option<OperatorChannelConfig>,
    /// Collected while parsing and logged once tracing is up.
    pub(crate) warnings: Vec<String>,
}

impl ObservabilityConfig {
    pub(crate) fn from_env(component: &str) -> Self {
        let component = component.trim().to_string();

        let service_name = env_string("SERVICE_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| component.clone());

        let environment = env_string("STAGE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let service_context = ServiceContext {
            service_name,
            environment,
            component,
        };

        let (operator, warnings) = operator_channel_from_env();

        Self {
            service_context,
            operator,
            warnings,
        }
    }
}

fn operator_channel_from_env() -> (Option<OperatorChannelConfig>, Vec<String>) {
    let mut warnings = Vec::new();

    let enabled = env_bool("OPERATOR_NOTIFY_ENABLED").unwrap_or(true);
    if !enabled {
        return (None, warnings);
    }

    let Some(raw) = env_string("OPERATOR_DISCORD_WEBHOOK_URL").filter(|v| !v.trim().is_empty())
    else {
        return (None, warnings);
    };

    let webhook_url = match Url::parse(raw.trim()) {
        Ok(url) => url,
        Err(err) => {
            // The raw URL embeds a credential; never echo it.
            warnings.push(format!(
                "OPERATOR_DISCORD_WEBHOOK_URL is set but invalid; operator alerts disabled (parse error: {err})"
            ));
            return (None, warnings);
        }
    };

    let min_level = match env_string("OPERATOR_NOTIFY_LEVEL") {
        Some(raw) if !raw.trim().is_empty() => parse_level(&raw).unwrap_or_else(|| {
            warnings.push(format!(
                "OPERATOR_NOTIFY_LEVEL is invalid (value: {raw}); defaulting to ERROR"
            ));
            Level::ERROR
        }),
        _ => Level::ERROR,
    };

    (
        Some(OperatorChannelConfig {
            webhook_url,
            min_level,
        }),
        warnings,
    )
}

pub(crate) fn parse_level(input: &str) -> Option<Level> {
    match input.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
