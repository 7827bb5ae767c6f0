use super::notifier::{AlertEvent, AlertProvider};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::json;
use url::Url;

const DISCORD_CONTENT_LIMIT: usize = 2000;

pub(crate) struct DiscordWebhookProvider {
    webhook_url: Url,
    client: Client,
}

impl DiscordWebhookProvider {
    pub(crate) fn new(webhook_url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(3))
            .build()?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

pub(crate) fn format_content(event: &AlertEvent) -> String {
    let mut lines = Vec::new();

    let headline = if event.anomaly {
        "PAYMENT ANOMALY"
    } else {
        event.level.as_str()
    };
    lines.push(format!(
        "**{}** `{}` `{}` `{}`",
        event.service_name, event.environment, event.component, headline
    ));

    lines.push(format!(
        "`{}` `{}`{}",
        event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        event.target,
        match (&event.file, event.line) {
            (Some(file), Some(line)) => format!(" `{}:{}`", file, line),
            _ => String::new(),
        }
    ));

    if let Some(message) = event.message.as_ref().filter(|m| !m.trim().is_empty()) {
        lines.push(format!("> {}", message.trim()));
    }

    if !event.spans.is_empty() {
        let span_chain = event
            .spans
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" > ");
        lines.push(format!("spans: `{}`", span_chain));
    }

    if !event.fields.is_empty() {
        lines.push("fields:".to_string());
        for (k, v) in &event.fields {
            lines.push(format!("- `{}` = `{}`", k, v));
        }
    }

    for span in &event.spans {
        if span.fields.is_empty() {
            continue;
        }
        lines.push(format!("span `{}`:", span.name));
        for (k, v) in &span.fields {
            lines.push(format!("- `{}` = `{}`", k, v));
        }
    }

    truncate_for_discord(lines.join("\n"))
}

#[async_trait]
impl AlertProvider for DiscordWebhookProvider {
    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let content = format_content(event);

        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(anyhow!(
            "discord webhook returned non-success status: {}",
            response.status()
        ))
    }

    fn provider_name(&self) -> &'static str {
        "discord"
    }
}

fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("discord webhook request timed out");
    }
    if error.is_connect() {
        return anyhow!("discord webhook connection failed");
    }
    anyhow!("discord webhook request failed")
}

pub(crate) fn truncate_for_discord(content: String) -> String {
    const SUFFIX: &str = "\n… (truncated)";

    if content.chars().count() <= DISCORD_CONTENT_LIMIT {
        return content;
    }

    let allowed = DISCORD_CONTENT_LIMIT.saturating_sub(SUFFIX.chars().count());
    let mut truncated: String = content.chars().take(allowed).collect();
    truncated.push_str(SUFFIX);
    truncated
}
