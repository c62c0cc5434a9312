//! Alert delivery channels

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::debug;

use crate::config::{EmailConfig, WebhookConfig};
use crate::error::{Error, Result};

use super::Alert;

/// A single delivery target for alerts
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one (possibly aggregated) notification
    async fn deliver(&self, alert: &Alert, count: u64) -> Result<()>;
}

/// Posts alerts as JSON to an HTTP endpoint
pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: String, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build webhook client: {}", e)))?;

        // Channel name keeps the host so operators can tell targets apart.
        let host = url
            .split("//")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("webhook");

        Ok(Self {
            name: format!("webhook:{}", host),
            client,
            url,
        })
    }

    /// Build one channel per configured URL
    pub fn from_config(config: &WebhookConfig) -> Result<Vec<Self>> {
        config
            .urls
            .iter()
            .map(|url| Self::new(url.clone(), config.timeout_ms))
            .collect()
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alert: &Alert, count: u64) -> Result<()> {
        let payload = json!({
            "id": alert.id,
            "title": alert.title,
            "message": alert.message,
            "severity": alert.severity.as_str(),
            "category": alert.category,
            "count": count,
            "data": alert.data,
            "timestamp": alert.created_at,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::ExternalService {
                service: self.name.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::ExternalService {
                service: self.name.clone(),
                message: format!("webhook returned status {}", response.status()),
            });
        }

        debug!(channel = %self.name, "webhook alert delivered");
        Ok(())
    }
}

/// Sends alerts to operators over SMTP
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| Error::Config(format!("Invalid SMTP host: {}", e)))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        let from: Mailbox = config
            .from_email
            .parse()
            .map_err(|_| Error::Config(format!("Invalid from address: {}", config.from_email)))?;

        let to = config
            .to_emails
            .iter()
            .map(|addr| {
                addr.parse()
                    .map_err(|_| Error::Config(format!("Invalid to address: {}", addr)))
            })
            .collect::<Result<Vec<Mailbox>>>()?;

        Ok(Self {
            transport,
            from,
            to,
        })
    }

    fn render_body(alert: &Alert, count: u64) -> String {
        let mut body = format!(
            "{}\n\nSeverity: {}\nCategory: {}\nTimestamp: {}\nOccurrences: {}\n\n{}\n",
            alert.title,
            alert.severity.as_str().to_uppercase(),
            alert.category,
            alert.created_at.to_rfc3339(),
            count,
            alert.message,
        );

        if let Some(data) = &alert.data {
            body.push_str("\nDetails:\n");
            body.push_str(&serde_json::to_string_pretty(data).unwrap_or_default());
            body.push('\n');
        }

        body
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, alert: &Alert, count: u64) -> Result<()> {
        let subject = if count > 1 {
            format!(
                "[{}] {} (x{})",
                alert.severity.as_str().to_uppercase(),
                alert.title,
                count
            )
        } else {
            format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title)
        };

        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        let email = builder
            .body(Self::render_body(alert, count))
            .map_err(|e| Error::ExternalService {
                service: "email".to_string(),
                message: format!("failed to build message: {}", e),
            })?;

        self.transport
            .send(email)
            .await
            .map_err(|e| Error::ExternalService {
                service: "email".to_string(),
                message: e.to_string(),
            })?;

        debug!(recipients = self.to.len(), "email alert delivered");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertSeverity;

    #[test]
    fn test_webhook_channel_name_from_url() {
        let channel =
            WebhookChannel::new("https://hooks.example.com/alerts/abc".to_string(), 1000).unwrap();
        assert_eq!(channel.name(), "webhook:hooks.example.com");
    }

    #[test]
    fn test_email_body_includes_count_and_data() {
        let alert = Alert::new(
            "Gas Price Spike Detected",
            "gas spiked to 120 gwei",
            AlertSeverity::Warning,
            "gas_price_spike",
        )
        .with_data(serde_json::json!({"multiplier": 3.2}));

        let body = EmailChannel::render_body(&alert, 4);
        assert!(body.contains("Occurrences: 4"));
        assert!(body.contains("gas_price_spike"));
        assert!(body.contains("multiplier"));
    }

    #[tokio::test]
    async fn test_email_config_rejects_bad_addresses() {
        let config = EmailConfig {
            enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_user: "user".to_string(),
            smtp_password: "pass".to_string(),
            from_email: "not-an-address".to_string(),
            to_emails: vec!["ops@example.com".to_string()],
        };
        assert!(EmailChannel::from_config(&config).is_err());
    }
}
