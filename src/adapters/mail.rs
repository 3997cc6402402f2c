//! Mail transports.
//!
//! `LogTransport` records and logs mail without delivering it.
//! `WebhookTransport` posts each email as JSON to an HTTP mail API.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::MailTransport;
use crate::domain::OutboundEmail;
use crate::error::{ClassifiedError, Error, ErrorKind, Result};

/// Transport that keeps sent mail in memory
#[derive(Debug, Default)]
pub struct LogTransport {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        info!(to = %email.to, subject = %email.subject, %message_id, "Mail sent (log transport)");
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.clone());
        Ok(message_id)
    }
}

/// Settings for [`WebhookTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
}

/// Response body expected from the mail API
#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    id: Option<String>,
}

/// HTTP mail API client
pub struct WebhookTransport {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, email: &OutboundEmail) -> serde_json::Value {
        serde_json::json!({
            "from": self.config.from,
            "to": email.to,
            "subject": email.subject,
            "body": email.body,
            "unsubscribe_url": email.unsubscribe_url,
        })
    }
}

/// Map an HTTP status to the error taxonomy
fn status_error(status: reqwest::StatusCode, detail: &str) -> Error {
    let message = format!("mail API returned {}: {}", status, detail.trim());
    let error = match status.as_u16() {
        401 | 403 => ClassifiedError::new(ErrorKind::Authentication, message),
        429 => ClassifiedError::new(ErrorKind::RateLimit, message),
        500..=599 => ClassifiedError::new(ErrorKind::ExternalService, message),
        _ => ClassifiedError::new(ErrorKind::ExternalService, message).with_retryable(false),
    };
    error.with_context("service", "smtp").into()
}

#[async_trait]
impl MailTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<String> {
        let mut request = self.client.post(&self.config.url).json(&self.request_body(email));
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            Error::from(
                ClassifiedError::new(ErrorKind::Network, format!("mail API unreachable: {}", e))
                    .with_context("service", "smtp"),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, &detail));
        }

        let parsed: WebhookResponse = response
            .json()
            .await
            .map_err(|e| Error::external("smtp", format!("invalid mail API response: {}", e)))?;

        Ok(parsed.id.unwrap_or_else(|| Uuid::new_v4().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutboundEmail {
        OutboundEmail {
            to: "a@x.com".to_string(),
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
            unsubscribe_url: Some("https://u".to_string()),
        }
    }

    #[tokio::test]
    async fn test_log_transport_records() {
        let transport = LogTransport::new();
        transport.send(&email()).await.unwrap();
        assert_eq!(transport.sent(), vec![email()]);
    }

    #[test]
    fn test_request_body() {
        let transport = WebhookTransport::new(WebhookConfig {
            url: "https://mail.example.com/send".to_string(),
            token: None,
            from: Some("team@example.com".to_string()),
        });
        let body = transport.request_body(&email());
        assert_eq!(body["from"], "team@example.com");
        assert_eq!(body["unsubscribe_url"], "https://u");
    }

    #[test]
    fn test_status_classification() {
        let err = status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err.kind(), Some(ErrorKind::RateLimit));
        assert!(err.is_retryable());

        let err = status_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.kind(), Some(ErrorKind::Authentication));
        assert!(!err.is_retryable());

        let err = status_error(reqwest::StatusCode::BAD_REQUEST, "bad address");
        assert!(!err.is_retryable());
    }
}
