// Audit webhook client - posts one JSON report per enforcement event.

use crate::core::moderation::{AuditError, AuditReport, AuditSink};
use async_trait::async_trait;
use reqwest::Client;

pub const SECRET_HEADER: &str = "X-Webhook-Secret";

pub struct AuditWebhook {
    client: Client,
    /// `None` disables reporting.
    url: Option<String>,
    secret: String,
}

impl AuditWebhook {
    pub fn new(url: Option<String>, secret: String) -> Self {
        Self {
            client: Client::new(),
            url: url.filter(|u| !u.trim().is_empty()),
            secret,
        }
    }
}

#[async_trait]
impl AuditSink for AuditWebhook {
    async fn send(&self, report: &AuditReport) -> Result<(), AuditError> {
        let Some(url) = &self.url else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .header(SECRET_HEADER, &self.secret)
            .json(report)
            .send()
            .await
            .map_err(|e| AuditError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuditError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}
