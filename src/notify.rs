//! Webhook delivery of finished analyses.

use crate::{callback::BoxError, config::NotifyConfig, session::SourceLocation};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub session_id: Uuid,
    pub source: SourceLocation,
    pub tags: HashMap<String, String>,
    pub analysis: String,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    /// `None` when no webhook is configured
    pub fn from_config(client: Client, config: &NotifyConfig) -> Option<Self> {
        let url = config.webhook_url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }

        Some(Self {
            client,
            url: url.to_string(),
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the payload once. Non-2xx responses count as failures.
    pub async fn deliver(&self, payload: &WebhookPayload) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Session callback that delivers the analysis from a detached task
    pub fn callback(
        &self,
        session_id: Uuid,
        source: SourceLocation,
        tags: HashMap<String, String>,
    ) -> impl Fn(&str) -> Result<(), BoxError> + Send + Sync + 'static {
        let notifier = self.clone();

        move |analysis: &str| -> Result<(), BoxError> {
            let runtime = tokio::runtime::Handle::try_current()?;
            let notifier = notifier.clone();
            let payload = WebhookPayload {
                session_id,
                source: source.clone(),
                tags: tags.clone(),
                analysis: analysis.to_string(),
            };

            runtime.spawn(async move {
                match notifier.deliver(&payload).await {
                    Ok(()) => tracing::debug!(
                        session_id = %payload.session_id,
                        url = %notifier.url,
                        "Analysis delivered to webhook"
                    ),
                    Err(e) => tracing::warn!(
                        session_id = %payload.session_id,
                        url = %notifier.url,
                        error = %e,
                        "Webhook delivery failed"
                    ),
                }
            });

            Ok(())
        }
    }
}
