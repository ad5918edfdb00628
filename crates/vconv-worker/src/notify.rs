//! Completion/failure webhooks.

use std::time::Duration;

use tracing::debug;
use vconv_models::JobNotification;

use crate::error::{WorkerError, WorkerResult};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "video-converter-service/1.0";

/// POSTs [`JobNotification`] payloads as JSON.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::config_error(format!("webhook client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn notify(&self, url: &str, payload: &JobNotification) -> WorkerResult<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WorkerError::notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::notification(format!(
                "webhook {} returned {}",
                url, status
            )));
        }

        debug!(job_id = %payload.job_id, url = %url, "Webhook delivered");
        Ok(())
    }
}
