use crate::errors::AppError;
use crate::services::FUNCTION_TIMEOUT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard cap of the mail function: at most three attachments per message.
pub const MAX_ATTACHMENTS: usize = 3;

/// Retries after the initial attempt. Transactional mail is the one outbound
/// path that retries; everything else surfaces its first failure.
pub const MAX_RETRIES: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A base64-encoded file attached to a transactional email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_base64: String,
}

/// Templated transactional email payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    /// Server-side template name, e.g. "invoice".
    pub template: String,
    /// Template substitution values.
    pub params: serde_json::Value,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Client for the transactional-mail function.
#[derive(Clone)]
pub struct MailerClient {
    client: Client,
    base_url: String,
    token: String,
}

impl MailerClient {
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(FUNCTION_TIMEOUT)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create mailer client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Send one templated email, retrying up to [`MAX_RETRIES`] times with
    /// exponential backoff (500ms, 1s, 2s).
    pub async fn send(&self, email: &EmailRequest) -> Result<(), AppError> {
        if email.attachments.len() > MAX_ATTACHMENTS {
            return Err(AppError::BadRequest(format!(
                "At most {} attachments per email, got {}",
                MAX_ATTACHMENTS,
                email.attachments.len()
            )));
        }

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::warn!(
                    "Mail send to {} failed ({}), retry {}/{} in {:?}",
                    email.to,
                    last_error,
                    attempt,
                    MAX_RETRIES,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.try_send(email).await {
                Ok(()) => {
                    tracing::info!("✓ Email sent to {} (attempt {})", email.to, attempt + 1);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        Err(AppError::ExternalApiError(format!(
            "Mail send to {} failed after {} attempts: {}",
            email.to,
            MAX_RETRIES + 1,
            last_error
        )))
    }

    async fn try_send(&self, email: &EmailRequest) -> Result<(), AppError> {
        let url = format!("{}/send", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(email)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Mailer request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Mailer returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}
