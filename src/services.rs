use crate::errors::AppError;
use crate::models::{CreateDirectoryUser, DirectoryUser};
use reqwest::Client;
use std::time::Duration;

/// Client-side abort for the serverless-function calls. Requests beyond this
/// fail with a timeout error surfaced to the caller; nothing here retries
/// (the mailer has its own, separate retry policy).
pub const FUNCTION_TIMEOUT: Duration = Duration::from_secs(8);

/// Client for the privileged user-directory function.
///
/// The function lists and creates platform users; handlers gate every call
/// behind the admin-email allowlist before it reaches this client.
#[derive(Clone)]
pub struct DirectoryClient {
    client: Client,
    base_url: String,
    token: String,
}

impl DirectoryClient {
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(FUNCTION_TIMEOUT)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create directory client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// List all platform users.
    pub async fn list_users(&self) -> Result<Vec<DirectoryUser>, AppError> {
        let url = format!("{}/users", self.base_url);
        tracing::info!("Listing directory users");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Directory request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Directory returned {}: {}",
                status, error_text
            )));
        }

        let users = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse directory response: {}", e))
        })?;

        Ok(users)
    }

    /// Create a platform user.
    pub async fn create_user(
        &self,
        user: &CreateDirectoryUser,
    ) -> Result<DirectoryUser, AppError> {
        let url = format!("{}/users", self.base_url);
        tracing::info!("Creating directory user {}", user.email);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(user)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Directory user creation failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Directory user creation failed {}: {}",
                status, error_text
            )));
        }

        let created = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse created user: {}", e))
        })?;

        tracing::info!("✓ Directory user created");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DirectoryClient::new("https://example.com".to_string(), "token".to_string());
        assert!(client.is_ok());
    }
}
