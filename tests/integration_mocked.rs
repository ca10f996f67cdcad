/// Integration tests with mocked serverless functions.
/// Exercises the mailer retry policy and the directory client without
/// hitting real endpoints.
use community_energy_api::billing::MembershipFeePolicy;
use community_energy_api::config::Config;
use community_energy_api::mailer::{Attachment, EmailRequest, MailerClient};
use community_energy_api::models::CreateDirectoryUser;
use community_energy_api::services::DirectoryClient;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create test config
fn create_test_config(function_base_url: String) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 8080,
        mailer_base_url: function_base_url.clone(),
        mailer_token: "test_mailer_token".to_string(),
        directory_base_url: function_base_url,
        directory_token: "test_directory_token".to_string(),
        admin_emails: vec!["admin@example.com".to_string()],
        membership_fee_policy: MembershipFeePolicy::EveryInvoice,
        session_timeout_minutes: 15,
    }
}

fn invoice_email(to: &str) -> EmailRequest {
    EmailRequest {
        to: to.to_string(),
        subject: "Votre facture - période 2024-01".to_string(),
        template: "invoice".to_string(),
        params: serde_json::json!({
            "name": "Alice Dupont",
            "period": "2024-01",
            "net_amount": 206.00
        }),
        attachments: vec![Attachment {
            filename: "Facture_AliceDupont_2024-01.html".to_string(),
            content_base64: "PGh0bWw+PC9odG1sPg==".to_string(),
        }],
    }
}

#[tokio::test]
async fn test_mailer_success_on_first_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/send"))
        .and(body_partial_json(
            serde_json::json!({"to": "member@example.com", "template": "invoice"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sent": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let mailer = MailerClient::new(config.mailer_base_url, config.mailer_token).unwrap();

    let result = mailer.send(&invoice_email("member@example.com")).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_mailer_retries_transient_failures_with_backoff() {
    let mock_server = MockServer::start().await;

    // First two attempts fail, the third succeeds.
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sent": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let mailer = MailerClient::new(config.mailer_base_url, config.mailer_token).unwrap();

    let result = mailer.send(&invoice_email("member@example.com")).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_mailer_gives_up_after_three_retries() {
    let mock_server = MockServer::start().await;

    // Initial attempt + 3 retries = 4 calls, then the error surfaces.
    Mock::given(method("POST"))
        .and(path("/send"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let mailer = MailerClient::new(config.mailer_base_url, config.mailer_token).unwrap();

    let result = mailer.send(&invoice_email("member@example.com")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_directory_list_users() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!([
        {
            "id": "u-1",
            "email": "alice@example.com",
            "created_at": "2024-01-01T00:00:00Z",
            "last_sign_in_at": null
        },
        {
            "id": "u-2",
            "email": "bob@example.com",
            "created_at": null,
            "last_sign_in_at": null
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let directory =
        DirectoryClient::new(config.directory_base_url, config.directory_token).unwrap();

    let users = directory.list_users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].email, "alice@example.com");
}

#[tokio::test]
async fn test_directory_create_user() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_partial_json(
            serde_json::json!({"email": "new@example.com"}),
        ))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "u-3",
            "email": "new@example.com",
            "created_at": "2024-06-01T00:00:00Z",
            "last_sign_in_at": null
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let directory =
        DirectoryClient::new(config.directory_base_url, config.directory_token).unwrap();

    let created = directory
        .create_user(&CreateDirectoryUser {
            email: "new@example.com".to_string(),
            password: "s3cret-pass".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(created.id, "u-3");
}

#[tokio::test]
async fn test_directory_error_status_surfaces_without_retry() {
    let mock_server = MockServer::start().await;

    // Exactly one call: the directory path never retries.
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let directory =
        DirectoryClient::new(config.directory_base_url, config.directory_token).unwrap();

    let result = directory.list_users().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_admin_allowlist_check() {
    let config = create_test_config("https://functions.example.com".to_string());
    assert!(config.is_admin("admin@example.com"));
    assert!(config.is_admin("ADMIN@example.com"));
    assert!(!config.is_admin("intruder@example.com"));
}
