use crate::billing::MembershipFeePolicy;
use serde::Deserialize;

/// Runtime configuration, read once at startup.
///
/// Every variable is validated and startup fails closed on a missing or
/// empty value: there is deliberately no baked-in fallback URL or key pair.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Base URL of the transactional-mail function.
    pub mailer_base_url: String,
    pub mailer_token: String,
    /// Base URL of the privileged user-directory function.
    pub directory_base_url: String,
    pub directory_token: String,
    /// Emails allowed to call the admin endpoints.
    pub admin_emails: Vec<String>,
    /// When the annual membership fee is charged (see billing module).
    pub membership_fee_policy: MembershipFeePolicy,
    /// Inactivity logout, minutes.
    pub session_timeout_minutes: u64,
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))
        .and_then(|value| {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            Ok(value)
        })
}

fn require_http_url(name: &str) -> anyhow::Result<String> {
    require_env(name).and_then(|raw| {
        let parsed = url::Url::parse(&raw)
            .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("{} must be an http(s) URL", name);
        }
        Ok(raw)
    })
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            mailer_base_url: require_http_url("MAILER_BASE_URL")?,
            mailer_token: require_env("MAILER_TOKEN")?,
            directory_base_url: require_http_url("DIRECTORY_BASE_URL")?,
            directory_token: require_env("DIRECTORY_TOKEN")?,
            admin_emails: require_env("ADMIN_EMAILS").map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect::<Vec<_>>()
            })?,
            membership_fee_policy: match std::env::var("MEMBERSHIP_FEE_POLICY") {
                Ok(raw) => MembershipFeePolicy::from_string(raw.trim()).ok_or_else(|| {
                    anyhow::anyhow!(
                        "MEMBERSHIP_FEE_POLICY must be 'every-invoice' or 'once-per-year'"
                    )
                })?,
                Err(_) => MembershipFeePolicy::EveryInvoice,
            },
            session_timeout_minutes: std::env::var("SESSION_TIMEOUT_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SESSION_TIMEOUT_MINUTES must be a number"))?,
        };

        if config.admin_emails.is_empty() {
            anyhow::bail!("ADMIN_EMAILS must contain at least one address");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Mailer base URL: {}", config.mailer_base_url);
        tracing::debug!("Directory base URL: {}", config.directory_base_url);
        tracing::debug!("Admin allowlist size: {}", config.admin_emails.len());
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Allowlist check used by the admin endpoints.
    pub fn is_admin(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails.iter().any(|e| e == &email)
    }
}
