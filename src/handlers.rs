use crate::billing;
use crate::cache_validator::ValidatedCacheEntry;
use crate::config::Config;
use crate::errors::AppError;
use crate::import;
use crate::invoices;
use crate::mailer::{Attachment, EmailRequest, MailerClient};
use crate::models::*;
use crate::months::MonthKey;
use crate::services::DirectoryClient;
use crate::sessions::{SessionStatus, SessionTracker};
use crate::storage::ParticipantStore;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use moka::future::Cache;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Client for the transactional-mail function (optional).
    pub mailer: Option<MailerClient>,
    /// Client for the privileged user-directory function (optional).
    pub directory: Option<DirectoryClient>,
    /// Import drafts: parsed-but-unconfirmed uploads, checksummed, TTL-bound.
    pub draft_cache: Cache<String, String>,
    /// Inactivity watchdog for logged-in sessions.
    pub sessions: Arc<SessionTracker>,
}

impl AppState {
    fn store(&self) -> ParticipantStore {
        ParticipantStore::new(self.db.clone())
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "community-energy-api",
            "version": "0.1.0"
        })),
    )
}

// ============ Participants ============

/// Simplified RFC 5322 shape check, enough to catch typoed addresses before
/// they reach the mail function.
fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 {
        return false;
    }
    let email_regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .unwrap();
    email_regex.is_match(email)
}

fn validate_participant_input(input: &ParticipantInput) -> Result<String, AppError> {
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name is required".to_string()));
    }

    if !import::is_valid_ean(&input.ean) {
        return Err(AppError::BadRequest(
            "EAN must contain exactly 18 digits".to_string(),
        ));
    }
    let ean = import::normalize_ean(&input.ean);

    if input
        .email
        .as_deref()
        .is_some_and(|e| !e.trim().is_empty() && !is_valid_email(e))
    {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }

    if input.shared_rate_eur_mwh < 0.0 {
        return Err(AppError::BadRequest(
            "Shared-energy rate cannot be negative".to_string(),
        ));
    }
    if input.purchase_rate_eur_mwh.is_some_and(|r| r < 0.0) {
        return Err(AppError::BadRequest(
            "Purchase rate cannot be negative".to_string(),
        ));
    }

    Ok(ean)
}

/// GET /api/v1/participants
pub async fn list_participants(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Participant>>, AppError> {
    let participants = state.store().list().await?;
    Ok(Json(participants))
}

/// POST /api/v1/participants
pub async fn create_participant(
    State(state): State<Arc<AppState>>,
    Json(mut input): Json<ParticipantInput>,
) -> Result<(StatusCode, Json<Participant>), AppError> {
    tracing::info!("POST /participants - {}", input.name);
    input.ean = validate_participant_input(&input)?;

    let participant = state.store().create(&input).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

/// GET /api/v1/participants/:id
pub async fn get_participant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Participant>, AppError> {
    let participant = state.store().get(id).await?;
    Ok(Json(participant))
}

/// PUT /api/v1/participants/:id
pub async fn update_participant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(mut input): Json<ParticipantInput>,
) -> Result<Json<Participant>, AppError> {
    tracing::info!("PUT /participants/{}", id);
    input.ean = validate_participant_input(&input)?;

    let participant = state.store().update(id, &input).await?;
    Ok(Json(participant))
}

/// DELETE /api/v1/participants/:id
pub async fn delete_participant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /participants/{}", id);
    state.store().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/participants/:id/dashboard
///
/// Monthly series plus invoice history for the member dashboard.
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DashboardResponse>, AppError> {
    let participant = state.store().get(id).await?;

    let mut invoices: Vec<InvoiceRecord> =
        participant.billing_data().invoices.into_values().collect();
    invoices.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));

    Ok(Json(DashboardResponse {
        participant_id: participant.id,
        name: participant.name.clone(),
        ean: participant.ean.clone(),
        months: participant.monthly_data(),
        invoices,
    }))
}

/// PUT /api/v1/participants/:id/network-costs/:month
pub async fn set_network_costs(
    State(state): State<Arc<AppState>>,
    Path((id, month)): Path<(Uuid, String)>,
    Json(costs): Json<NetworkCosts>,
) -> Result<StatusCode, AppError> {
    let month: MonthKey = month.parse().map_err(AppError::BadRequest)?;
    tracing::info!("PUT /participants/{}/network-costs/{}", id, month);

    state.store().set_network_costs(id, month, &costs).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Simulation ============

/// POST /api/v1/simulate
///
/// Self-service calculator: estimated community cost vs. the reference
/// supplier, using the same VAT rules as the invoice engine.
pub async fn simulate(
    State(_state): State<Arc<AppState>>,
    Json(request): Json<SimulationRequest>,
) -> Result<Json<SimulationResponse>, AppError> {
    if request.annual_consumption_kwh < 0.0 {
        return Err(AppError::BadRequest(
            "Annual consumption cannot be negative".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&request.shared_coverage_pct) {
        return Err(AppError::BadRequest(
            "Shared coverage must be between 0 and 100".to_string(),
        ));
    }
    if request.shared_rate_eur_mwh < 0.0 || request.reference_rate_eur_mwh < 0.0 {
        return Err(AppError::BadRequest(
            "Rates cannot be negative".to_string(),
        ));
    }

    Ok(Json(billing::simulate(&request)))
}

// ============ Bulk import ============

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub month: MonthKey,
}

/// GET /api/v1/import/template
pub async fn import_template() -> (StatusCode, [(axum::http::HeaderName, &'static str); 2], String)
{
    (
        StatusCode::OK,
        [
            (axum::http::header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                axum::http::header::CONTENT_DISPOSITION,
                "attachment; filename=\"import_mensuel.csv\"",
            ),
        ],
        import::import_template(),
    )
}

/// POST /api/v1/import/monthly?month=YYYY-MM
///
/// Body: the CSV content. Rows are matched to participants by EAN;
/// unmatched EANs are counted and skipped. Matched totals replace the
/// participant's data for the target month wholesale. Persistence is
/// sequential; a failure mid-run leaves earlier updates in place and is
/// reported as a warning.
pub async fn import_monthly(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImportQuery>,
    body: String,
) -> Result<Json<ImportReport>, AppError> {
    tracing::info!("POST /import/monthly - month {}", query.month);

    let parsed = import::parse_import(&body).map_err(AppError::BadRequest)?;

    let store = state.store();
    let mut report = ImportReport {
        month: Some(query.month),
        rows_total: parsed.rows_total,
        warnings: parsed.warnings,
        ..Default::default()
    };
    if parsed.rows_without_ean > 0 {
        report
            .warnings
            .push(format!("{} row(s) without an EAN", parsed.rows_without_ean));
    }

    // Resolve every EAN first; several source EANs can map to the same
    // participant through variant matching, and those rows accumulate.
    let mut accumulated: HashMap<Uuid, (String, MonthlyVolumes)> = HashMap::new();
    for (ean, volumes) in &parsed.readings {
        match store.find_by_ean(ean).await? {
            Some(participant) => {
                report.eans_matched += 1;
                let entry = accumulated
                    .entry(participant.id)
                    .or_insert_with(|| (participant.name.clone(), MonthlyVolumes::default()));
                entry.1.add(volumes);
            }
            None => {
                tracing::debug!("Unknown EAN in import: {}", ean);
                report.unknown_eans += 1;
            }
        }
    }

    for (participant_id, (name, volumes)) in &accumulated {
        match store
            .replace_month(*participant_id, query.month, volumes)
            .await
        {
            Ok(()) => report.participants_updated += 1,
            Err(e) => {
                tracing::error!("Import update failed for {}: {}", name, e);
                report.warnings.push(format!("{}: {}", name, e));
            }
        }
    }

    tracing::info!(
        "Import complete: {} rows, {} EAN(s) matched, {} unknown EAN(s), {} participant(s) updated",
        report.rows_total,
        report.eans_matched,
        report.unknown_eans,
        report.participants_updated
    );

    Ok(Json(report))
}

/// POST /api/v1/import/draft
///
/// Stash an upload before confirmation. The draft lives in a TTL cache,
/// checksummed against corruption; the returned key retrieves it.
pub async fn save_import_draft(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = Uuid::new_v4().to_string();
    let entry = ValidatedCacheEntry::new(body);
    state.draft_cache.insert(key.clone(), entry.serialize()).await;

    Ok(Json(json!({ "draft_key": key })))
}

/// GET /api/v1/import/draft/:key
pub async fn get_import_draft(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<String, AppError> {
    let Some(cached) = state.draft_cache.get(&key).await else {
        return Err(AppError::NotFound("Draft expired or unknown".to_string()));
    };

    match ValidatedCacheEntry::deserialize_and_validate(&cached) {
        Some(content) => Ok(content),
        None => {
            // Corrupted entry: drop it so the next read is a clean miss.
            state.draft_cache.invalidate(&key).await;
            Err(AppError::NotFound(
                "Draft failed integrity validation".to_string(),
            ))
        }
    }
}

// ============ Invoices ============

/// POST /api/v1/invoices/preview
pub async fn invoice_preview(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvoiceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(
        "POST /invoices/preview - participant {} period {} to {}",
        request.participant_id,
        request.start_month,
        request.end_month
    );

    let document = invoices::generate_invoice(
        &state.store(),
        state.config.membership_fee_policy,
        &request,
    )
    .await?;
    let html = document.to_html();

    Ok(Json(json!({ "document": document, "html": html })))
}

/// POST /api/v1/invoices/save
pub async fn invoice_save(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvoiceRequest>,
) -> Result<Json<InvoiceRecord>, AppError> {
    tracing::info!(
        "POST /invoices/save - participant {} period {} to {}",
        request.participant_id,
        request.start_month,
        request.end_month
    );

    let record =
        invoices::save_invoice(&state.store(), state.config.membership_fee_policy, &request)
            .await?;
    Ok(Json(record))
}

/// POST /api/v1/invoices/bulk
///
/// One invoice per selected participant, deduplicated to one per group.
/// Returns the archive manifest (filename + rendered HTML per invoice) the
/// client bundles into a single download.
pub async fn invoice_bulk(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkInvoiceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(
        "POST /invoices/bulk - {} participant(s)",
        request.participant_ids.len()
    );

    let manifest =
        invoices::generate_bulk(&state.store(), state.config.membership_fee_policy, &request)
            .await?;

    let archive: Vec<serde_json::Value> = manifest
        .invoices
        .iter()
        .map(|doc| {
            json!({
                "filename": doc.filename,
                "html": doc.to_html(),
                "document": doc,
            })
        })
        .collect();

    Ok(Json(json!({
        "archive": archive,
        "warnings": manifest.warnings,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EmailInvoiceRequest {
    pub participant_id: Uuid,
    pub start_month: MonthKey,
    pub end_month: MonthKey,
    /// Defaults to the participant's email.
    pub to: Option<String>,
}

/// POST /api/v1/invoices/email
pub async fn invoice_email(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EmailInvoiceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(mailer) = &state.mailer else {
        return Err(AppError::ExternalApiError(
            "Mailer client not available".to_string(),
        ));
    };

    let invoice_request = InvoiceRequest {
        participant_id: request.participant_id,
        start_month: request.start_month,
        end_month: request.end_month,
    };
    let document = invoices::generate_invoice(
        &state.store(),
        state.config.membership_fee_policy,
        &invoice_request,
    )
    .await?;

    let to = match request.to.or_else(|| document.identity.email.clone()) {
        Some(address) if !address.trim().is_empty() => address,
        _ => {
            return Err(AppError::BadRequest(
                "Participant has no email address".to_string(),
            ))
        }
    };

    let email = EmailRequest {
        to: to.clone(),
        subject: format!("Votre facture - période {}", document.period),
        template: "invoice".to_string(),
        params: json!({
            "name": document.identity.name,
            "period": document.period,
            "net_amount": document.totals.net_amount,
            "payment_reference": document.payment_reference,
        }),
        attachments: vec![Attachment {
            filename: document.filename.replace(".pdf", ".html"),
            content_base64: BASE64.encode(document.to_html().as_bytes()),
        }],
    };

    mailer.send(&email).await?;

    Ok(Json(json!({ "sent": true, "to": to })))
}

// ============ Admin directory ============

/// Resolve and authorize the calling administrator from the
/// `X-Admin-Email` header against the configured allowlist.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let email = headers
        .get("X-Admin-Email")
        .or_else(|| headers.get("x-admin-email"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Admin-Email header".to_string()))?;

    if !state.config.is_admin(email) {
        return Err(AppError::Unauthorized(format!(
            "{} is not on the admin allowlist",
            email
        )));
    }

    Ok(email.to_string())
}

/// GET /api/v1/admin/users
pub async fn admin_list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<DirectoryUser>>, AppError> {
    let admin = require_admin(&state, &headers)?;
    tracing::info!("GET /admin/users by {}", admin);

    let Some(directory) = &state.directory else {
        return Err(AppError::ExternalApiError(
            "Directory client not available".to_string(),
        ));
    };

    let users = directory.list_users().await?;
    Ok(Json(users))
}

/// POST /api/v1/admin/users
pub async fn admin_create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(user): Json<CreateDirectoryUser>,
) -> Result<(StatusCode, Json<DirectoryUser>), AppError> {
    let admin = require_admin(&state, &headers)?;
    tracing::info!("POST /admin/users by {} for {}", admin, user.email);

    if !is_valid_email(&user.email) {
        return Err(AppError::BadRequest("Valid email required".to_string()));
    }
    if user.password.len() < 8 {
        return Err(AppError::BadRequest(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let Some(directory) = &state.directory else {
        return Err(AppError::ExternalApiError(
            "Directory client not available".to_string(),
        ));
    };

    let created = directory.create_user(&user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// ============ Session watchdog ============

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

/// POST /api/v1/session/touch
pub async fn session_touch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> StatusCode {
    state.sessions.touch(&query.session_id, Utc::now());
    StatusCode::NO_CONTENT
}

/// GET /api/v1/session/status
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Json<SessionStatus> {
    Json(state.sessions.status(&query.session_id, Utc::now()))
}

/// POST /api/v1/session/logout
pub async fn session_logout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> StatusCode {
    state.sessions.logout(&query.session_id);
    StatusCode::NO_CONTENT
}
