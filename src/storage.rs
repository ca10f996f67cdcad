use crate::errors::AppError;
use crate::import::ean_matches;
use crate::models::{
    BillingData, InvoiceRecord, MonthlyVolumes, NetworkCosts, Participant, ParticipantInput,
};
use crate::months::MonthKey;
use sqlx::PgPool;
use uuid::Uuid;

/// Read/write access to the `participants` table.
///
/// Writes are last-write-wins: there is no optimistic-concurrency check, and
/// bulk-import persistence is sequential and non-transactional: a failure
/// midway leaves earlier updates in place and is reported as a warning.
pub struct ParticipantStore {
    pool: PgPool,
}

impl ParticipantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: &ParticipantInput) -> Result<Participant, AppError> {
        let participant = sqlx::query_as::<_, Participant>(
            r#"
            INSERT INTO participants
                (name, address, email, kind, ean, shared_rate_eur_mwh,
                 purchase_rate_eur_mwh, company_number, group_name,
                 monthly_data, billing_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '{}'::jsonb, '{}'::jsonb)
            RETURNING *
            "#,
        )
        .bind(&input.name)
        .bind(&input.address)
        .bind(&input.email)
        .bind(input.kind.as_str())
        .bind(&input.ean)
        .bind(input.shared_rate_eur_mwh)
        .bind(input.purchase_rate_eur_mwh)
        .bind(&input.company_number)
        .bind(&input.group_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(participant)
    }

    pub async fn update(
        &self,
        id: Uuid,
        input: &ParticipantInput,
    ) -> Result<Participant, AppError> {
        let participant = sqlx::query_as::<_, Participant>(
            r#"
            UPDATE participants
            SET name = $2, address = $3, email = $4, kind = $5, ean = $6,
                shared_rate_eur_mwh = $7, purchase_rate_eur_mwh = $8,
                company_number = $9, group_name = $10, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.address)
        .bind(&input.email)
        .bind(input.kind.as_str())
        .bind(&input.ean)
        .bind(input.shared_rate_eur_mwh)
        .bind(input.purchase_rate_eur_mwh)
        .bind(&input.company_number)
        .bind(&input.group_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Participant {} not found", id)))?;

        Ok(participant)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM participants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Participant {} not found", id)));
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Participant, AppError> {
        sqlx::query_as::<_, Participant>("SELECT * FROM participants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Participant {} not found", id)))
    }

    pub async fn list(&self) -> Result<Vec<Participant>, AppError> {
        let participants =
            sqlx::query_as::<_, Participant>("SELECT * FROM participants ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(participants)
    }

    /// Exact normalized-EAN lookup, then leading-zero-insensitive variant
    /// scan. Import files pad EANs inconsistently.
    pub async fn find_by_ean(&self, normalized_ean: &str) -> Result<Option<Participant>, AppError> {
        let exact =
            sqlx::query_as::<_, Participant>("SELECT * FROM participants WHERE ean = $1 LIMIT 1")
                .bind(normalized_ean)
                .fetch_optional(&self.pool)
                .await?;
        if exact.is_some() {
            return Ok(exact);
        }

        // Community scale is small; a scan is fine for the variant match.
        let all = self.list().await?;
        Ok(all
            .into_iter()
            .find(|p| ean_matches(&p.ean, normalized_ean)))
    }

    /// Every member of a group, creation order. The first row is the
    /// representative carrying the group identity on invoices.
    pub async fn list_group(&self, group_name: &str) -> Result<Vec<Participant>, AppError> {
        let members = sqlx::query_as::<_, Participant>(
            "SELECT * FROM participants WHERE group_name = $1 ORDER BY created_at ASC",
        )
        .bind(group_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    /// Replace one month of `monthly_data` wholesale, preserving all other
    /// months. Re-imports discard, not merge, the month's previous values.
    pub async fn replace_month(
        &self,
        id: Uuid,
        month: MonthKey,
        volumes: &MonthlyVolumes,
    ) -> Result<(), AppError> {
        let value = serde_json::to_value(volumes)
            .map_err(|e| AppError::InternalError(format!("volume encoding failed: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE participants
            SET monthly_data = jsonb_set(COALESCE(monthly_data, '{}'::jsonb), $2, $3),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(vec![month.to_string()])
        .bind(&value)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Participant {} not found", id)));
        }
        Ok(())
    }

    /// Upsert one month of network costs inside `billing_data.months`.
    pub async fn set_network_costs(
        &self,
        id: Uuid,
        month: MonthKey,
        costs: &NetworkCosts,
    ) -> Result<(), AppError> {
        let participant = self.get(id).await?;
        let mut billing = participant.billing_data();
        billing.months.insert(month, *costs);
        self.write_billing_data(id, &billing).await
    }

    /// Append a generated invoice to the `billing_data.invoices` ledger.
    /// An existing entry under the same key is overwritten.
    pub async fn append_invoice(
        &self,
        id: Uuid,
        record: &InvoiceRecord,
    ) -> Result<(), AppError> {
        let participant = self.get(id).await?;
        let mut billing = participant.billing_data();
        billing.invoices.insert(record.id.clone(), record.clone());
        self.write_billing_data(id, &billing).await
    }

    async fn write_billing_data(&self, id: Uuid, billing: &BillingData) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE participants SET billing_data = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(billing.to_value())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Participant {} not found", id)));
        }
        Ok(())
    }
}
