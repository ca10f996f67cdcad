//! Invoice generation flow, shared by the preview, save, bulk and email
//! handlers:
//!
//! 1. Load the participant (and their group, when labeled)
//! 2. Aggregate volumes and network costs over the selected period
//! 3. Run the financial engine
//! 4. Build the renderable document
//!
//! Any failure aborts the flow and surfaces the error; a group lookup error
//! in particular never degrades to individual-only totals.

use crate::aggregation::{
    aggregate_group, aggregate_network_costs, aggregate_volumes, AggregatedNetworkCosts,
    MemberContribution,
};
use crate::billing::{compute_invoice, InvoiceInputs, MembershipFeePolicy};
use crate::errors::AppError;
use crate::invoice::{invoice_filename, payment_reference, InvoiceDocument, InvoiceIdentity};
use crate::models::{
    BulkInvoiceRequest, InvoiceRecord, InvoiceRequest, Participant, PeriodSelection,
};
use crate::storage::ParticipantStore;
use chrono::Utc;
use std::collections::HashSet;

/// Manifest of a bulk run: one archive entry per rendered invoice, plus
/// non-fatal warnings for the participants that could not be invoiced.
#[derive(Debug, serde::Serialize)]
pub struct BulkInvoiceManifest {
    pub invoices: Vec<InvoiceDocument>,
    pub warnings: Vec<String>,
}

/// Generate a single invoice document. Does not persist anything.
pub async fn generate_invoice(
    store: &ParticipantStore,
    policy: MembershipFeePolicy,
    request: &InvoiceRequest,
) -> Result<InvoiceDocument, AppError> {
    let period = PeriodSelection {
        start_month: request.start_month,
        end_month: request.end_month,
    };
    period.validate().map_err(AppError::BadRequest)?;
    let months = period.months();

    let participant = store.get(request.participant_id).await?;

    // Group invoices aggregate every member sharing the label; the first
    // member is the representative whose identity and commercial terms the
    // invoice carries.
    let (billed, volumes, network_costs, members) = match participant.group_name.as_deref() {
        Some(group) if !group.trim().is_empty() => {
            let group_members = store.list_group(group).await?;
            let Some(representative) = group_members.first().cloned() else {
                return Err(AppError::NotFound(format!(
                    "Group '{}' has no members",
                    group
                )));
            };
            let (volumes, contributions) = aggregate_group(&group_members, &months);
            let network_costs = sum_group_network_costs(&group_members, &months);
            (representative, volumes, network_costs, contributions)
        }
        _ => {
            let volumes = aggregate_volumes(&participant.monthly_data(), &months);
            let network_costs =
                aggregate_network_costs(&participant.billing_data().months, &months);
            (
                participant.clone(),
                volumes,
                network_costs,
                Vec::<MemberContribution>::new(),
            )
        }
    };

    let apply_fee = policy.fee_applies(&billed.billing_data(), period.start_month);
    let inputs = InvoiceInputs::for_participant(&billed, volumes, network_costs, apply_fee);
    let totals = compute_invoice(&inputs);

    Ok(InvoiceDocument {
        identity: InvoiceIdentity {
            participant_id: billed.id,
            name: billed.name.clone(),
            address: billed.address.clone(),
            email: billed.email.clone(),
            ean: billed.ean.clone(),
            company_number: billed.company_number.clone(),
            group_name: billed.group_name.clone(),
        },
        period: period.label(),
        start_month: period.start_month.to_string(),
        end_month: period.end_month.to_string(),
        volumes,
        network_costs,
        totals,
        members,
        payment_reference: payment_reference(&billed.ean, &period),
        filename: invoice_filename(&billed.name, &period),
        generated_at: Utc::now(),
    })
}

/// Generate and persist: the computed invoice is appended to the addressed
/// participant's `billing_data.invoices` ledger.
pub async fn save_invoice(
    store: &ParticipantStore,
    policy: MembershipFeePolicy,
    request: &InvoiceRequest,
) -> Result<InvoiceRecord, AppError> {
    let document = generate_invoice(store, policy, request).await?;

    let record = InvoiceRecord {
        id: format!(
            "invoice_{}_{}_{}",
            request.participant_id, request.start_month, request.end_month
        ),
        start_month: request.start_month,
        end_month: request.end_month,
        energy_shared_cost_htva: document.totals.energy_shared_cost_htva,
        energy_shared_cost_tvac: document.totals.energy_shared_cost_tvac,
        network_cost_tvac: document.totals.network_cost_tvac,
        membership_fee_tvac: document.totals.membership_fee_tvac,
        injection_revenue: document.totals.injection_revenue,
        total_cost_tvac: document.totals.total_cost_tvac,
        net_amount: document.totals.net_amount,
        generated_at: document.generated_at,
    };

    store.append_invoice(request.participant_id, &record).await?;
    tracing::info!(
        "Invoice {} saved for participant {}",
        record.id,
        request.participant_id
    );

    Ok(record)
}

/// Bulk variant: one invoice per selected participant, deduplicated to one
/// per group. Failures for individual participants become warnings; the run
/// continues.
pub async fn generate_bulk(
    store: &ParticipantStore,
    policy: MembershipFeePolicy,
    request: &BulkInvoiceRequest,
) -> Result<BulkInvoiceManifest, AppError> {
    let period = PeriodSelection {
        start_month: request.start_month,
        end_month: request.end_month,
    };
    period.validate().map_err(AppError::BadRequest)?;

    let mut manifest = BulkInvoiceManifest {
        invoices: Vec::new(),
        warnings: Vec::new(),
    };
    let mut seen_groups: HashSet<String> = HashSet::new();

    for &participant_id in &request.participant_ids {
        let participant = match store.get(participant_id).await {
            Ok(p) => p,
            Err(e) => {
                manifest
                    .warnings
                    .push(format!("participant {}: {}", participant_id, e));
                continue;
            }
        };

        if let Some(group) = non_empty_group(&participant) {
            if !seen_groups.insert(group.to_string()) {
                tracing::debug!(
                    "Skipping {}: group '{}' already invoiced in this run",
                    participant.name,
                    group
                );
                continue;
            }
        }

        let single = InvoiceRequest {
            participant_id,
            start_month: request.start_month,
            end_month: request.end_month,
        };
        match generate_invoice(store, policy, &single).await {
            Ok(document) => manifest.invoices.push(document),
            Err(e) => {
                manifest
                    .warnings
                    .push(format!("participant {}: {}", participant.name, e));
            }
        }
    }

    tracing::info!(
        "Bulk invoice run complete: {} generated, {} warnings",
        manifest.invoices.len(),
        manifest.warnings.len()
    );

    Ok(manifest)
}

fn non_empty_group(participant: &Participant) -> Option<&str> {
    participant
        .group_name
        .as_deref()
        .filter(|g| !g.trim().is_empty())
}

fn sum_group_network_costs(
    members: &[Participant],
    months: &[crate::months::MonthKey],
) -> AggregatedNetworkCosts {
    let mut totals = AggregatedNetworkCosts::default();
    for member in members {
        let costs = aggregate_network_costs(&member.billing_data().months, months);
        totals.network_usage += costs.network_usage;
        totals.surcharges += costs.surcharges;
        totals.capacity_tariff += costs.capacity_tariff;
        totals.metering_tariff += costs.metering_tariff;
        totals.public_service_obligation += costs.public_service_obligation;
        totals.transport += costs.transport;
        totals.road_fee += costs.road_fee;
        totals.total_htva += costs.total_htva;
    }
    totals
}
