//! Financial-calculation engine: turns aggregated volumes and network costs
//! into a billing statement.
//!
//! Volumes are stored in kWh and converted to MWh at calculation time. All
//! monetary outputs are rounded half-up to 2 decimals.

use crate::aggregation::{AggregatedNetworkCosts, AggregatedVolumes, NETWORK_VAT_MULTIPLIER};
use crate::models::{BillingData, Participant};
use crate::months::MonthKey;
use serde::{Deserialize, Serialize};

/// VAT on shared energy when a company number is present.
pub const VAT_COMPANY: f64 = 0.21;
/// VAT on shared energy for private participants.
pub const VAT_PRIVATE: f64 = 0.06;

/// Annual membership fee, € incl. VAT.
pub const MEMBERSHIP_FEE_TVAC: f64 = 60.50;
/// Annual membership fee, € excl. VAT.
pub const MEMBERSHIP_FEE_HTVA: f64 = 50.00;

/// Default purchase rate for injected energy, €/MWh, when the participant has
/// none configured.
pub const DEFAULT_PURCHASE_RATE_EUR_MWH: f64 = 70.0;

/// Round to 2 decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// VAT rate on shared energy: determined solely by the presence of a company
/// number.
pub fn vat_rate(has_company_number: bool) -> f64 {
    if has_company_number {
        VAT_COMPANY
    } else {
        VAT_PRIVATE
    }
}

/// When the annual membership fee is charged.
///
/// The legacy front end charged it on every invoice (its
/// "first invoice of the year" flag was hardcoded true). `EveryInvoice`
/// reproduces that behavior and is the default; `OncePerYear` consults the
/// invoice ledger and charges only when the period's calendar year has no
/// invoice yet. Confirm with the domain owner before switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipFeePolicy {
    EveryInvoice,
    OncePerYear,
}

impl MembershipFeePolicy {
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "every-invoice" => Some(MembershipFeePolicy::EveryInvoice),
            "once-per-year" => Some(MembershipFeePolicy::OncePerYear),
            _ => None,
        }
    }

    /// Whether the fee applies to an invoice whose period starts at
    /// `start_month`, given the participant's existing ledger.
    pub fn fee_applies(&self, ledger: &BillingData, start_month: MonthKey) -> bool {
        match self {
            MembershipFeePolicy::EveryInvoice => true,
            MembershipFeePolicy::OncePerYear => !ledger
                .invoices
                .values()
                .any(|inv| inv.start_month.year() == start_month.year()),
        }
    }
}

/// Inputs to one invoice calculation.
#[derive(Debug, Clone, Copy)]
pub struct InvoiceInputs {
    pub volumes: AggregatedVolumes,
    pub network_costs: AggregatedNetworkCosts,
    /// €/MWh excl. VAT.
    pub shared_rate_eur_mwh: f64,
    /// €/MWh; `None` falls back to [`DEFAULT_PURCHASE_RATE_EUR_MWH`].
    pub purchase_rate_eur_mwh: Option<f64>,
    pub has_company_number: bool,
    pub apply_membership_fee: bool,
}

impl InvoiceInputs {
    pub fn for_participant(
        participant: &Participant,
        volumes: AggregatedVolumes,
        network_costs: AggregatedNetworkCosts,
        apply_membership_fee: bool,
    ) -> Self {
        Self {
            volumes,
            network_costs,
            shared_rate_eur_mwh: participant.shared_rate_eur_mwh,
            purchase_rate_eur_mwh: participant.purchase_rate_eur_mwh,
            has_company_number: participant.has_company_number(),
            apply_membership_fee,
        }
    }
}

/// Computed billing statement, € rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InvoiceTotals {
    pub energy_shared_cost_htva: f64,
    pub energy_shared_cost_tvac: f64,
    pub network_cost_tvac: f64,
    pub membership_fee_tvac: f64,
    pub injection_revenue: f64,
    pub total_cost_tvac: f64,
    pub net_amount: f64,
    pub vat_rate: f64,
}

/// Run the engine over one set of aggregated inputs.
pub fn compute_invoice(inputs: &InvoiceInputs) -> InvoiceTotals {
    let vat = vat_rate(inputs.has_company_number);

    let energy_shared_cost_htva =
        inputs.volumes.shared_consumption_kwh / 1000.0 * inputs.shared_rate_eur_mwh;
    let energy_shared_cost_tvac = energy_shared_cost_htva * (1.0 + vat);

    // Pass-through reimbursement: always 21%, never the participant's rate.
    let network_cost_tvac = inputs.network_costs.total_htva * NETWORK_VAT_MULTIPLIER;

    let membership_fee_tvac = if inputs.apply_membership_fee {
        MEMBERSHIP_FEE_TVAC
    } else {
        0.0
    };

    let purchase_rate = inputs
        .purchase_rate_eur_mwh
        .unwrap_or(DEFAULT_PURCHASE_RATE_EUR_MWH);
    let injection_revenue = inputs.volumes.total_injection_kwh() / 1000.0 * purchase_rate;

    let total_cost_tvac = energy_shared_cost_tvac + network_cost_tvac + membership_fee_tvac;
    let net_amount = total_cost_tvac - injection_revenue;

    InvoiceTotals {
        energy_shared_cost_htva: round2(energy_shared_cost_htva),
        energy_shared_cost_tvac: round2(energy_shared_cost_tvac),
        network_cost_tvac: round2(network_cost_tvac),
        membership_fee_tvac: round2(membership_fee_tvac),
        injection_revenue: round2(injection_revenue),
        total_cost_tvac: round2(total_cost_tvac),
        net_amount: round2(net_amount),
        vat_rate: vat,
    }
}

/// Self-service simulation: estimated annual community cost vs. staying with
/// the reference supplier, using the same VAT rules as the invoice engine.
pub fn simulate(request: &crate::models::SimulationRequest) -> crate::models::SimulationResponse {
    let coverage = (request.shared_coverage_pct / 100.0).clamp(0.0, 1.0);
    let shared_kwh = request.annual_consumption_kwh * coverage;
    let residual_kwh = request.annual_consumption_kwh - shared_kwh;

    let has_company = request
        .company_number
        .as_deref()
        .map(|n| !n.trim().is_empty())
        .unwrap_or(false);
    let vat = vat_rate(has_company);

    let community_htva = shared_kwh / 1000.0 * request.shared_rate_eur_mwh
        + residual_kwh / 1000.0 * request.reference_rate_eur_mwh;
    let reference_htva = request.annual_consumption_kwh / 1000.0 * request.reference_rate_eur_mwh;

    let community_cost_tvac = community_htva * (1.0 + vat);
    let reference_cost_tvac = reference_htva * (1.0 + vat);

    crate::models::SimulationResponse {
        shared_kwh: round2(shared_kwh),
        residual_kwh: round2(residual_kwh),
        community_cost_tvac: round2(community_cost_tvac),
        reference_cost_tvac: round2(reference_cost_tvac),
        estimated_saving_tvac: round2(reference_cost_tvac - community_cost_tvac),
        vat_rate: vat,
    }
}
