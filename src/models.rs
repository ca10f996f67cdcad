use crate::months::MonthKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

// ============ Database Models ============

/// Classification of a community member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Producer,
    Consumer,
}

impl ParticipantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::Producer => "producer",
            ParticipantKind::Consumer => "consumer",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "producer" => ParticipantKind::Producer,
            _ => ParticipantKind::Consumer,
        }
    }
}

/// A member of the energy-sharing community.
///
/// The two JSONB columns carry the per-month energy volumes and the
/// network-cost/invoice history. They are decoded into typed maps through
/// [`Participant::monthly_data`] and [`Participant::billing_data`]; a corrupt
/// entry is dropped with a warning instead of failing the whole row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Participant {
    /// Unique identifier.
    pub id: Uuid,
    /// Full name (person or organization).
    pub name: String,
    /// Postal address printed on invoices.
    pub address: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// "producer" or "consumer".
    pub kind: String,
    /// 18-digit metering-point EAN code.
    pub ean: String,
    /// Shared-energy commodity rate, €/MWh excl. VAT.
    pub shared_rate_eur_mwh: f64,
    /// Purchase rate paid for injected energy, €/MWh. Defaults to 70 at
    /// calculation time when unset.
    pub purchase_rate_eur_mwh: Option<f64>,
    /// Company (VAT) number. Presence switches the shared-energy VAT rate
    /// from 6% to 21%.
    pub company_number: Option<String>,
    /// Free-text group label; members sharing it are invoiced together.
    pub group_name: Option<String>,
    /// Month key -> energy volumes, raw JSONB.
    pub monthly_data: serde_json::Value,
    /// Month key -> network costs plus the generated-invoices ledger, raw JSONB.
    pub billing_data: serde_json::Value,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Participant {
    /// Whether the participant invoices at the company VAT rate.
    pub fn has_company_number(&self) -> bool {
        self.company_number
            .as_deref()
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false)
    }

    /// Typed view of the `monthly_data` column.
    pub fn monthly_data(&self) -> BTreeMap<MonthKey, MonthlyVolumes> {
        parse_month_map(&self.monthly_data, self.id, "monthly_data")
    }

    /// Typed view of the `billing_data` column.
    pub fn billing_data(&self) -> BillingData {
        BillingData::from_value(&self.billing_data, self.id)
    }
}

/// Energy volumes for one participant and one month, in kWh.
///
/// Wire keys keep the field names used by the import files and the stored
/// JSONB documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyVolumes {
    /// Consumption covered by the community ("volume partagé").
    #[serde(rename = "volume_partage", default)]
    pub shared_consumption: f64,
    /// Residual consumption drawn from the network.
    #[serde(rename = "volume_complementaire", default)]
    pub network_consumption: f64,
    /// Injection sold into the community.
    #[serde(rename = "injection_partagee", default)]
    pub shared_injection: f64,
    /// Residual injection onto the network.
    #[serde(rename = "injection_complementaire", default)]
    pub network_injection: f64,
}

impl MonthlyVolumes {
    pub fn add(&mut self, other: &MonthlyVolumes) {
        self.shared_consumption += other.shared_consumption;
        self.network_consumption += other.network_consumption;
        self.shared_injection += other.shared_injection;
        self.network_injection += other.network_injection;
    }

    pub fn is_zero(&self) -> bool {
        self.shared_consumption == 0.0
            && self.network_consumption == 0.0
            && self.shared_injection == 0.0
            && self.network_injection == 0.0
    }
}

/// Network-cost breakdown for one month, € excl. VAT.
///
/// Seven pass-through components plus the precomputed total stored by the
/// grid-operator import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCosts {
    #[serde(rename = "cout_reseau", default)]
    pub network_usage: f64,
    #[serde(rename = "surcharges", default)]
    pub surcharges: f64,
    #[serde(rename = "tarif_capacite", default)]
    pub capacity_tariff: f64,
    #[serde(rename = "tarif_comptage", default)]
    pub metering_tariff: f64,
    #[serde(rename = "tarif_osp", default)]
    pub public_service_obligation: f64,
    #[serde(rename = "transport", default)]
    pub transport: f64,
    #[serde(rename = "redevance_voirie", default)]
    pub road_fee: f64,
    /// Stored total of the components above.
    #[serde(rename = "total", default)]
    pub total: f64,
}

impl NetworkCosts {
    pub fn add(&mut self, other: &NetworkCosts) {
        self.network_usage += other.network_usage;
        self.surcharges += other.surcharges;
        self.capacity_tariff += other.capacity_tariff;
        self.metering_tariff += other.metering_tariff;
        self.public_service_obligation += other.public_service_obligation;
        self.transport += other.transport;
        self.road_fee += other.road_fee;
        self.total += other.total;
    }

    /// Sum of the seven components, ignoring the stored total.
    pub fn component_sum(&self) -> f64 {
        self.network_usage
            + self.surcharges
            + self.capacity_tariff
            + self.metering_tariff
            + self.public_service_obligation
            + self.transport
            + self.road_fee
    }
}

/// A generated invoice as persisted in the `billing_data.invoices` ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Ledger key, `invoice_{participantId}_{startMonth}_{endMonth}`.
    pub id: String,
    /// First month of the billed period.
    pub start_month: MonthKey,
    /// Last month of the billed period.
    pub end_month: MonthKey,
    /// Shared-energy cost excl. VAT.
    pub energy_shared_cost_htva: f64,
    /// Shared-energy cost incl. VAT.
    pub energy_shared_cost_tvac: f64,
    /// Network cost incl. VAT (fixed 21%).
    pub network_cost_tvac: f64,
    /// Membership fee incl. VAT.
    pub membership_fee_tvac: f64,
    /// Revenue for injected energy.
    pub injection_revenue: f64,
    /// Total payable incl. VAT, before injection revenue.
    pub total_cost_tvac: f64,
    /// Net amount due.
    pub net_amount: f64,
    /// Generation timestamp.
    pub generated_at: DateTime<Utc>,
}

/// Decoded `billing_data` column: per-month network costs plus the invoice
/// ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingData {
    #[serde(default)]
    pub months: BTreeMap<MonthKey, NetworkCosts>,
    #[serde(default)]
    pub invoices: BTreeMap<String, InvoiceRecord>,
}

impl BillingData {
    /// Lenient decode: a malformed month entry or invoice entry is dropped
    /// with a warning and the rest of the document survives.
    pub fn from_value(value: &serde_json::Value, participant_id: Uuid) -> Self {
        let mut data = BillingData::default();
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!(
                    "participant {}: billing_data is not an object, treating as empty",
                    participant_id
                );
            }
            return data;
        };

        if let Some(months) = obj.get("months").and_then(|m| m.as_object()) {
            for (key, entry) in months {
                let Ok(month) = key.parse::<MonthKey>() else {
                    tracing::warn!(
                        "participant {}: dropping billing_data month with bad key '{}'",
                        participant_id,
                        key
                    );
                    continue;
                };
                match serde_json::from_value::<NetworkCosts>(entry.clone()) {
                    Ok(costs) => {
                        data.months.insert(month, costs);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "participant {}: dropping malformed billing_data entry for {}: {}",
                            participant_id,
                            key,
                            e
                        );
                    }
                }
            }
        }

        if let Some(invoices) = obj.get("invoices").and_then(|m| m.as_object()) {
            for (key, entry) in invoices {
                match serde_json::from_value::<InvoiceRecord>(entry.clone()) {
                    Ok(record) => {
                        data.invoices.insert(key.clone(), record);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "participant {}: dropping malformed invoice record '{}': {}",
                            participant_id,
                            key,
                            e
                        );
                    }
                }
            }
        }

        data
    }

    /// Re-encode for storage.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Decode a month-key map leniently: bad keys or malformed entries are
/// dropped with a warning and contribute zero downstream.
pub fn parse_month_map(
    value: &serde_json::Value,
    participant_id: Uuid,
    column: &str,
) -> BTreeMap<MonthKey, MonthlyVolumes> {
    let mut map = BTreeMap::new();
    let Some(obj) = value.as_object() else {
        if !value.is_null() {
            tracing::warn!(
                "participant {}: {} is not an object, treating as empty",
                participant_id,
                column
            );
        }
        return map;
    };

    for (key, entry) in obj {
        let Ok(month) = key.parse::<MonthKey>() else {
            tracing::warn!(
                "participant {}: dropping {} entry with bad key '{}'",
                participant_id,
                column,
                key
            );
            continue;
        };
        match serde_json::from_value::<MonthlyVolumes>(entry.clone()) {
            Ok(volumes) => {
                map.insert(month, volumes);
            }
            Err(e) => {
                tracing::warn!(
                    "participant {}: dropping malformed {} entry for {}: {}",
                    participant_id,
                    column,
                    key,
                    e
                );
            }
        }
    }

    map
}

// ============ API Request/Response Models ============

/// Payload for creating or updating a participant.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantInput {
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub kind: ParticipantKind,
    pub ean: String,
    pub shared_rate_eur_mwh: f64,
    pub purchase_rate_eur_mwh: Option<f64>,
    pub company_number: Option<String>,
    pub group_name: Option<String>,
}

/// Selected billing period, validated before any aggregation runs.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PeriodSelection {
    pub start_month: MonthKey,
    pub end_month: MonthKey,
}

impl PeriodSelection {
    /// Rejects inverted ranges at the API boundary.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_month > self.end_month {
            Err(format!(
                "start month {} is after end month {}",
                self.start_month, self.end_month
            ))
        } else {
            Ok(())
        }
    }

    pub fn months(&self) -> Vec<MonthKey> {
        MonthKey::range(self.start_month, self.end_month)
    }

    /// Period label used in filenames and ledger keys.
    pub fn label(&self) -> String {
        if self.start_month == self.end_month {
            self.start_month.to_string()
        } else {
            format!("{}_{}", self.start_month, self.end_month)
        }
    }
}

/// Request body for invoice preview/save.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceRequest {
    pub participant_id: Uuid,
    pub start_month: MonthKey,
    pub end_month: MonthKey,
}

/// Request body for the bulk invoice run.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkInvoiceRequest {
    pub participant_ids: Vec<Uuid>,
    pub start_month: MonthKey,
    pub end_month: MonthKey,
}

/// Member dashboard payload: monthly series plus invoice history.
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub participant_id: Uuid,
    pub name: String,
    pub ean: String,
    pub months: BTreeMap<MonthKey, MonthlyVolumes>,
    pub invoices: Vec<InvoiceRecord>,
}

/// Self-service simulation input. Volumes in kWh/year, rates in €/MWh.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationRequest {
    pub annual_consumption_kwh: f64,
    /// Expected share of consumption covered by the community, 0 to 100.
    pub shared_coverage_pct: f64,
    pub shared_rate_eur_mwh: f64,
    /// Current supplier commodity rate, for the comparison column.
    pub reference_rate_eur_mwh: f64,
    pub company_number: Option<String>,
}

/// Simulation output, € incl. VAT, rounded to 2 decimals.
#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    pub shared_kwh: f64,
    pub residual_kwh: f64,
    pub community_cost_tvac: f64,
    pub reference_cost_tvac: f64,
    pub estimated_saving_tvac: f64,
    pub vat_rate: f64,
}

/// Outcome summary of a bulk import run.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub month: Option<MonthKey>,
    pub rows_total: usize,
    pub eans_matched: usize,
    pub unknown_eans: usize,
    pub participants_updated: usize,
    pub warnings: Vec<String>,
}

/// A user row returned by the admin directory function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    pub email: String,
    pub created_at: Option<String>,
    pub last_sign_in_at: Option<String>,
}

/// Payload for creating a directory user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDirectoryUser {
    pub email: String,
    pub password: String,
}
