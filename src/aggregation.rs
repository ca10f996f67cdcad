//! Aggregation of per-month energy volumes and network costs over a billing
//! period.
//!
//! Months absent from a participant's map contribute zero; they are not
//! errors. Inverted ranges never reach this module; the API boundary rejects
//! them first.

use crate::models::{MonthlyVolumes, NetworkCosts, Participant};
use crate::months::MonthKey;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Volumes summed over a period, in kWh.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct AggregatedVolumes {
    pub shared_consumption_kwh: f64,
    pub network_consumption_kwh: f64,
    pub shared_injection_kwh: f64,
    pub network_injection_kwh: f64,
}

impl AggregatedVolumes {
    pub fn add(&mut self, other: &AggregatedVolumes) {
        self.shared_consumption_kwh += other.shared_consumption_kwh;
        self.network_consumption_kwh += other.network_consumption_kwh;
        self.shared_injection_kwh += other.shared_injection_kwh;
        self.network_injection_kwh += other.network_injection_kwh;
    }

    pub fn total_injection_kwh(&self) -> f64 {
        self.shared_injection_kwh + self.network_injection_kwh
    }
}

/// Network costs summed over a period, € excl. VAT, with the VAT-inclusive
/// view derived at a fixed 21%: pass-through costs do not follow the
/// participant's own VAT regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct AggregatedNetworkCosts {
    pub network_usage: f64,
    pub surcharges: f64,
    pub capacity_tariff: f64,
    pub metering_tariff: f64,
    pub public_service_obligation: f64,
    pub transport: f64,
    pub road_fee: f64,
    pub total_htva: f64,
}

/// Fixed multiplier for network-cost VAT, independent of participant status.
pub const NETWORK_VAT_MULTIPLIER: f64 = 1.21;

impl AggregatedNetworkCosts {
    pub fn total_tvac(&self) -> f64 {
        self.total_htva * NETWORK_VAT_MULTIPLIER
    }
}

/// One member's contribution to a group invoice, kept for the itemized
/// section.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemberContribution {
    pub participant_id: Uuid,
    pub name: String,
    pub ean: String,
    pub volumes: AggregatedVolumes,
}

/// Sum the four volume fields across exactly the requested months.
pub fn aggregate_volumes(
    monthly_data: &BTreeMap<MonthKey, MonthlyVolumes>,
    months: &[MonthKey],
) -> AggregatedVolumes {
    let mut totals = AggregatedVolumes::default();
    for month in months {
        if let Some(volumes) = monthly_data.get(month) {
            totals.shared_consumption_kwh += volumes.shared_consumption;
            totals.network_consumption_kwh += volumes.network_consumption;
            totals.shared_injection_kwh += volumes.shared_injection;
            totals.network_injection_kwh += volumes.network_injection;
        }
    }
    totals
}

/// Sum the network-cost components and the stored total across matching
/// months.
pub fn aggregate_network_costs(
    billing_months: &BTreeMap<MonthKey, NetworkCosts>,
    months: &[MonthKey],
) -> AggregatedNetworkCosts {
    let mut totals = AggregatedNetworkCosts::default();
    for month in months {
        if let Some(costs) = billing_months.get(month) {
            totals.network_usage += costs.network_usage;
            totals.surcharges += costs.surcharges;
            totals.capacity_tariff += costs.capacity_tariff;
            totals.metering_tariff += costs.metering_tariff;
            totals.public_service_obligation += costs.public_service_obligation;
            totals.transport += costs.transport;
            totals.road_fee += costs.road_fee;
            totals.total_htva += costs.total;
        }
    }
    totals
}

/// Aggregate each group member independently over the identical period, then
/// sum field-wise. The per-member table is retained for the invoice detail.
pub fn aggregate_group(
    members: &[Participant],
    months: &[MonthKey],
) -> (AggregatedVolumes, Vec<MemberContribution>) {
    let mut group_totals = AggregatedVolumes::default();
    let mut contributions = Vec::with_capacity(members.len());

    for member in members {
        let volumes = aggregate_volumes(&member.monthly_data(), months);
        group_totals.add(&volumes);
        contributions.push(MemberContribution {
            participant_id: member.id,
            name: member.name.clone(),
            ean: member.ean.clone(),
            volumes,
        });
    }

    (group_totals, contributions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volumes(shared: f64, network: f64, inj_shared: f64, inj_network: f64) -> MonthlyVolumes {
        MonthlyVolumes {
            shared_consumption: shared,
            network_consumption: network,
            shared_injection: inj_shared,
            network_injection: inj_network,
        }
    }

    fn month(s: &str) -> MonthKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_absent_months_contribute_zero() {
        let mut data = BTreeMap::new();
        data.insert(month("2024-01"), volumes(100.0, 50.0, 10.0, 5.0));

        let months = MonthKey::range(month("2024-01"), month("2024-03"));
        let totals = aggregate_volumes(&data, &months);

        assert_eq!(totals.shared_consumption_kwh, 100.0);
        assert_eq!(totals.network_consumption_kwh, 50.0);
        assert_eq!(totals.shared_injection_kwh, 10.0);
        assert_eq!(totals.network_injection_kwh, 5.0);
    }

    #[test]
    fn test_only_requested_months_are_summed() {
        let mut data = BTreeMap::new();
        data.insert(month("2023-12"), volumes(999.0, 999.0, 999.0, 999.0));
        data.insert(month("2024-01"), volumes(10.0, 20.0, 30.0, 40.0));
        data.insert(month("2024-02"), volumes(1.0, 2.0, 3.0, 4.0));

        let totals = aggregate_volumes(&data, &[month("2024-01"), month("2024-02")]);
        assert_eq!(totals.shared_consumption_kwh, 11.0);
        assert_eq!(totals.network_consumption_kwh, 22.0);
        assert_eq!(totals.shared_injection_kwh, 33.0);
        assert_eq!(totals.network_injection_kwh, 44.0);
    }

    #[test]
    fn test_range_split_does_not_change_totals() {
        let mut data = BTreeMap::new();
        data.insert(month("2024-01"), volumes(10.0, 0.0, 0.0, 0.0));
        data.insert(month("2024-02"), volumes(20.0, 0.0, 0.0, 0.0));
        data.insert(month("2024-03"), volumes(30.0, 0.0, 0.0, 0.0));

        let whole = aggregate_volumes(&data, &MonthKey::range(month("2024-01"), month("2024-03")));
        let mut split = aggregate_volumes(&data, &[month("2024-01")]);
        split.add(&aggregate_volumes(
            &data,
            &MonthKey::range(month("2024-02"), month("2024-03")),
        ));

        assert_eq!(whole, split);
    }

    #[test]
    fn test_network_cost_aggregation_and_fixed_vat() {
        let mut months_map = BTreeMap::new();
        months_map.insert(
            month("2024-01"),
            NetworkCosts {
                network_usage: 10.0,
                surcharges: 5.0,
                capacity_tariff: 4.0,
                metering_tariff: 3.0,
                public_service_obligation: 2.0,
                transport: 1.0,
                road_fee: 0.5,
                total: 25.5,
            },
        );
        months_map.insert(
            month("2024-02"),
            NetworkCosts {
                network_usage: 10.0,
                total: 10.0,
                ..Default::default()
            },
        );

        let totals = aggregate_network_costs(
            &months_map,
            &MonthKey::range(month("2024-01"), month("2024-02")),
        );
        assert_eq!(totals.network_usage, 20.0);
        assert_eq!(totals.total_htva, 35.5);
        assert!((totals.total_tvac() - 35.5 * 1.21).abs() < 1e-9);
    }

    #[test]
    fn test_group_totals_equal_member_sum() {
        use chrono::Utc;
        use serde_json::json;

        let make = |name: &str, shared: f64| Participant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: None,
            email: None,
            kind: "consumer".to_string(),
            ean: "541400000000000001".to_string(),
            shared_rate_eur_mwh: 100.0,
            purchase_rate_eur_mwh: None,
            company_number: None,
            group_name: Some("ferme".to_string()),
            monthly_data: json!({"2024-01": {"volume_partage": shared}}),
            billing_data: json!(null),
            created_at: Utc::now(),
            updated_at: None,
        };

        let members = vec![make("A", 100.0), make("B", 250.0), make("C", 0.0)];
        let months = [month("2024-01")];
        let (totals, contributions) = aggregate_group(&members, &months);

        assert_eq!(totals.shared_consumption_kwh, 350.0);
        assert_eq!(contributions.len(), 3);
        let sum: f64 = contributions
            .iter()
            .map(|c| c.volumes.shared_consumption_kwh)
            .sum();
        assert_eq!(sum, totals.shared_consumption_kwh);
    }
}
