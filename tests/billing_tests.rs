/// Unit tests for the aggregation + financial-calculation pipeline.
/// Covers the period walking, zero-for-absent-months behavior, VAT
/// selection, the group invariant, and the reference billing scenario.
use community_energy_api::aggregation::{
    aggregate_group, aggregate_network_costs, aggregate_volumes,
};
use community_energy_api::billing::{
    compute_invoice, vat_rate, InvoiceInputs, MembershipFeePolicy, DEFAULT_PURCHASE_RATE_EUR_MWH,
    MEMBERSHIP_FEE_TVAC,
};
use community_energy_api::models::{BillingData, MonthlyVolumes, Participant, PeriodSelection};
use community_energy_api::months::MonthKey;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

fn month(s: &str) -> MonthKey {
    s.parse().unwrap()
}

fn participant(
    name: &str,
    group: Option<&str>,
    company_number: Option<&str>,
    monthly: serde_json::Value,
    billing: serde_json::Value,
) -> Participant {
    Participant {
        id: Uuid::new_v4(),
        name: name.to_string(),
        address: Some("Rue de l'Église 1, 6940 Durbuy".to_string()),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        kind: "consumer".to_string(),
        ean: "541448912345678901".to_string(),
        shared_rate_eur_mwh: 100.0,
        purchase_rate_eur_mwh: None,
        company_number: company_number.map(|s| s.to_string()),
        group_name: group.map(|s| s.to_string()),
        monthly_data: monthly,
        billing_data: billing,
        created_at: Utc::now(),
        updated_at: None,
    }
}

#[cfg(test)]
mod period_tests {
    use super::*;

    #[test]
    fn test_inverted_range_rejected_before_aggregation() {
        let period = PeriodSelection {
            start_month: month("2024-06"),
            end_month: month("2024-01"),
        };
        assert!(period.validate().is_err());
    }

    #[test]
    fn test_valid_range_walks_inclusive() {
        let period = PeriodSelection {
            start_month: month("2023-12"),
            end_month: month("2024-02"),
        };
        assert!(period.validate().is_ok());
        assert_eq!(period.months().len(), 3);
    }

    #[test]
    fn test_single_month_range() {
        let period = PeriodSelection {
            start_month: month("2024-01"),
            end_month: month("2024-01"),
        };
        assert!(period.validate().is_ok());
        assert_eq!(period.months(), vec![month("2024-01")]);
    }
}

#[cfg(test)]
mod aggregation_tests {
    use super::*;

    #[test]
    fn test_missing_months_are_zero_not_errors() {
        let p = participant(
            "Alice",
            None,
            None,
            json!({"2024-02": {"volume_partage": 120.0}}),
            json!(null),
        );
        let months = MonthKey::range(month("2024-01"), month("2024-03"));
        let totals = aggregate_volumes(&p.monthly_data(), &months);
        assert_eq!(totals.shared_consumption_kwh, 120.0);
        assert_eq!(totals.network_consumption_kwh, 0.0);
    }

    #[test]
    fn test_round_trip_sum_is_range_independent() {
        // Volumes summing to X over a range give X whether the range is one
        // aggregation call or several contiguous ones.
        let mut data = BTreeMap::new();
        for (i, m) in ["2024-01", "2024-02", "2024-03", "2024-04"].iter().enumerate() {
            data.insert(
                month(m),
                MonthlyVolumes {
                    shared_consumption: (i as f64 + 1.0) * 10.0,
                    ..Default::default()
                },
            );
        }

        let whole = aggregate_volumes(&data, &MonthKey::range(month("2024-01"), month("2024-04")));
        assert_eq!(whole.shared_consumption_kwh, 100.0);

        let mut pieces = aggregate_volumes(&data, &[month("2024-01")]);
        pieces.add(&aggregate_volumes(
            &data,
            &MonthKey::range(month("2024-02"), month("2024-04")),
        ));
        assert_eq!(pieces, whole);
    }

    #[test]
    fn test_group_equals_fieldwise_member_sum() {
        let members = vec![
            participant(
                "A",
                Some("coop"),
                None,
                json!({"2024-01": {"volume_partage": 100.0, "injection_partagee": 10.0}}),
                json!(null),
            ),
            participant(
                "B",
                Some("coop"),
                None,
                json!({"2024-01": {"volume_partage": 200.0, "volume_complementaire": 50.0}}),
                json!(null),
            ),
            participant("C", Some("coop"), None, json!({}), json!(null)),
        ];

        let months = [month("2024-01")];
        let (group_totals, contributions) = aggregate_group(&members, &months);

        let mut fieldwise = community_energy_api::aggregation::AggregatedVolumes::default();
        for member in &members {
            fieldwise.add(&aggregate_volumes(&member.monthly_data(), &months));
        }

        assert_eq!(group_totals, fieldwise);
        assert_eq!(contributions.len(), 3);
        assert_eq!(group_totals.shared_consumption_kwh, 300.0);
        assert_eq!(group_totals.network_consumption_kwh, 50.0);
        assert_eq!(group_totals.shared_injection_kwh, 10.0);
    }

    #[test]
    fn test_network_costs_sum_matching_months_only() {
        let p = participant(
            "Alice",
            None,
            None,
            json!(null),
            json!({
                "months": {
                    "2024-01": {"cout_reseau": 10.0, "transport": 5.0, "total": 15.0},
                    "2024-05": {"cout_reseau": 99.0, "total": 99.0}
                }
            }),
        );
        let months = MonthKey::range(month("2024-01"), month("2024-03"));
        let totals = aggregate_network_costs(&p.billing_data().months, &months);
        assert_eq!(totals.total_htva, 15.0);
        assert_eq!(totals.network_usage, 10.0);
        assert_eq!(totals.transport, 5.0);
    }
}

#[cfg(test)]
mod vat_tests {
    use super::*;

    #[test]
    fn test_company_number_selects_21_percent() {
        assert_eq!(vat_rate(true), 0.21);
        assert_eq!(vat_rate(false), 0.06);

        let with_company = participant("SA Toit Solaire", None, Some("BE0123456789"), json!(null), json!(null));
        let without = participant("Alice", None, None, json!(null), json!(null));
        assert!(with_company.has_company_number());
        assert!(!without.has_company_number());
    }

    #[test]
    fn test_network_vat_is_21_percent_for_everyone() {
        for company in [true, false] {
            let inputs = InvoiceInputs {
                volumes: Default::default(),
                network_costs: community_energy_api::aggregation::AggregatedNetworkCosts {
                    total_htva: 100.0,
                    ..Default::default()
                },
                shared_rate_eur_mwh: 100.0,
                purchase_rate_eur_mwh: None,
                has_company_number: company,
                apply_membership_fee: false,
            };
            let totals = compute_invoice(&inputs);
            assert_eq!(totals.network_cost_tvac, 121.0);
        }
    }
}

#[cfg(test)]
mod invoice_scenario_tests {
    use super::*;

    /// The full worked scenario: 1 MWh shared at 100 €/MWh, no company
    /// number, 50 € network HTVA, 0.3 MWh injected at the 70 €/MWh default.
    #[test]
    fn test_reference_invoice_scenario() {
        let p = participant(
            "Alice",
            None,
            None,
            json!({"2024-01": {
                "volume_partage": 1000.0,
                "volume_complementaire": 500.0,
                "injection_partagee": 200.0,
                "injection_complementaire": 100.0
            }}),
            json!({"months": {"2024-01": {"cout_reseau": 50.0, "total": 50.0}}}),
        );

        let months = [month("2024-01")];
        let volumes = aggregate_volumes(&p.monthly_data(), &months);
        let network = aggregate_network_costs(&p.billing_data().months, &months);
        let inputs = InvoiceInputs::for_participant(&p, volumes, network, true);
        let totals = compute_invoice(&inputs);

        assert_eq!(totals.energy_shared_cost_htva, 100.00);
        assert_eq!(totals.energy_shared_cost_tvac, 106.00);
        assert_eq!(totals.network_cost_tvac, 60.50);
        assert_eq!(totals.membership_fee_tvac, 60.50);
        assert_eq!(totals.injection_revenue, 21.00);
        assert_eq!(totals.total_cost_tvac, 227.00);
        assert_eq!(totals.net_amount, 206.00);
    }

    #[test]
    fn test_configured_purchase_rate_overrides_default() {
        let mut p = participant("Bob", None, None, json!({"2024-01": {"injection_partagee": 1000.0}}), json!(null));
        p.purchase_rate_eur_mwh = Some(85.0);

        let months = [month("2024-01")];
        let volumes = aggregate_volumes(&p.monthly_data(), &months);
        let inputs = InvoiceInputs::for_participant(&p, volumes, Default::default(), false);
        let totals = compute_invoice(&inputs);
        assert_eq!(totals.injection_revenue, 85.0);
        assert_ne!(totals.injection_revenue, DEFAULT_PURCHASE_RATE_EUR_MWH);
    }

    #[test]
    fn test_fee_policy_every_invoice_vs_once_per_year() {
        let empty = BillingData::default();
        assert!(MembershipFeePolicy::EveryInvoice.fee_applies(&empty, month("2024-01")));
        assert!(MembershipFeePolicy::OncePerYear.fee_applies(&empty, month("2024-01")));

        // Ledger already holds a 2024 invoice.
        let p = participant(
            "Alice",
            None,
            None,
            json!(null),
            json!({"invoices": {"invoice_x_2024-01_2024-01": {
                "id": "invoice_x_2024-01_2024-01",
                "start_month": "2024-01",
                "end_month": "2024-01",
                "energy_shared_cost_htva": 0.0,
                "energy_shared_cost_tvac": 0.0,
                "network_cost_tvac": 0.0,
                "membership_fee_tvac": MEMBERSHIP_FEE_TVAC,
                "injection_revenue": 0.0,
                "total_cost_tvac": 0.0,
                "net_amount": 0.0,
                "generated_at": "2024-02-01T00:00:00Z"
            }}}),
        );
        let ledger = p.billing_data();
        assert_eq!(ledger.invoices.len(), 1);
        assert!(MembershipFeePolicy::EveryInvoice.fee_applies(&ledger, month("2024-06")));
        assert!(!MembershipFeePolicy::OncePerYear.fee_applies(&ledger, month("2024-06")));
        assert!(MembershipFeePolicy::OncePerYear.fee_applies(&ledger, month("2025-01")));
    }
}

#[cfg(test)]
mod corrupt_data_tests {
    use super::*;

    #[test]
    fn test_corrupt_month_degrades_to_zero_without_failing_aggregation() {
        let p = participant(
            "Alice",
            None,
            None,
            json!({
                "2024-01": {"volume_partage": 100.0},
                "2024-02": "not an object",
                "garbage-key": {"volume_partage": 999.0}
            }),
            json!("entirely wrong shape"),
        );

        let months = MonthKey::range(month("2024-01"), month("2024-03"));
        let volumes = aggregate_volumes(&p.monthly_data(), &months);
        assert_eq!(volumes.shared_consumption_kwh, 100.0);

        // billing_data is unusable, so network costs read as empty.
        let network = aggregate_network_costs(&p.billing_data().months, &months);
        assert_eq!(network.total_htva, 0.0);
    }
}
