//! Invoice document: fixed-layout rendering of a computed billing statement.
//!
//! The service renders the document as self-contained HTML plus metadata
//! (filename, payment reference); printing and PDF rasterization are client
//! concerns.

use crate::aggregation::{AggregatedNetworkCosts, AggregatedVolumes, MemberContribution};
use crate::billing::InvoiceTotals;
use crate::models::PeriodSelection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Identity block at the top of the invoice: the participant, or the group
/// representative when invoicing a group.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceIdentity {
    pub participant_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub ean: String,
    pub company_number: Option<String>,
    /// Group label when this invoice covers a whole group.
    pub group_name: Option<String>,
}

/// Everything needed to render one invoice.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDocument {
    pub identity: InvoiceIdentity,
    pub period: String,
    pub start_month: String,
    pub end_month: String,
    pub volumes: AggregatedVolumes,
    pub network_costs: AggregatedNetworkCosts,
    pub totals: InvoiceTotals,
    /// Per-member detail, present on group invoices.
    pub members: Vec<MemberContribution>,
    pub payment_reference: String,
    pub filename: String,
    pub generated_at: DateTime<Utc>,
}

/// Strip everything but alphanumerics from a name for use in filenames.
pub fn clean_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// `Facture_{cleanName}_{period}.pdf`
pub fn invoice_filename(name: &str, period: &PeriodSelection) -> String {
    format!("Facture_{}_{}.pdf", clean_name(name), period.label())
}

/// Belgian structured payment communication, `+++xxx/xxxx/xxxxx+++`.
///
/// Payload: last 6 digits of the EAN followed by YYMM of the first billed
/// month; the final two digits are the payload mod 97, with 0 mapped to 97.
pub fn payment_reference(ean: &str, period: &PeriodSelection) -> String {
    let digits: String = ean.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = if digits.len() >= 6 {
        digits[digits.len() - 6..].to_string()
    } else {
        format!("{:0>6}", digits)
    };

    let payload = format!("{}{}", tail, period.start_month.yymm());
    let payload_num: u64 = payload.parse().unwrap_or(0);
    let mut check = payload_num % 97;
    if check == 0 {
        check = 97;
    }

    let full = format!("{}{:02}", payload, check);
    format!("+++{}/{}/{}+++", &full[0..3], &full[3..7], &full[7..12])
}

fn fmt_eur(value: f64) -> String {
    format!("{:.2} €", value)
}

fn fmt_mwh(kwh: f64) -> String {
    format!("{:.3} MWh", kwh / 1000.0)
}

impl InvoiceDocument {
    /// Render the fixed A4 layout consumed by the print/rasterize clients.
    pub fn to_html(&self) -> String {
        let mut html = String::with_capacity(8 * 1024);

        html.push_str("<!DOCTYPE html>\n<html lang=\"fr\">\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<style>\n");
        html.push_str("body { font-family: sans-serif; margin: 2em; color: #222; }\n");
        html.push_str("table { border-collapse: collapse; width: 100%; margin: 1em 0; }\n");
        html.push_str("th, td { border: 1px solid #999; padding: 4px 8px; text-align: right; }\n");
        html.push_str("th:first-child, td:first-child { text-align: left; }\n");
        html.push_str(".total td { font-weight: bold; }\n");
        html.push_str("</style>\n</head>\n<body>\n");

        // Identity block
        html.push_str("<h1>Facture - Communauté d'énergie</h1>\n");
        html.push_str(&format!("<p><strong>{}</strong><br>\n", self.identity.name));
        if let Some(address) = &self.identity.address {
            html.push_str(&format!("{}<br>\n", address));
        }
        html.push_str(&format!("EAN : {}<br>\n", self.identity.ean));
        if let Some(company) = &self.identity.company_number {
            html.push_str(&format!("N° d'entreprise : {}<br>\n", company));
        }
        if let Some(group) = &self.identity.group_name {
            html.push_str(&format!("Groupe : {}<br>\n", group));
        }
        html.push_str(&format!("Période : {}</p>\n", self.period));

        // Energy detail
        html.push_str("<h2>Détail énergie</h2>\n<table>\n");
        html.push_str("<tr><th>Poste</th><th>Volume</th></tr>\n");
        html.push_str(&format!(
            "<tr><td>Consommation partagée</td><td>{}</td></tr>\n",
            fmt_mwh(self.volumes.shared_consumption_kwh)
        ));
        html.push_str(&format!(
            "<tr><td>Consommation réseau</td><td>{}</td></tr>\n",
            fmt_mwh(self.volumes.network_consumption_kwh)
        ));
        html.push_str(&format!(
            "<tr><td>Injection partagée</td><td>{}</td></tr>\n",
            fmt_mwh(self.volumes.shared_injection_kwh)
        ));
        html.push_str(&format!(
            "<tr><td>Injection réseau</td><td>{}</td></tr>\n",
            fmt_mwh(self.volumes.network_injection_kwh)
        ));
        html.push_str("</table>\n");

        // Group detail, when present
        if !self.members.is_empty() {
            html.push_str("<h2>Détail par membre</h2>\n<table>\n");
            html.push_str("<tr><th>Membre</th><th>EAN</th><th>Partagé</th><th>Réseau</th></tr>\n");
            for member in &self.members {
                html.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    member.name,
                    member.ean,
                    fmt_mwh(member.volumes.shared_consumption_kwh),
                    fmt_mwh(member.volumes.network_consumption_kwh)
                ));
            }
            html.push_str("</table>\n");
        }

        // Network-cost breakdown
        html.push_str("<h2>Coûts de réseau (HTVA)</h2>\n<table>\n");
        let rows = [
            ("Utilisation du réseau", self.network_costs.network_usage),
            ("Surcharges", self.network_costs.surcharges),
            ("Tarif capacitaire", self.network_costs.capacity_tariff),
            ("Tarif comptage", self.network_costs.metering_tariff),
            (
                "Obligations de service public",
                self.network_costs.public_service_obligation,
            ),
            ("Transport", self.network_costs.transport),
            ("Redevance voirie", self.network_costs.road_fee),
        ];
        for (label, value) in rows {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td></tr>\n",
                label,
                fmt_eur(value)
            ));
        }
        html.push_str(&format!(
            "<tr class=\"total\"><td>Total HTVA</td><td>{}</td></tr>\n",
            fmt_eur(self.network_costs.total_htva)
        ));
        html.push_str("</table>\n");

        // Financial summary
        html.push_str("<h2>Récapitulatif</h2>\n<table>\n");
        html.push_str(&format!(
            "<tr><td>Énergie partagée HTVA</td><td>{}</td></tr>\n",
            fmt_eur(self.totals.energy_shared_cost_htva)
        ));
        html.push_str(&format!(
            "<tr><td>Énergie partagée TVAC ({:.0}%)</td><td>{}</td></tr>\n",
            self.totals.vat_rate * 100.0,
            fmt_eur(self.totals.energy_shared_cost_tvac)
        ));
        html.push_str(&format!(
            "<tr><td>Coûts de réseau TVAC (21%)</td><td>{}</td></tr>\n",
            fmt_eur(self.totals.network_cost_tvac)
        ));
        html.push_str(&format!(
            "<tr><td>Cotisation annuelle TVAC</td><td>{}</td></tr>\n",
            fmt_eur(self.totals.membership_fee_tvac)
        ));
        html.push_str(&format!(
            "<tr><td>Revenu injection</td><td>-{}</td></tr>\n",
            fmt_eur(self.totals.injection_revenue)
        ));
        html.push_str(&format!(
            "<tr class=\"total\"><td>Total TVAC</td><td>{}</td></tr>\n",
            fmt_eur(self.totals.total_cost_tvac)
        ));
        html.push_str(&format!(
            "<tr class=\"total\"><td>Montant net dû</td><td>{}</td></tr>\n",
            fmt_eur(self.totals.net_amount)
        ));
        html.push_str("</table>\n");

        // Payment terms
        html.push_str(&format!(
            "<p>Paiement à 30 jours. Communication structurée : <strong>{}</strong></p>\n",
            self.payment_reference
        ));

        html.push_str("</body>\n</html>\n");
        html
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(start: &str, end: &str) -> PeriodSelection {
        PeriodSelection {
            start_month: start.parse().unwrap(),
            end_month: end.parse().unwrap(),
        }
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("Ferme du Pré-Vert"), "FermeduPrVert");
        assert_eq!(clean_name("Dupont & Fils 2000"), "DupontFils2000");
    }

    #[test]
    fn test_invoice_filename() {
        let p = period("2024-01", "2024-03");
        assert_eq!(
            invoice_filename("Ferme du Pré", &p),
            "Facture_FermeduPr_2024-01_2024-03.pdf"
        );
    }

    #[test]
    fn test_payment_reference_shape_and_check_digits() {
        let p = period("2024-03", "2024-03");
        let reference = payment_reference("541448912345678901", &p);
        // +++xxx/xxxx/xxxxx+++
        assert!(reference.starts_with("+++"));
        assert!(reference.ends_with("+++"));
        let digits: String = reference.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(digits.len(), 12);

        let payload: u64 = digits[..10].parse().unwrap();
        let check: u64 = digits[10..].parse().unwrap();
        let expected = match payload % 97 {
            0 => 97,
            r => r,
        };
        assert_eq!(check, expected);
        // Payload: last 6 EAN digits + YYMM.
        assert_eq!(&digits[..10], "6789012403");
    }

    #[test]
    fn test_payment_reference_short_ean_is_padded() {
        let p = period("2024-01", "2024-01");
        let reference = payment_reference("123", &p);
        let digits: String = reference.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(&digits[..10], "0001232401");
    }

    #[test]
    fn test_html_contains_all_sections() {
        let doc = InvoiceDocument {
            identity: InvoiceIdentity {
                participant_id: Uuid::nil(),
                name: "Alice Dupont".to_string(),
                address: Some("Rue Haute 12, 4000 Liège".to_string()),
                email: None,
                ean: "541448912345678901".to_string(),
                company_number: None,
                group_name: None,
            },
            period: "2024-01".to_string(),
            start_month: "2024-01".to_string(),
            end_month: "2024-01".to_string(),
            volumes: AggregatedVolumes {
                shared_consumption_kwh: 1000.0,
                ..Default::default()
            },
            network_costs: AggregatedNetworkCosts {
                total_htva: 50.0,
                ..Default::default()
            },
            totals: InvoiceTotals {
                energy_shared_cost_htva: 100.0,
                energy_shared_cost_tvac: 106.0,
                network_cost_tvac: 60.5,
                membership_fee_tvac: 60.5,
                injection_revenue: 21.0,
                total_cost_tvac: 227.0,
                net_amount: 206.0,
                vat_rate: 0.06,
            },
            members: vec![],
            payment_reference: "+++678/9012/40361+++".to_string(),
            filename: "Facture_AliceDupont_2024-01.pdf".to_string(),
            generated_at: Utc::now(),
        };

        let html = doc.to_html();
        assert!(html.contains("Alice Dupont"));
        assert!(html.contains("Détail énergie"));
        assert!(html.contains("Coûts de réseau"));
        assert!(html.contains("Récapitulatif"));
        assert!(html.contains("206.00 €"));
        assert!(html.contains("Communication structurée"));
        // No member table on an individual invoice.
        assert!(!html.contains("Détail par membre"));
    }
}
