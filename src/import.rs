//! Bulk import of monthly energy readings from tabular (CSV) files.
//!
//! The first row holds headers in any order; columns are located by
//! case-insensitive, accent-folded substring match. Rows are matched to
//! participants by EAN; rows for the same EAN accumulate within one run, and
//! each touched participant's data for the target month is then replaced
//! wholesale. Unknown EANs are counted and skipped, never fatal.

use crate::models::MonthlyVolumes;
use csv::ReaderBuilder;
use regex::Regex;
use std::collections::BTreeMap;

/// Column indices located in the header row.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub ean: usize,
    pub shared_consumption: Option<usize>,
    pub network_consumption: Option<usize>,
    pub shared_injection: Option<usize>,
    pub network_injection: Option<usize>,
}

/// Parsed import: per-EAN accumulated volumes plus row bookkeeping.
#[derive(Debug, Default)]
pub struct ParsedImport {
    /// Normalized EAN -> accumulated volumes for the target month.
    pub readings: BTreeMap<String, MonthlyVolumes>,
    pub rows_total: usize,
    /// Rows skipped for having no usable EAN cell.
    pub rows_without_ean: usize,
    pub warnings: Vec<String>,
}

/// Lowercase and fold the accented characters that show up in the
/// grid-operator exports, so "Volume Partagé" matches "partage".
pub fn fold_header(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            'à' | 'â' | 'ä' | 'á' | 'À' | 'Â' | 'Ä' | 'Á' => Some('a'),
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => Some('e'),
            'î' | 'ï' | 'Î' | 'Ï' | 'í' => Some('i'),
            'ô' | 'ö' | 'Ô' | 'Ö' | 'ó' => Some('o'),
            'û' | 'ü' | 'ù' | 'Û' | 'Ü' | 'Ù' | 'ú' => Some('u'),
            'ç' | 'Ç' => Some('c'),
            c if c.is_whitespace() => None,
            c => Some(c.to_ascii_lowercase()),
        })
        .collect()
}

/// Strip everything but digits from an EAN cell.
pub fn normalize_ean(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// A metering-point EAN: exactly 18 digits once separators are stripped.
pub fn is_valid_ean(raw: &str) -> bool {
    let ean_regex = Regex::new(r"^[0-9]{18}$").unwrap();
    ean_regex.is_match(&normalize_ean(raw))
}

/// Leading-zero-insensitive comparison of two normalized EANs. The import
/// sources pad inconsistently.
pub fn ean_matches(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    !a_trim.is_empty() && a_trim == b_trim
}

/// Parse a numeric cell: comma or dot decimal separator, clamped to >= 0.
/// Unparseable cells read as zero.
pub fn parse_volume_cell(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().map(|v| v.max(0.0))
}

fn find_column(headers: &[String], needles: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| needles.iter().any(|n| h.contains(n)))
}

/// Locate the expected columns in a folded header row.
///
/// The injection columns are disambiguated first: "injection" + "partag"
/// beats the plain shared-volume match, and the complementary/residual
/// injection column accepts either wording.
pub fn locate_columns(raw_headers: &[String]) -> Result<ColumnMap, String> {
    let headers: Vec<String> = raw_headers.iter().map(|h| fold_header(h)).collect();

    let ean = find_column(&headers, &["ean"])
        .ok_or_else(|| "no EAN column found in header row".to_string())?;

    let shared_injection = headers
        .iter()
        .position(|h| h.contains("injection") && h.contains("partag"));
    let network_injection = headers
        .iter()
        .position(|h| h.contains("injection") && (h.contains("complement") || h.contains("resid")));

    let shared_consumption = headers
        .iter()
        .position(|h| !h.contains("injection") && h.contains("partag"));
    let network_consumption = headers
        .iter()
        .position(|h| !h.contains("injection") && h.contains("complement"));

    if shared_consumption.is_none()
        && network_consumption.is_none()
        && shared_injection.is_none()
        && network_injection.is_none()
    {
        return Err("no volume columns found in header row".to_string());
    }

    Ok(ColumnMap {
        ean,
        shared_consumption,
        network_consumption,
        shared_injection,
        network_injection,
    })
}

/// Parse a whole CSV document and accumulate readings per EAN.
pub fn parse_import(content: &str) -> Result<ParsedImport, String> {
    // Exports in this domain come semicolon-delimited as often as
    // comma-delimited; sniff the header line.
    let delimiter = match content.lines().next() {
        Some(first) if first.matches(';').count() > first.matches(',').count() => b';',
        _ => b',',
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("unreadable header row: {}", e))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let columns = locate_columns(&headers)?;

    let mut parsed = ParsedImport::default();

    for (index, record) in reader.records().enumerate() {
        let line = index + 2; // header is line 1
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                parsed.warnings.push(format!("line {}: {}", line, e));
                continue;
            }
        };
        parsed.rows_total += 1;

        let ean = normalize_ean(record.get(columns.ean).unwrap_or(""));
        if ean.is_empty() {
            parsed.rows_without_ean += 1;
            continue;
        }

        let cell = |column: Option<usize>| -> f64 {
            column
                .and_then(|i| record.get(i))
                .and_then(parse_volume_cell)
                .unwrap_or(0.0)
        };

        let row_volumes = MonthlyVolumes {
            shared_consumption: cell(columns.shared_consumption),
            network_consumption: cell(columns.network_consumption),
            shared_injection: cell(columns.shared_injection),
            network_injection: cell(columns.network_injection),
        };

        // Accumulate, never overwrite, within a single run: a meter can
        // appear on several rows of one file.
        parsed
            .readings
            .entry(ean)
            .or_insert_with(MonthlyVolumes::default)
            .add(&row_volumes);
    }

    Ok(parsed)
}

/// A blank spreadsheet compatible with [`parse_import`].
pub fn import_template() -> String {
    let mut out = String::new();
    out.push_str("EAN;Volume Partagé (kWh);Volume Complémentaire (kWh);");
    out.push_str("Injection Partagée (kWh);Injection Complémentaire (kWh)\n");
    out.push_str("541400000000000000;0;0;0;0\n");
    out
}
