//! The API boundary: ProPublica's organization JSON, the org list file and
//! the HTTP client that fetches one organization at a time.
//!
//! Loosely typed JSON is turned into [`FilingInput`] here, once. Everything
//! downstream works with typed filings and never checks for missing keys.

use crate::error::{FilingError, Result};
use log::debug;
use rust_decimal::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::io;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://projects.propublica.org/nonprofits/api/v2";
const USER_AGENT: &str = concat!("filing-merge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
pub struct OrgResponse {
    organization: RawOrganization,
    filings_with_data: Vec<RawFiling>,
    filings_without_data: Vec<RawFiling>,
}

#[derive(Debug, Deserialize)]
struct RawOrganization {
    #[serde(default)]
    id: Value,
    name: String,
}

/// One entry of either filing list, exactly as the API sends it.
#[derive(Debug, Deserialize)]
pub struct RawFiling {
    tax_prd_yr: i32,
    #[serde(default)]
    formtype: Option<Value>,
    #[serde(default)]
    formtype_str: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    totrevenue: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    totfuncexpns: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    totassetsend: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    totliabend: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub org_id: String,
    pub official_name: String,
}

/// A filing the API has structured figures for.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoFiling {
    pub tax_year: i32,
    pub form_type: Option<String>,
    pub pdf_url: String,
    pub total_revenue: Decimal,
    pub total_expenses: Decimal,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
}

/// A filing the API only knows by year, form and PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFiling {
    pub tax_year: i32,
    pub form_type: Option<String>,
    pub pdf_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilingInput {
    WithData(AutoFiling),
    WithoutData(PendingFiling),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrgFilings {
    pub organization: Organization,
    pub filings: Vec<FilingInput>,
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RawFiling {
    fn form_type(&self) -> Option<String> {
        self.formtype_str
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.formtype.as_ref().and_then(scalar_text))
    }

    fn pdf_url(&self) -> String {
        self.pdf_url.as_deref().unwrap_or_default().trim().to_string()
    }
}

impl AutoFiling {
    /// Requires all four source figures to be present and integral, and
    /// both net figures to fit in a `Decimal`.
    pub fn try_from_raw(org_id: &str, raw: &RawFiling) -> Result<Self> {
        let figure = |name: &str, value: Option<Decimal>| -> Result<Decimal> {
            let value = value.ok_or_else(|| {
                FilingError::malformed(
                    org_id,
                    format!("{} filing is missing {}", raw.tax_prd_yr, name),
                )
            })?;
            if !value.fract().is_zero() {
                return Err(FilingError::malformed(
                    org_id,
                    format!("{} filing has non-integer {}: {}", raw.tax_prd_yr, name, value),
                ));
            }
            Ok(value.normalize())
        };

        let filing = AutoFiling {
            tax_year: raw.tax_prd_yr,
            form_type: raw.form_type(),
            pdf_url: raw.pdf_url(),
            total_revenue: figure("totrevenue", raw.totrevenue)?,
            total_expenses: figure("totfuncexpns", raw.totfuncexpns)?,
            total_assets: figure("totassetsend", raw.totassetsend)?,
            total_liabilities: figure("totliabend", raw.totliabend)?,
        };
        let nets = [
            ("net income", filing.total_revenue.checked_sub(filing.total_expenses)),
            ("net assets", filing.total_assets.checked_sub(filing.total_liabilities)),
        ];
        for (name, net) in nets {
            if net.is_none() {
                return Err(FilingError::malformed(
                    org_id,
                    format!("{} filing {} is out of range", raw.tax_prd_yr, name),
                ));
            }
        }
        Ok(filing)
    }
}

impl From<&RawFiling> for PendingFiling {
    fn from(raw: &RawFiling) -> Self {
        PendingFiling {
            tax_year: raw.tax_prd_yr,
            form_type: raw.form_type(),
            pdf_url: raw.pdf_url(),
        }
    }
}

impl OrgFilings {
    pub fn from_response(requested_id: &str, response: OrgResponse) -> Result<Self> {
        let org_id = scalar_text(&response.organization.id)
            .ok_or_else(|| FilingError::malformed(requested_id, "organization.id is missing"))?;

        let mut filings = Vec::with_capacity(
            response.filings_with_data.len() + response.filings_without_data.len(),
        );
        for raw in &response.filings_with_data {
            filings.push(FilingInput::WithData(AutoFiling::try_from_raw(
                requested_id,
                raw,
            )?));
        }
        filings.extend(
            response
                .filings_without_data
                .iter()
                .map(|raw| FilingInput::WithoutData(raw.into())),
        );

        Ok(OrgFilings {
            organization: Organization {
                org_id,
                official_name: response.organization.name,
            },
            filings,
        })
    }
}

pub fn parse_org_json(requested_id: &str, body: &str) -> Result<OrgFilings> {
    let response: OrgResponse = serde_json::from_str(body)
        .map_err(|e| FilingError::malformed(requested_id, e.to_string()))?;
    OrgFilings::from_response(requested_id, response)
}

/// Anything that can hand back the raw JSON body for one organization.
pub trait FilingSource {
    fn fetch(&self, org_id: &str) -> Result<String>;
}

pub struct ProPublicaClient {
    http: reqwest::blocking::Client,
    api_base: String,
}

impl ProPublicaClient {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FilingError::HttpClient)?;
        Ok(ProPublicaClient {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, org_id: &str) -> String {
        format!("{}/organizations/{}.json", self.api_base, org_id)
    }
}

impl FilingSource for ProPublicaClient {
    fn fetch(&self, org_id: &str) -> Result<String> {
        let url = self.url_for(org_id);
        debug!("GET {}", url);
        let fetch_err = |reason: String| FilingError::Fetch {
            org_id: org_id.to_string(),
            reason,
        };
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {}", status)));
        }
        response.text().map_err(|e| fetch_err(e.to_string()))
    }
}

/// Organization IDs from the first column, header row skipped.
pub fn read_org_ids(path: &Path) -> Result<Vec<String>> {
    let label = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| FilingError::unreadable(&label, e))?;
    read_org_ids_from(file, &label)
}

pub fn read_org_ids_from<R: io::Read>(source: R, label: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);
    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| FilingError::unreadable(label, e))?;
        match record.get(0).map(str::trim) {
            Some(id) if !id.is_empty() => ids.push(id.to_string()),
            _ => debug!("{}: skipping row without an organization id", label),
        }
    }
    Ok(ids)
}

#[cfg(test)]
use rust_decimal_macros::dec;

#[cfg(test)]
const SAMPLE: &str = r#"{
    "organization": {"id": 142007220, "name": "Example Rowing Club"},
    "filings_with_data": [
        {"tax_prd_yr": 2020, "formtype": 0, "pdf_url": "https://x/2020.pdf",
         "totrevenue": 100, "totfuncexpns": 60, "totassetsend": 500, "totliabend": 200}
    ],
    "filings_without_data": [
        {"tax_prd_yr": 2012, "formtype": 2, "formtype_str": "990PF", "pdf_url": null}
    ]
}"#;

#[test]
fn parses_both_filing_groups() {
    let org = parse_org_json("142007220", SAMPLE).unwrap();
    assert_eq!(org.organization.org_id, "142007220");
    assert_eq!(org.organization.official_name, "Example Rowing Club");
    assert_eq!(org.filings.len(), 2);

    match &org.filings[0] {
        FilingInput::WithData(auto) => {
            assert_eq!(auto.tax_year, 2020);
            assert_eq!(auto.form_type.as_deref(), Some("0"));
            assert_eq!(auto.total_revenue, dec!(100));
            assert_eq!(auto.total_liabilities, dec!(200));
        }
        other => panic!("expected filing with data, got {:?}", other),
    }
    match &org.filings[1] {
        FilingInput::WithoutData(pending) => {
            assert_eq!(pending.form_type.as_deref(), Some("990PF"));
            assert_eq!(pending.pdf_url, "");
        }
        other => panic!("expected filing without data, got {:?}", other),
    }
}

#[test]
fn missing_expenses_is_malformed() {
    let body = SAMPLE.replace(r#""totfuncexpns": 60, "#, "");
    let err = parse_org_json("142007220", &body).unwrap_err();
    match err {
        FilingError::MalformedFiling { org_id, detail } => {
            assert_eq!(org_id, "142007220");
            assert!(detail.contains("totfuncexpns"), "{}", detail);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn fractional_figure_is_malformed() {
    let body = SAMPLE.replace(r#""totrevenue": 100"#, r#""totrevenue": 100.5"#);
    assert!(matches!(
        parse_org_json("1", &body),
        Err(FilingError::MalformedFiling { .. })
    ));
}

#[test]
fn overflowing_net_income_is_malformed() {
    let body = SAMPLE
        .replace(r#""totrevenue": 100"#, r#""totrevenue": 79228162514264337593543950335"#)
        .replace(r#""totfuncexpns": 60"#, r#""totfuncexpns": -79228162514264337593543950335"#);
    match parse_org_json("1", &body) {
        Err(FilingError::MalformedFiling { detail, .. }) => {
            assert!(detail.contains("net income"), "{}", detail)
        }
        other => panic!("expected malformed filing, got {:?}", other),
    }
}

#[test]
fn missing_filing_list_is_malformed() {
    let body = r#"{"organization": {"id": 1, "name": "X"}, "filings_with_data": []}"#;
    assert!(matches!(
        parse_org_json("1", body),
        Err(FilingError::MalformedFiling { .. })
    ));
}

#[test]
fn org_list_skips_header_and_blanks() {
    let input = "Propublica Number,Club\n 111 ,A\n\n,empty\n222,B\n";
    let ids = read_org_ids_from(input.as_bytes(), "orgs").unwrap();
    assert_eq!(ids, vec!["111", "222"]);
}

#[test]
fn client_builds_organization_url() {
    let client = ProPublicaClient::new("http://localhost:9/api/", Duration::from_secs(1)).unwrap();
    assert_eq!(client.url_for("42"), "http://localhost:9/api/organizations/42.json");
}
