use crate::error::Result;
use crate::manual::ManualTable;
use crate::record::{normalize_auto, normalize_manual, unparsed_amounts, FilingRecord, Source};
use crate::source::{parse_org_json, FilingInput, OrgFilings, Organization};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Where a filing lives in a [`FilingSet`]. The PDF URL is the natural key;
/// filings without one (or a second Auto filing pointing at the same PDF)
/// get a synthetic key so nothing is ever overwritten silently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilingKey {
    Pdf(String),
    Synthetic {
        org_id: String,
        tax_year: i32,
        ordinal: u32,
    },
}

#[derive(Debug)]
pub struct FilingSet {
    org_id: String,
    records: HashMap<FilingKey, FilingRecord>,
}

impl FilingSet {
    pub fn new(org_id: &str) -> Self {
        FilingSet {
            org_id: org_id.to_string(),
            records: HashMap::new(),
        }
    }

    fn synthetic_key(&self, tax_year: i32) -> FilingKey {
        let taken = self
            .records
            .keys()
            .filter(|key| matches!(key, FilingKey::Synthetic { tax_year: y, .. } if *y == tax_year))
            .count();
        FilingKey::Synthetic {
            org_id: self.org_id.clone(),
            tax_year,
            ordinal: taken as u32,
        }
    }

    /// Source of the record currently held under this PDF URL.
    pub fn holder(&self, pdf_url: &str) -> Option<Source> {
        self.records
            .get(&FilingKey::Pdf(pdf_url.to_string()))
            .map(|record| record.source)
    }

    /// Auto records always land. They displace a Manual record at the same
    /// PDF URL and fall back to a synthetic key next to another Auto one.
    pub fn insert_auto(&mut self, record: FilingRecord) -> FilingKey {
        let key = match self.holder(&record.pdf_url) {
            _ if record.pdf_url.is_empty() => self.synthetic_key(record.tax_year),
            Some(Source::Auto) => {
                warn!(
                    "organization {}: {} listed twice with API data, keeping both",
                    self.org_id, record.pdf_url
                );
                self.synthetic_key(record.tax_year)
            }
            Some(Source::Manual) | None => FilingKey::Pdf(record.pdf_url.clone()),
        };
        self.records.insert(key.clone(), record);
        key
    }

    /// Manual records never displace anything; returns `None` when the PDF
    /// URL is already taken.
    pub fn insert_manual(&mut self, record: FilingRecord) -> Option<FilingKey> {
        let key = if record.pdf_url.is_empty() {
            self.synthetic_key(record.tax_year)
        } else if self.holder(&record.pdf_url).is_some() {
            return None;
        } else {
            FilingKey::Pdf(record.pdf_url.clone())
        };
        self.records.insert(key.clone(), record);
        Some(key)
    }

    pub fn get(&self, key: &FilingKey) -> Option<&FilingRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FilingKey, &FilingRecord)> {
        self.records.iter()
    }
}

/// A filing with neither API figures nor a manual row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteFiling {
    pub org_id: String,
    pub official_name: String,
    pub tax_year: i32,
    pub pdf_url: String,
}

impl fmt::Display for IncompleteFiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.official_name, self.tax_year)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    skip_form_types: HashSet<String>,
}

impl ReconcileOptions {
    pub fn with_skipped_form_types<I, S>(form_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ReconcileOptions {
            skip_form_types: form_types
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn skips(&self, form_type: Option<&str>) -> bool {
        form_type.is_some_and(|t| self.skip_form_types.contains(t.trim()))
    }
}

#[derive(Debug)]
pub struct Reconciled {
    pub organization: Organization,
    pub filings: FilingSet,
    pub incomplete: Vec<IncompleteFiling>,
}

/// Merges one organization's filings with the manual table. Auto filings go
/// in first so no Manual row can ever shadow them. Matched manual rows are
/// taken out of `manual`, including rows made redundant by API data.
pub fn reconcile(
    org: &OrgFilings,
    manual: &mut ManualTable,
    options: &ReconcileOptions,
) -> Reconciled {
    let organization = &org.organization;
    let mut filings = FilingSet::new(&organization.org_id);
    let mut incomplete = Vec::new();

    let auto = org.filings.iter().filter_map(|f| match f {
        FilingInput::WithData(auto) => Some(auto),
        FilingInput::WithoutData(_) => None,
    });
    for filing in auto {
        if options.skips(filing.form_type.as_deref()) {
            debug!("{}: skipping {} form {:?}", organization.org_id, filing.tax_year, filing.form_type);
            continue;
        }
        filings.insert_auto(normalize_auto(filing));
    }

    let pending = org.filings.iter().filter_map(|f| match f {
        FilingInput::WithoutData(pending) => Some(pending),
        FilingInput::WithData(_) => None,
    });
    for filing in pending {
        if options.skips(filing.form_type.as_deref()) {
            debug!("{}: skipping {} form {:?}", organization.org_id, filing.tax_year, filing.form_type);
            continue;
        }

        let url = filing.pdf_url.as_str();
        match filings.holder(url) {
            Some(Source::Auto) => {
                if manual.take(url).is_some() {
                    debug!("{}: manual entry superseded by API data", url);
                }
                continue;
            }
            Some(Source::Manual) => {
                debug!("{}: {} listed twice without data", organization.org_id, url);
                continue;
            }
            None => {}
        }

        let row = if url.is_empty() { None } else { manual.take(url) };
        if let Some(row) = &row {
            for (column, cell) in unparsed_amounts(row) {
                warn!("{}: '{}' in {} is not a number, exported as NA", url, cell, column);
            }
        }
        if row.is_none() {
            warn!(
                "Missing data or extra pdf for {} {}",
                organization.official_name, filing.tax_year
            );
            incomplete.push(IncompleteFiling {
                org_id: organization.org_id.clone(),
                official_name: organization.official_name.clone(),
                tax_year: filing.tax_year,
                pdf_url: filing.pdf_url.clone(),
            });
        }
        filings.insert_manual(normalize_manual(filing, row.as_ref()));
    }

    Reconciled {
        organization: organization.clone(),
        filings,
        incomplete,
    }
}

/// Parses the organization's JSON in full before touching `manual`, so a
/// malformed organization consumes nothing.
pub fn reconcile_json(
    requested_id: &str,
    body: &str,
    manual: &mut ManualTable,
    options: &ReconcileOptions,
) -> Result<Reconciled> {
    let org = parse_org_json(requested_id, body)?;
    Ok(reconcile(&org, manual, options))
}

#[cfg(test)]
use crate::{
    manual::ManualRow,
    record::Amount,
    source::{AutoFiling, PendingFiling},
};
#[cfg(test)]
use rust_decimal_macros::dec;

#[cfg(test)]
fn org(filings: Vec<FilingInput>) -> OrgFilings {
    OrgFilings {
        organization: Organization {
            org_id: "7".to_string(),
            official_name: "Lakeside Boat Club".to_string(),
        },
        filings,
    }
}

#[cfg(test)]
fn with_data(year: i32, url: &str, form: &str) -> FilingInput {
    FilingInput::WithData(AutoFiling {
        tax_year: year,
        form_type: Some(form.to_string()),
        pdf_url: url.to_string(),
        total_revenue: dec!(100),
        total_expenses: dec!(60),
        total_assets: dec!(500),
        total_liabilities: dec!(200),
    })
}

#[cfg(test)]
fn without_data(year: i32, url: &str, form: &str) -> FilingInput {
    FilingInput::WithoutData(PendingFiling {
        tax_year: year,
        form_type: Some(form.to_string()),
        pdf_url: url.to_string(),
    })
}

#[test]
fn auto_wins_and_still_consumes_manual_row() {
    let mut manual = ManualTable::new();
    manual.insert("a.pdf", ManualRow::from_pairs([("Total Revenue", "1")]));

    let result = reconcile(
        &org(vec![with_data(2020, "a.pdf", "990"), without_data(2020, "a.pdf", "990")]),
        &mut manual,
        &ReconcileOptions::default(),
    );

    assert_eq!(result.filings.len(), 1);
    let record = result.filings.get(&FilingKey::Pdf("a.pdf".into())).unwrap();
    assert_eq!(record.source, Source::Auto);
    assert_eq!(record.total_revenue, Amount::Value(dec!(100)));
    assert!(manual.is_empty());
    assert!(result.incomplete.is_empty());
}

#[test]
fn manual_never_displaces_auto_in_set() {
    let mut set = FilingSet::new("7");
    let auto = normalize_auto(&AutoFiling {
        tax_year: 2020,
        form_type: None,
        pdf_url: "a.pdf".into(),
        total_revenue: dec!(1),
        total_expenses: dec!(1),
        total_assets: dec!(1),
        total_liabilities: dec!(1),
    });
    let manual = normalize_manual(
        &PendingFiling {
            tax_year: 2020,
            form_type: None,
            pdf_url: "a.pdf".into(),
        },
        None,
    );

    set.insert_manual(manual.clone());
    assert_eq!(set.insert_auto(auto), FilingKey::Pdf("a.pdf".into()));
    assert_eq!(set.insert_manual(manual), None);
    assert_eq!(set.holder("a.pdf"), Some(Source::Auto));
    assert_eq!(set.len(), 1);
}

#[test]
fn amended_returns_in_one_year_are_all_kept() {
    let mut manual = ManualTable::new();
    let result = reconcile(
        &org(vec![
            with_data(2018, "orig.pdf", "990"),
            with_data(2018, "amended.pdf", "990"),
            with_data(2018, "", "990"),
            with_data(2018, "", "990"),
        ]),
        &mut manual,
        &ReconcileOptions::default(),
    );

    assert_eq!(result.filings.len(), 4);
    for ordinal in 0..2 {
        let key = FilingKey::Synthetic {
            org_id: "7".into(),
            tax_year: 2018,
            ordinal,
        };
        assert!(result.filings.get(&key).is_some(), "{:?}", key);
    }
}

#[test]
fn duplicate_auto_pdf_gets_synthetic_key() {
    let mut set = FilingSet::new("7");
    let FilingInput::WithData(filing) = with_data(2019, "dup.pdf", "990") else {
        unreachable!()
    };
    assert_eq!(set.insert_auto(normalize_auto(&filing)), FilingKey::Pdf("dup.pdf".into()));
    assert_eq!(
        set.insert_auto(normalize_auto(&filing)),
        FilingKey::Synthetic {
            org_id: "7".into(),
            tax_year: 2019,
            ordinal: 0
        }
    );
}

#[test]
fn miss_is_reported_incomplete() {
    let mut manual = ManualTable::new();
    manual.insert("other.pdf", ManualRow::default());

    let result = reconcile(
        &org(vec![without_data(2019, "x.pdf", "990"), without_data(2011, "", "990EZ")]),
        &mut manual,
        &ReconcileOptions::default(),
    );

    assert_eq!(result.filings.len(), 2);
    let years: Vec<_> = result.incomplete.iter().map(|i| i.tax_year).collect();
    assert_eq!(years, vec![2019, 2011]);
    assert_eq!(result.incomplete[0].to_string(), "Lakeside Boat Club 2019");
    assert!(manual.contains("other.pdf"));
}

#[test]
fn repeated_pending_pdf_is_not_double_counted() {
    let mut manual = ManualTable::new();
    manual.insert("x.pdf", ManualRow::from_pairs([("Total Revenue", "50")]));

    let result = reconcile(
        &org(vec![without_data(2019, "x.pdf", "990"), without_data(2019, "x.pdf", "990")]),
        &mut manual,
        &ReconcileOptions::default(),
    );

    assert_eq!(result.filings.len(), 1);
    assert!(result.incomplete.is_empty());
}

#[test]
fn skipped_form_types_vanish() {
    let mut manual = ManualTable::new();
    manual.insert("t.pdf", ManualRow::default());
    let options = ReconcileOptions::with_skipped_form_types(["990T", " "]);

    let result = reconcile(
        &org(vec![
            without_data(2019, "t.pdf", "990T"),
            with_data(2020, "t2.pdf", "990T"),
            without_data(2019, "y.pdf", "990"),
        ]),
        &mut manual,
        &options,
    );

    assert_eq!(result.filings.len(), 1);
    assert_eq!(result.incomplete.len(), 1);
    assert_eq!(result.incomplete[0].pdf_url, "y.pdf");
    // skipped filings do not consume
    assert!(manual.contains("t.pdf"));
}

#[test]
fn malformed_json_consumes_nothing() {
    let mut manual = ManualTable::new();
    manual.insert("x.pdf", ManualRow::default());
    let body = r#"{
        "organization": {"id": 7, "name": "Lakeside Boat Club"},
        "filings_with_data": [{"tax_prd_yr": 2020, "pdf_url": "a.pdf", "totrevenue": 1}],
        "filings_without_data": [{"tax_prd_yr": 2019, "pdf_url": "x.pdf"}]
    }"#;

    assert!(reconcile_json("7", body, &mut manual, &ReconcileOptions::default()).is_err());
    assert!(manual.contains("x.pdf"));
}
