use crate::error::{FilingError, Result};
use log::warn;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::Path;

const PDF_URL: &str = "PDF URL";
const DATA_SOURCE: &str = "Data Source";

/// One hand-transcribed row, column name to cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualRow {
    cells: HashMap<String, String>,
}

impl ManualRow {
    pub const FORM_TYPE: &'static str = "Form Type";
    pub const TOTAL_REVENUE: &'static str = "Total Revenue";
    pub const TOTAL_FUNCTIONAL_EXPENSES: &'static str = "Total Functional Expenses";
    pub const TOTAL_EXPENSES: &'static str = "Total Expenses";
    pub const NET_INCOME: &'static str = "Net Income";
    pub const TOTAL_ASSETS: &'static str = "Total Assets";
    pub const TOTAL_LIABILITIES: &'static str = "Total Liabilities";
    pub const NET_ASSETS: &'static str = "Net Assets";

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        ManualRow {
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// A blank cell counts as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Manual filings keyed by PDF URL. Loaded once per run; after that the
/// only mutation is [`ManualTable::take`], so whatever is left at the end
/// was never matched.
#[derive(Debug, Default)]
pub struct ManualTable {
    rows: HashMap<String, ManualRow>,
}

impl ManualTable {
    pub fn new() -> Self {
        ManualTable::default()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let label = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|e| FilingError::unreadable(&label, e))?;
        ManualTable::from_reader(file, &label)
    }

    /// Any load error fails the whole table; a half-loaded table would make
    /// later misses and stale reports wrong.
    pub fn from_reader<R: io::Read>(source: R, label: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(source);
        let headers = reader
            .headers()
            .map_err(|e| FilingError::unreadable(label, e))?
            .clone();
        let url_col = headers
            .iter()
            .position(|h| h == PDF_URL)
            .ok_or_else(|| FilingError::unreadable(label, format!("no '{}' column", PDF_URL)))?;
        let source_col = headers.iter().position(|h| h == DATA_SOURCE);

        let mut table = ManualTable::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| FilingError::unreadable(label, e))?;
            // a previous export mixes Auto rows in; those are re-fetched
            if let Some(col) = source_col {
                if record.get(col).map(str::trim) != Some("Manual") {
                    continue;
                }
            }
            let url = record.get(url_col).unwrap_or_default().trim();
            if url.is_empty() {
                warn!("{}: row {} has no PDF URL, ignored", label, line + 2);
                continue;
            }
            let row = ManualRow {
                cells: headers
                    .iter()
                    .zip(record.iter())
                    .enumerate()
                    .filter(|(i, _)| *i != url_col && Some(*i) != source_col)
                    .map(|(_, (h, v))| (h.to_string(), v.to_string()))
                    .collect(),
            };
            if table.insert(url, row).is_some() {
                warn!("{}: duplicate entry for {}, keeping the later row", label, url);
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, pdf_url: &str, row: ManualRow) -> Option<ManualRow> {
        self.rows.insert(pdf_url.to_string(), row)
    }

    /// Consumes the row for `pdf_url`. A row can be taken at most once.
    pub fn take(&mut self, pdf_url: &str) -> Option<ManualRow> {
        self.rows.remove(pdf_url)
    }

    pub fn contains(&self, pdf_url: &str) -> bool {
        self.rows.contains_key(pdf_url)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// PDF URLs nothing consumed. Only meaningful once every organization
    /// has been reconciled.
    pub fn remaining_manual_entries(&self) -> BTreeSet<String> {
        self.rows.keys().cloned().collect()
    }
}

#[test]
fn take_consumes_once() {
    let mut table = ManualTable::new();
    table.insert("x.pdf", ManualRow::from_pairs([("Total Revenue", "50")]));

    let row = table.take("x.pdf").unwrap();
    assert_eq!(row.get(ManualRow::TOTAL_REVENUE), Some("50"));
    assert!(table.take("x.pdf").is_none());
    assert!(table.is_empty());
}

#[test]
fn loads_only_manual_rows_from_previous_export() {
    let csv = "\
Propublica Number,Club Name,Tax Year,Form Type,Data Source,PDF URL,Total Revenue
1,A,2019,990,Manual,x.pdf,50
1,A,2020,990,Auto,a.pdf,100
1,A,2018,990,Manual,,70
";
    let table = ManualTable::from_reader(csv.as_bytes(), "existing").unwrap();
    assert_eq!(table.len(), 1);
    assert!(table.contains("x.pdf"));
    assert!(!table.contains("a.pdf"));
}

#[test]
fn loads_every_row_without_source_column() {
    let csv = "PDF URL,Total Revenue\nx.pdf,50\ny.pdf,\n";
    let mut table = ManualTable::from_reader(csv.as_bytes(), "manual").unwrap();
    assert_eq!(table.len(), 2);
    let row = table.take("y.pdf").unwrap();
    assert_eq!(row.get(ManualRow::TOTAL_REVENUE), None);
    assert_eq!(row.get(PDF_URL), None);
}

#[test]
fn missing_url_column_is_unreadable() {
    let csv = "Link,Total Revenue\nx.pdf,50\n";
    assert!(matches!(
        ManualTable::from_reader(csv.as_bytes(), "manual"),
        Err(FilingError::UnreadableSourceFile { .. })
    ));
}

#[test]
fn ragged_rows_are_unreadable() {
    let csv = "PDF URL,Total Revenue\nx.pdf,50,extra\n";
    assert!(ManualTable::from_reader(csv.as_bytes(), "manual").is_err());
}

#[test]
fn remaining_entries_are_sorted() {
    let mut table = ManualTable::new();
    for url in ["z.pdf", "y.pdf", "a.pdf"] {
        table.insert(url, ManualRow::default());
    }
    table.take("y.pdf");
    let stale: Vec<_> = table.remaining_manual_entries().into_iter().collect();
    assert_eq!(stale, vec!["a.pdf", "z.pdf"]);
}
