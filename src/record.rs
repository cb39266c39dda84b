use crate::manual::ManualRow;
use crate::source::{AutoFiling, PendingFiling};
use rust_decimal::prelude::*;
use std::fmt;

pub const NOT_AVAILABLE: &str = "NA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    Auto,
    Manual,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Auto => f.write_str("Auto"),
            Source::Manual => f.write_str("Manual"),
        }
    }
}

/// A money figure, or the `NA` sentinel when nobody knows it.
/// `NA` is not zero and must never be treated as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    Value(Decimal),
    NotAvailable,
}

impl Amount {
    /// Reads a hand-transcribed cell. Blank, `NA` and unparseable text
    /// all resolve to `NotAvailable`.
    pub fn from_cell(cell: &str) -> Self {
        Amount::parse_cell(cell).unwrap_or(Amount::NotAvailable)
    }

    /// Like [`Amount::from_cell`], but `None` for text that is neither
    /// blank, `NA`, nor a number.
    pub fn parse_cell(cell: &str) -> Option<Self> {
        let cleaned: String = cell
            .trim()
            .chars()
            .filter(|c| !matches!(c, '$' | ',' | ' '))
            .collect();
        if cleaned.is_empty() || cleaned.eq_ignore_ascii_case(NOT_AVAILABLE) {
            return Some(Amount::NotAvailable);
        }
        Decimal::from_str(&cleaned).ok().map(Amount::Value)
    }

    pub fn value(&self) -> Option<Decimal> {
        match self {
            Amount::Value(v) => Some(*v),
            Amount::NotAvailable => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Value(v) => write!(f, "{}", v),
            Amount::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilingRecord {
    pub source: Source,
    pub tax_year: i32,
    pub pdf_url: String,
    pub form_type: String,
    pub total_revenue: Amount,
    pub total_expenses: Amount,
    pub net_income: Amount,
    pub total_assets: Amount,
    pub total_liabilities: Amount,
    pub net_assets: Amount,
}

fn difference(a: Decimal, b: Decimal) -> Amount {
    a.checked_sub(b)
        .map(Amount::Value)
        .unwrap_or(Amount::NotAvailable)
}

/// Net figures are derived here and only here; upstream never supplies them.
/// `AutoFiling::try_from_raw` rejects figures whose difference overflows.
pub fn normalize_auto(filing: &AutoFiling) -> FilingRecord {
    FilingRecord {
        source: Source::Auto,
        tax_year: filing.tax_year,
        pdf_url: filing.pdf_url.clone(),
        form_type: filing
            .form_type
            .clone()
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        total_revenue: Amount::Value(filing.total_revenue),
        total_expenses: Amount::Value(filing.total_expenses),
        net_income: difference(filing.total_revenue, filing.total_expenses),
        total_assets: Amount::Value(filing.total_assets),
        total_liabilities: Amount::Value(filing.total_liabilities),
        net_assets: difference(filing.total_assets, filing.total_liabilities),
    }
}

pub fn normalize_manual(filing: &PendingFiling, row: Option<&ManualRow>) -> FilingRecord {
    let amount = |columns: &[&str]| {
        row.and_then(|row| columns.iter().find_map(|column| row.get(column)))
            .map(Amount::from_cell)
            .unwrap_or(Amount::NotAvailable)
    };

    // a matched row speaks for the whole filing; the API form type only
    // fills in when nobody transcribed the PDF
    let form_type = match row {
        Some(row) => row.get(ManualRow::FORM_TYPE).map(str::to_string),
        None => filing.form_type.clone(),
    }
    .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    FilingRecord {
        source: Source::Manual,
        tax_year: filing.tax_year,
        pdf_url: filing.pdf_url.clone(),
        form_type,
        total_revenue: amount(&[ManualRow::TOTAL_REVENUE]),
        total_expenses: amount(&[ManualRow::TOTAL_FUNCTIONAL_EXPENSES, ManualRow::TOTAL_EXPENSES]),
        net_income: amount(&[ManualRow::NET_INCOME]),
        total_assets: amount(&[ManualRow::TOTAL_ASSETS]),
        total_liabilities: amount(&[ManualRow::TOTAL_LIABILITIES]),
        net_assets: amount(&[ManualRow::NET_ASSETS]),
    }
}

const AMOUNT_COLUMNS: [&str; 7] = [
    ManualRow::TOTAL_REVENUE,
    ManualRow::TOTAL_FUNCTIONAL_EXPENSES,
    ManualRow::TOTAL_EXPENSES,
    ManualRow::NET_INCOME,
    ManualRow::TOTAL_ASSETS,
    ManualRow::TOTAL_LIABILITIES,
    ManualRow::NET_ASSETS,
];

/// Amount cells holding text that will be exported as `NA`.
pub fn unparsed_amounts(row: &ManualRow) -> Vec<(&'static str, &str)> {
    AMOUNT_COLUMNS
        .iter()
        .filter_map(|column| {
            row.get(column)
                .filter(|cell| Amount::parse_cell(cell).is_none())
                .map(|cell| (*column, cell))
        })
        .collect()
}

#[cfg(test)]
use rust_decimal_macros::dec;

#[cfg(test)]
fn pending(pdf_url: &str) -> PendingFiling {
    PendingFiling {
        tax_year: 2019,
        form_type: Some("990EZ".to_string()),
        pdf_url: pdf_url.to_string(),
    }
}

#[test]
fn auto_derives_net_figures() {
    let record = normalize_auto(&AutoFiling {
        tax_year: 2020,
        form_type: None,
        pdf_url: "a.pdf".to_string(),
        total_revenue: dec!(100),
        total_expenses: dec!(160),
        total_assets: dec!(500),
        total_liabilities: dec!(200),
    });
    assert_eq!(record.source, Source::Auto);
    assert_eq!(record.form_type, "NA");
    assert_eq!(record.net_income, Amount::Value(dec!(-60)));
    assert_eq!(record.net_assets, Amount::Value(dec!(300)));
}

#[test]
fn manual_without_row_is_all_na() {
    let record = normalize_manual(&pending("x.pdf"), None);
    assert_eq!(record.source, Source::Manual);
    assert_eq!(record.form_type, "990EZ");
    for amount in [
        record.total_revenue,
        record.total_expenses,
        record.net_income,
        record.total_assets,
        record.total_liabilities,
        record.net_assets,
    ] {
        assert_eq!(amount, Amount::NotAvailable);
    }
}

#[test]
fn manual_fields_default_independently() {
    let row = ManualRow::from_pairs([
        ("Form Type", "990"),
        ("Total Revenue", "$1,250"),
        ("Total Expenses", "900.50"),
        ("Net Income", ""),
        ("Total Assets", "n/a"),
    ]);
    let record = normalize_manual(&pending("x.pdf"), Some(&row));
    assert_eq!(record.form_type, "990");
    assert_eq!(record.total_revenue, Amount::Value(dec!(1250)));
    assert_eq!(record.total_expenses, Amount::Value(dec!(900.50)));
    assert_eq!(record.net_income, Amount::NotAvailable);
    assert_eq!(record.total_assets, Amount::NotAvailable);
    assert_eq!(record.total_liabilities, Amount::NotAvailable);
    assert_eq!(record.net_assets, Amount::NotAvailable);
}

#[test]
fn functional_expenses_column_wins() {
    let row = ManualRow::from_pairs([
        ("Total Functional Expenses", "10"),
        ("Total Expenses", "20"),
    ]);
    let record = normalize_manual(&pending("x.pdf"), Some(&row));
    assert_eq!(record.total_expenses, Amount::Value(dec!(10)));
}

#[test]
fn amount_renders_na_verbatim() {
    assert_eq!(Amount::NotAvailable.to_string(), "NA");
    assert_eq!(Amount::from_cell(" na ").to_string(), "NA");
    assert_eq!(Amount::Value(dec!(40)).to_string(), "40");
}

#[test]
fn row_without_form_type_is_na() {
    let row = ManualRow::from_pairs([("Total Revenue", "50")]);
    let record = normalize_manual(&pending("x.pdf"), Some(&row));
    assert_eq!(record.form_type, "NA");
    assert_eq!(record.total_revenue, Amount::Value(dec!(50)));
}

#[test]
fn overflowing_net_figure_is_na_not_a_panic() {
    let record = normalize_auto(&AutoFiling {
        tax_year: 2020,
        form_type: None,
        pdf_url: "a.pdf".to_string(),
        total_revenue: Decimal::MAX,
        total_expenses: -Decimal::MAX,
        total_assets: dec!(1),
        total_liabilities: dec!(1),
    });
    assert_eq!(record.net_income, Amount::NotAvailable);
    assert_eq!(record.net_assets, Amount::Value(dec!(0)));
}

#[test]
fn reports_cells_that_are_not_numbers() {
    let row = ManualRow::from_pairs([
        ("Total Revenue", "(500)"),
        ("Net Income", "NA"),
        ("Total Assets", "$1,000"),
        ("Net Assets", "about 3k"),
    ]);
    assert_eq!(
        unparsed_amounts(&row),
        vec![("Total Revenue", "(500)"), ("Net Assets", "about 3k")]
    );
}
