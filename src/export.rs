use crate::error::Result;
use crate::reconcile::{FilingSet, Reconciled};
use crate::record::{Amount, Source};
use crate::source::Organization;
use csv::WriterBuilder;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::io;

/// Column contract of the merged file. The same names are read back by
/// the manual loader, so an export can seed the next run's manual table.
pub const HEADER: [&str; 12] = [
    "Propublica Number",
    "Club Name",
    "Tax Year",
    "Form Type",
    "Data Source",
    "PDF URL",
    "Total Revenue",
    "Total Functional Expenses",
    "Net Income",
    "Total Assets",
    "Total Liabilities",
    "Net Assets",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub org_id: String,
    pub official_name: String,
    pub tax_year: i32,
    pub form_type: String,
    pub source: Source,
    pub pdf_url: String,
    pub total_revenue: Amount,
    pub total_expenses: Amount,
    pub net_income: Amount,
    pub total_assets: Amount,
    pub total_liabilities: Amount,
    pub net_assets: Amount,
}

impl Serialize for ExportRow {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ExportRow", HEADER.len())?;
        state.serialize_field(HEADER[0], &self.org_id)?;
        state.serialize_field(HEADER[1], &self.official_name)?;
        state.serialize_field(HEADER[2], &self.tax_year)?;
        state.serialize_field(HEADER[3], &self.form_type)?;
        state.serialize_field(HEADER[4], &self.source.to_string())?;
        state.serialize_field(HEADER[5], &self.pdf_url)?;
        state.serialize_field(HEADER[6], &self.total_revenue.to_string())?;
        state.serialize_field(HEADER[7], &self.total_expenses.to_string())?;
        state.serialize_field(HEADER[8], &self.net_income.to_string())?;
        state.serialize_field(HEADER[9], &self.total_assets.to_string())?;
        state.serialize_field(HEADER[10], &self.total_liabilities.to_string())?;
        state.serialize_field(HEADER[11], &self.net_assets.to_string())?;
        state.end()
    }
}

/// Rows for one organization, ordered by tax year then PDF URL. The key
/// breaks any remaining tie so the order is total.
pub fn export(organization: &Organization, filings: &FilingSet) -> Vec<ExportRow> {
    let mut entries: Vec<_> = filings.iter().collect();
    entries.sort_by(|(ka, a), (kb, b)| {
        (a.tax_year, &a.pdf_url, *ka).cmp(&(b.tax_year, &b.pdf_url, *kb))
    });
    entries
        .into_iter()
        .map(|(_, record)| ExportRow {
            org_id: organization.org_id.clone(),
            official_name: organization.official_name.clone(),
            tax_year: record.tax_year,
            form_type: record.form_type.clone(),
            source: record.source,
            pdf_url: record.pdf_url.clone(),
            total_revenue: record.total_revenue,
            total_expenses: record.total_expenses,
            net_income: record.net_income,
            total_assets: record.total_assets,
            total_liabilities: record.total_liabilities,
            net_assets: record.net_assets,
        })
        .collect()
}

pub fn export_reconciled(reconciled: &Reconciled) -> Vec<ExportRow> {
    export(&reconciled.organization, &reconciled.filings)
}

pub struct ExportWriter<W: io::Write> {
    writer: csv::Writer<W>,
}

impl<W: io::Write> ExportWriter<W> {
    /// Writes the header straight away, so even an empty run leaves a
    /// well-formed file behind.
    pub fn new(target: W) -> Result<Self> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(target);
        writer.write_record(HEADER)?;
        Ok(ExportWriter { writer })
    }

    pub fn write_rows(&mut self, rows: &[ExportRow]) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
use crate::record::{normalize_auto, normalize_manual};
#[cfg(test)]
use crate::source::{AutoFiling, PendingFiling};
#[cfg(test)]
use rust_decimal_macros::dec;

#[cfg(test)]
fn organization() -> Organization {
    Organization {
        org_id: "7".to_string(),
        official_name: "Lakeside Boat Club".to_string(),
    }
}

#[test]
fn rows_sorted_by_year_then_url() {
    let mut set = FilingSet::new("7");
    for (year, url) in [(2021, "b.pdf"), (2019, "z.pdf"), (2021, "a.pdf"), (2019, "")] {
        set.insert_manual(normalize_manual(
            &PendingFiling {
                tax_year: year,
                form_type: None,
                pdf_url: url.to_string(),
            },
            None,
        ));
    }

    let order: Vec<_> = export(&organization(), &set)
        .into_iter()
        .map(|row| (row.tax_year, row.pdf_url))
        .collect();
    assert_eq!(
        order,
        vec![
            (2019, "".to_string()),
            (2019, "z.pdf".to_string()),
            (2021, "a.pdf".to_string()),
            (2021, "b.pdf".to_string()),
        ]
    );
}

#[test]
fn writes_header_and_na_verbatim() {
    let mut set = FilingSet::new("7");
    set.insert_auto(normalize_auto(&AutoFiling {
        tax_year: 2020,
        form_type: Some("990".into()),
        pdf_url: "a.pdf".into(),
        total_revenue: dec!(100),
        total_expenses: dec!(60),
        total_assets: dec!(500),
        total_liabilities: dec!(200),
    }));
    set.insert_manual(normalize_manual(
        &PendingFiling {
            tax_year: 2019,
            form_type: None,
            pdf_url: "x.pdf".into(),
        },
        None,
    ));

    let mut output = Vec::new();
    {
        let mut writer = ExportWriter::new(&mut output).unwrap();
        writer.write_rows(&export(&organization(), &set)).unwrap();
        writer.flush().unwrap();
    }

    let text = String::from_utf8(output).unwrap();
    assert_eq!(
        text,
        "Propublica Number,Club Name,Tax Year,Form Type,Data Source,PDF URL,\
Total Revenue,Total Functional Expenses,Net Income,Total Assets,Total Liabilities,Net Assets\n\
7,Lakeside Boat Club,2019,NA,Manual,x.pdf,NA,NA,NA,NA,NA,NA\n\
7,Lakeside Boat Club,2020,990,Auto,a.pdf,100,60,40,500,200,300\n"
    );
}

#[test]
fn empty_run_still_has_header() {
    let mut output = Vec::new();
    ExportWriter::new(&mut output).unwrap().flush().unwrap();
    assert_eq!(output.iter().filter(|b| **b == b'\n').count(), 1);
}
