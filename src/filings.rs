//! Merges ProPublica filing data with hand-transcribed filings into one
//! ordered export per organization, and reports what could not be merged.

pub mod error;
pub mod export;
pub mod manual;
pub mod reconcile;
pub mod record;
pub mod source;

pub use crate::error::{FilingError, Result};
pub use crate::export::{export, ExportRow, ExportWriter, HEADER};
pub use crate::manual::{ManualRow, ManualTable};
pub use crate::reconcile::{
    reconcile, reconcile_json, FilingKey, FilingSet, IncompleteFiling, ReconcileOptions,
    Reconciled,
};
pub use crate::record::{normalize_auto, normalize_manual, Amount, FilingRecord, Source};
pub use crate::source::{FilingInput, FilingSource, OrgFilings, Organization, ProPublicaClient};

use log::{error, info, warn};
use std::collections::BTreeSet;
use std::io;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOrg {
    pub org_id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub exported: Vec<String>,
    pub incomplete: Vec<IncompleteFiling>,
    pub stale: BTreeSet<String>,
    pub skipped: Vec<SkippedOrg>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.incomplete.is_empty() && self.stale.is_empty() && self.skipped.is_empty()
    }

    pub fn log_report(&self) {
        info!("Exported {} organization(s)", self.exported.len());
        if self.stale.is_empty() {
            info!("All your existing data was used!");
        } else {
            warn!("The following pdf links are outdated and are not included in the final data:");
            self.stale.iter().for_each(|url| warn!("  {}", url));
        }
        if !self.incomplete.is_empty() {
            warn!("Incomplete entries:");
            self.incomplete.iter().for_each(|filing| warn!("  {}", filing));
        }
        if !self.skipped.is_empty() {
            error!("Organizations skipped:");
            self.skipped
                .iter()
                .for_each(|org| error!("  {}: {}", org.org_id, org.reason));
        }
    }
}

/// Run-wide state. Organizations go through one at a time, in order, each
/// taking its matches out of the shared manual table.
pub struct FilingRun {
    manual: ManualTable,
    options: ReconcileOptions,
    exported: Vec<String>,
    incomplete: Vec<IncompleteFiling>,
    skipped: Vec<SkippedOrg>,
}

impl FilingRun {
    pub fn new(manual: ManualTable, options: ReconcileOptions) -> Self {
        FilingRun {
            manual,
            options,
            exported: Vec::new(),
            incomplete: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Fetches, reconciles and writes one organization. Nothing is written
    /// and no bookkeeping changes unless the organization parses cleanly.
    pub fn process_org<S, W>(
        &mut self,
        org_id: &str,
        source: &S,
        writer: &mut ExportWriter<W>,
    ) -> Result<usize>
    where
        S: FilingSource + ?Sized,
        W: io::Write,
    {
        let started = Instant::now();
        let body = source.fetch(org_id)?;
        let reconciled = reconcile_json(org_id, &body, &mut self.manual, &self.options)?;
        let rows = export::export_reconciled(&reconciled);
        writer.write_rows(&rows)?;

        info!(
            "Completed {} in {:.2}s",
            reconciled.organization.official_name,
            started.elapsed().as_secs_f64()
        );
        self.exported.push(reconciled.organization.org_id);
        self.incomplete.extend(reconciled.incomplete);
        Ok(rows.len())
    }

    /// Processes every organization. Errors confined to one organization are
    /// logged and recorded; anything else (a broken sink) ends the run.
    pub fn consume<I, S, W>(
        &mut self,
        org_ids: I,
        source: &S,
        writer: &mut ExportWriter<W>,
    ) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        S: FilingSource + ?Sized,
        W: io::Write,
    {
        for org_id in org_ids {
            let org_id = org_id.as_ref();
            match self.process_org(org_id, source, writer) {
                Ok(_) => {}
                Err(e) if e.is_org_local() => {
                    error!("organization {} skipped: {}", org_id, e);
                    self.skipped.push(SkippedOrg {
                        org_id: org_id.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        writer.flush()
    }

    pub fn finish(self) -> RunSummary {
        RunSummary {
            exported: self.exported,
            incomplete: self.incomplete,
            stale: self.manual.remaining_manual_entries(),
            skipped: self.skipped,
        }
    }
}

/// One full run: header, every organization in order, then the summary.
pub fn run<I, S, W>(
    org_ids: I,
    manual: ManualTable,
    options: ReconcileOptions,
    source: &S,
    target: W,
) -> Result<RunSummary>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    S: FilingSource + ?Sized,
    W: io::Write,
{
    let mut writer = ExportWriter::new(target)?;
    let mut filing_run = FilingRun::new(manual, options);
    filing_run.consume(org_ids, source, &mut writer)?;
    Ok(filing_run.finish())
}

#[cfg(test)]
use std::collections::HashMap;

#[cfg(test)]
struct CannedSource(HashMap<&'static str, &'static str>);

#[cfg(test)]
impl FilingSource for CannedSource {
    fn fetch(&self, org_id: &str) -> Result<String> {
        self.0
            .get(org_id)
            .map(|body| body.to_string())
            .ok_or_else(|| FilingError::Fetch {
                org_id: org_id.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })
    }
}

#[test]
fn fetch_failure_skips_only_that_org() {
    let source = CannedSource(HashMap::from([(
        "1",
        r#"{"organization": {"id": 1, "name": "One"},
            "filings_with_data": [],
            "filings_without_data": [{"tax_prd_yr": 2015, "pdf_url": "p.pdf"}]}"#,
    )]));
    let mut manual = ManualTable::new();
    manual.insert("p.pdf", ManualRow::from_pairs([("Total Revenue", "5")]));
    manual.insert("q.pdf", ManualRow::default());

    let mut output = Vec::new();
    let summary = run(["404", "1"], manual, ReconcileOptions::default(), &source, &mut output)
        .unwrap();

    assert_eq!(summary.exported, vec!["1"]);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].org_id, "404");
    assert!(summary.incomplete.is_empty());
    assert_eq!(summary.stale.iter().collect::<Vec<_>>(), vec!["q.pdf"]);
    assert!(!summary.is_clean());
    assert_eq!(String::from_utf8(output).unwrap().lines().count(), 2);
}
