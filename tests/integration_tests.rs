use filings::source::{parse_org_json, read_org_ids};
use filings::{
    export, reconcile, run, Amount, FilingError, FilingInput, FilingSource, ManualRow,
    ManualTable, ReconcileOptions, Result, Source,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::io::Write;

const HEADER_LINE: &str = "Propublica Number,Club Name,Tax Year,Form Type,Data Source,PDF URL,Total Revenue,Total Functional Expenses,Net Income,Total Assets,Total Liabilities,Net Assets";

struct FakeApi(HashMap<String, String>);

impl FakeApi {
    fn new(orgs: &[(&str, &str)]) -> Self {
        FakeApi(
            orgs.iter()
                .map(|(id, body)| (id.to_string(), body.to_string()))
                .collect(),
        )
    }
}

impl FilingSource for FakeApi {
    fn fetch(&self, org_id: &str) -> Result<String> {
        self.0.get(org_id).cloned().ok_or_else(|| FilingError::Fetch {
            org_id: org_id.to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        })
    }
}

fn org_json(id: &str, name: &str, with_data: &str, without_data: &str) -> String {
    format!(
        r#"{{"organization": {{"id": {}, "name": "{}"}},
            "filings_with_data": [{}],
            "filings_without_data": [{}]}}"#,
        id, name, with_data, without_data
    )
}

fn run_to_string(
    org_ids: &[&str],
    api: &FakeApi,
    manual: ManualTable,
) -> (String, filings::RunSummary) {
    let mut output = Vec::new();
    let summary = run(org_ids, manual, ReconcileOptions::default(), api, &mut output).unwrap();
    (String::from_utf8(output).unwrap(), summary)
}

#[test]
fn scenario_a_auto_filing_derives_net_figures() {
    let api = FakeApi::new(&[(
        "100",
        &org_json(
            "100",
            "Harbor Rowing",
            r#"{"tax_prd_yr": 2020, "formtype": 0, "pdf_url": "a.pdf",
                "totrevenue": 100, "totfuncexpns": 60, "totassetsend": 500, "totliabend": 200}"#,
            "",
        ),
    )]);

    let (output, summary) = run_to_string(&["100"], &api, ManualTable::new());

    assert_eq!(
        output,
        format!("{}\n100,Harbor Rowing,2020,0,Auto,a.pdf,100,60,40,500,200,300\n", HEADER_LINE)
    );
    assert!(summary.is_clean());
}

#[test]
fn scenario_b_manual_hit_is_consumed() {
    let body = org_json("200", "Cove Sailing", "", r#"{"tax_prd_yr": 2019, "pdf_url": "x.pdf"}"#);
    let mut manual = ManualTable::new();
    manual.insert("x.pdf", ManualRow::from_pairs([("Total Revenue", "50")]));

    let result = reconcile(
        &parse_org_json("200", &body).unwrap(),
        &mut manual,
        &ReconcileOptions::default(),
    );

    let rows = export(&result.organization, &result.filings);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.source, Source::Manual);
    assert_eq!(row.total_revenue, Amount::Value(Decimal::new(50, 0)));
    for amount in [
        row.total_expenses,
        row.net_income,
        row.total_assets,
        row.total_liabilities,
        row.net_assets,
    ] {
        assert_eq!(amount, Amount::NotAvailable);
    }
    assert!(!manual.contains("x.pdf"));
    assert!(result.incomplete.is_empty());
}

#[test]
fn scenario_c_manual_miss_is_incomplete() {
    let api = FakeApi::new(&[(
        "200",
        &org_json("200", "Cove Sailing", "", r#"{"tax_prd_yr": 2019, "pdf_url": "x.pdf"}"#),
    )]);

    let (output, summary) = run_to_string(&["200"], &api, ManualTable::new());

    assert!(output.ends_with("200,Cove Sailing,2019,NA,Manual,x.pdf,NA,NA,NA,NA,NA,NA\n"));
    assert_eq!(summary.incomplete.len(), 1);
    assert_eq!(summary.incomplete[0].official_name, "Cove Sailing");
    assert_eq!(summary.incomplete[0].tax_year, 2019);
}

#[test]
fn scenario_d_unreferenced_entry_is_stale() {
    let api = FakeApi::new(&[(
        "200",
        &org_json("200", "Cove Sailing", "", r#"{"tax_prd_yr": 2019, "pdf_url": "x.pdf"}"#),
    )]);
    let mut manual = ManualTable::new();
    manual.insert("x.pdf", ManualRow::default());
    manual.insert("y.pdf", ManualRow::default());

    let (_, summary) = run_to_string(&["200"], &api, manual);

    assert_eq!(summary.stale.into_iter().collect::<Vec<_>>(), vec!["y.pdf"]);
}

#[test]
fn scenario_e_malformed_org_is_skipped_and_run_continues() {
    let api = FakeApi::new(&[
        (
            "300",
            &org_json(
                "300",
                "Broken Club",
                r#"{"tax_prd_yr": 2020, "pdf_url": "b.pdf",
                    "totrevenue": 1, "totassetsend": 1, "totliabend": 1}"#,
                "",
            ),
        ),
        (
            "100",
            &org_json(
                "100",
                "Harbor Rowing",
                r#"{"tax_prd_yr": 2020, "pdf_url": "a.pdf",
                    "totrevenue": 100, "totfuncexpns": 60, "totassetsend": 500, "totliabend": 200}"#,
                "",
            ),
        ),
    ]);

    let (output, summary) = run_to_string(&["300", "100"], &api, ManualTable::new());

    assert!(!output.contains("Broken Club"));
    assert_eq!(output.lines().count(), 2);
    assert_eq!(summary.exported, vec!["100"]);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].org_id, "300");
    assert!(summary.skipped[0].reason.contains("totfuncexpns"));
}

#[test]
fn overflowing_figures_skip_only_that_org() {
    let api = FakeApi::new(&[
        (
            "1",
            &org_json(
                "1",
                "Huge Club",
                r#"{"tax_prd_yr": 2020, "pdf_url": "h.pdf",
                    "totrevenue": 79228162514264337593543950335,
                    "totfuncexpns": -79228162514264337593543950335,
                    "totassetsend": 1, "totliabend": 1}"#,
                "",
            ),
        ),
        (
            "2",
            &org_json(
                "2",
                "Harbor Rowing",
                r#"{"tax_prd_yr": 2020, "pdf_url": "a.pdf",
                    "totrevenue": 100, "totfuncexpns": 60, "totassetsend": 500, "totliabend": 200}"#,
                "",
            ),
        ),
    ]);

    let (output, summary) = run_to_string(&["1", "2"], &api, ManualTable::new());

    assert_eq!(summary.exported, vec!["2"]);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].org_id, "1");
    assert!(!output.contains("Huge Club"));
}

#[test]
fn manual_row_without_form_type_exports_na() {
    let api = FakeApi::new(&[(
        "200",
        &org_json(
            "200",
            "Cove Sailing",
            "",
            r#"{"tax_prd_yr": 2019, "formtype_str": "990PF", "pdf_url": "x.pdf"}"#,
        ),
    )]);
    let mut manual = ManualTable::new();
    manual.insert("x.pdf", ManualRow::from_pairs([("Total Revenue", "50")]));

    let (output, _) = run_to_string(&["200"], &api, manual);

    assert!(output.ends_with("200,Cove Sailing,2019,NA,Manual,x.pdf,50,NA,NA,NA,NA,NA\n"));
}

fn busy_api() -> FakeApi {
    FakeApi::new(&[
        (
            "1",
            &org_json(
                "1",
                "North Club",
                r#"{"tax_prd_yr": 2021, "pdf_url": "n21.pdf",
                    "totrevenue": 10, "totfuncexpns": 20, "totassetsend": 30, "totliabend": 5},
                   {"tax_prd_yr": 2017, "pdf_url": "n17b.pdf",
                    "totrevenue": 7, "totfuncexpns": 7, "totassetsend": 7, "totliabend": 7}"#,
                r#"{"tax_prd_yr": 2017, "pdf_url": "n17a.pdf"},
                   {"tax_prd_yr": 2010, "pdf_url": "shared.pdf"},
                   {"tax_prd_yr": 2009, "pdf_url": null}"#,
            ),
        ),
        (
            "2",
            &org_json(
                "2",
                "South Club",
                "",
                r#"{"tax_prd_yr": 2012, "pdf_url": "shared.pdf"},
                   {"tax_prd_yr": 2011, "pdf_url": "s11.pdf"}"#,
            ),
        ),
    ])
}

fn busy_manual() -> ManualTable {
    let mut manual = ManualTable::new();
    for (url, revenue) in [("n17a.pdf", "70"), ("shared.pdf", "99"), ("s11.pdf", "11"), ("old.pdf", "1")] {
        manual.insert(url, ManualRow::from_pairs([("Total Revenue", revenue)]));
    }
    manual
}

#[test]
fn reruns_are_byte_identical() {
    let (first, _) = run_to_string(&["1", "2"], &busy_api(), busy_manual());
    let (second, _) = run_to_string(&["1", "2"], &busy_api(), busy_manual());
    assert_eq!(first, second);
}

#[test]
fn manual_rows_are_consumed_at_most_once_across_orgs() {
    let api = busy_api();
    let mut manual = busy_manual();
    let mut consumed: Vec<HashSet<String>> = Vec::new();

    for id in ["1", "2"] {
        let before = manual.remaining_manual_entries();
        let org = parse_org_json(id, &api.fetch(id).unwrap()).unwrap();
        reconcile(&org, &mut manual, &ReconcileOptions::default());
        let after = manual.remaining_manual_entries();
        consumed.push(before.difference(&after).cloned().collect());
    }

    assert!(consumed[0].is_disjoint(&consumed[1]));
    assert!(consumed[0].contains("shared.pdf"));
    // the second club lists the same PDF but the row is already gone
    let (_, summary) = run_to_string(&["1", "2"], &api, busy_manual());
    assert_eq!(summary.incomplete.len(), 2);
    assert!(summary
        .incomplete
        .iter()
        .any(|f| f.official_name == "South Club" && f.tax_year == 2012));
    assert_eq!(summary.stale.into_iter().collect::<Vec<_>>(), vec!["old.pdf"]);
}

#[test]
fn rows_are_ordered_by_year_then_url() {
    let api = busy_api();
    let mut manual = busy_manual();
    let org = parse_org_json("1", &api.fetch("1").unwrap()).unwrap();
    let result = reconcile(&org, &mut manual, &ReconcileOptions::default());
    let rows = export(&result.organization, &result.filings);

    let keys: Vec<_> = rows.iter().map(|r| (r.tax_year, r.pdf_url.as_str())).collect();
    assert_eq!(
        keys,
        vec![
            (2009, ""),
            (2010, "shared.pdf"),
            (2017, "n17a.pdf"),
            (2017, "n17b.pdf"),
            (2021, "n21.pdf"),
        ]
    );
    assert!(rows.windows(2).all(|w| (w[0].tax_year, &w[0].pdf_url) <= (w[1].tax_year, &w[1].pdf_url)));
}

#[test]
fn auto_net_figures_never_drift() {
    let api = busy_api();
    for id in ["1", "2"] {
        let org = parse_org_json(id, &api.fetch(id).unwrap()).unwrap();
        for filing in &org.filings {
            if let FilingInput::WithData(auto) = filing {
                let record = filings::normalize_auto(auto);
                let net_income = record.total_revenue.value().unwrap() - record.total_expenses.value().unwrap();
                let net_assets = record.total_assets.value().unwrap() - record.total_liabilities.value().unwrap();
                assert_eq!(record.net_income, Amount::Value(net_income));
                assert_eq!(record.net_assets, Amount::Value(net_assets));
            }
        }
    }
}

#[test]
fn files_round_trip_through_the_loaders() {
    let mut orgs = tempfile::NamedTempFile::new().unwrap();
    writeln!(orgs, "Propublica Number,Name\n200,Cove Sailing").unwrap();
    let mut existing = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        existing,
        "{}\n200,Cove Sailing,2019,990,Manual,x.pdf,50,,,,,",
        HEADER_LINE
    )
    .unwrap();

    let org_ids = read_org_ids(orgs.path()).unwrap();
    let manual = ManualTable::from_path(existing.path()).unwrap();
    let api = FakeApi::new(&[(
        "200",
        &org_json("200", "Cove Sailing", "", r#"{"tax_prd_yr": 2019, "pdf_url": "x.pdf"}"#),
    )]);

    let mut output = Vec::new();
    let summary = run(&org_ids, manual, ReconcileOptions::default(), &api, &mut output).unwrap();
    assert!(summary.is_clean());
    assert_eq!(
        String::from_utf8(output).unwrap(),
        format!("{}\n200,Cove Sailing,2019,990,Manual,x.pdf,50,NA,NA,NA,NA,NA\n", HEADER_LINE)
    );
}

#[test]
fn missing_input_file_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("existingdata.csv");
    assert!(matches!(
        ManualTable::from_path(&missing),
        Err(FilingError::UnreadableSourceFile { .. })
    ));
    assert!(matches!(
        read_org_ids(&missing),
        Err(FilingError::UnreadableSourceFile { .. })
    ));
}
