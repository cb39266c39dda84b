use clap::Parser;
use filings::{source, ManualTable, ProPublicaClient, ReconcileOptions};
use log::{error, info};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Merge ProPublica filing data with manually transcribed filings.
#[derive(Parser)]
#[command(name = "filing-merge", version, about)]
struct Cli {
    /// CSV of organization IDs, first column, header row skipped
    #[arg(long, default_value = "listoforgs.csv")]
    orgs: PathBuf,

    /// CSV of manual filings keyed by "PDF URL" (a previous export works)
    #[arg(long, default_value = "existingdata.csv")]
    existing: PathBuf,

    #[arg(short, long, default_value = "finaldata.csv")]
    output: PathBuf,

    /// Form types to leave out entirely, e.g. 990T
    #[arg(long = "skip-form-type", env = "FILING_SKIP_FORM_TYPES", value_delimiter = ',')]
    skip_form_types: Vec<String>,

    #[arg(long, env = "PROPUBLICA_API_BASE", default_value = source::DEFAULT_API_BASE)]
    api_base: String,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> filings::Result<()> {
    let started = Instant::now();
    info!("Starting...");

    // both inputs load in full before any output exists
    let org_ids = source::read_org_ids(&cli.orgs)?;
    let manual = ManualTable::from_path(&cli.existing)?;
    info!(
        "{} organization(s) to process, {} manual entries loaded",
        org_ids.len(),
        manual.len()
    );

    let client = ProPublicaClient::new(&cli.api_base, Duration::from_secs(cli.timeout_secs))?;
    let output = std::fs::File::create(&cli.output)?;
    let options = ReconcileOptions::with_skipped_form_types(&cli.skip_form_types);

    let summary = filings::run(&org_ids, manual, options, &client, output)?;
    summary.log_report();
    info!(
        "Wrote {} in {:.2}s",
        cli.output.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
