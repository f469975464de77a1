//! Command-line entry point for scoped-storage verification campaigns.
//!
//! - `scope-verif plan` - generate and sample a campaign without executing it
//! - `scope-verif simulate` - run a campaign against the in-memory device
//! - `scope-verif history` - summarize finished campaigns
//! - `scope-verif report` - categorize the violations of finished campaigns

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use scope_verif::capability::Catalog;
use scope_verif::config::RunConfig;
use scope_verif::oracle::Oracle;
use scope_verif::report::{analyze_campaign_dir, TOTAL_VIOLATIONS_ROW, UNKNOWN_ROW};
use scope_verif::sampling::SampleMode;
use scope_verif::sim::SimulatedDevice;
use scope_verif::verifier::{history, RunOutcome, Verifier};

#[derive(Parser)]
#[command(name = "scope-verif")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and sample a campaign; print the selected cases as JSON.
    Plan(RunArgs),

    /// Run a campaign against the simulated device.
    Simulate(RunArgs),

    /// Summarize the finished campaigns of a campaign directory.
    History(RunArgs),

    /// Categorize violations of every finished campaign and write the reports.
    Report(RunArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    /// JSON run configuration; command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    campaign: Option<String>,

    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// random, exploratory, extensive or polarized.
    #[arg(long)]
    sample_mode: Option<SampleMode>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    max_cases: Option<usize>,

    #[arg(long)]
    max_payload_length: Option<usize>,

    #[arg(long)]
    min_cases_per_rule: Option<usize>,

    /// Only run these case hashes (and their prerequisites).
    #[arg(long = "case")]
    cases: Vec<String>,

    /// Skip this rule id. Repeatable.
    #[arg(long = "disable-rule")]
    disabled_rules: Vec<String>,

    #[arg(long)]
    reuse_results: bool,

    /// Treat the device as lacking privileged access.
    #[arg(long)]
    no_root: bool,
}

impl RunArgs {
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path).with_context(|| format!("reading {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(v) = &self.campaign {
            config.campaign = v.clone();
        }
        if let Some(v) = &self.results_dir {
            config.results_dir = v.clone();
        }
        if let Some(v) = self.sample_mode {
            config.sample_mode = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.max_cases {
            config.max_cases = Some(v);
        }
        if let Some(v) = self.max_payload_length {
            config.max_payload_length = v;
        }
        if let Some(v) = self.min_cases_per_rule {
            config.min_cases_per_rule = v;
        }
        if !self.cases.is_empty() {
            config.only_cases = self.cases.clone();
        }
        config.disabled_rules.extend(self.disabled_rules.iter().cloned());
        config.reuse_results |= self.reuse_results;
        Ok(config)
    }
}

fn verifier<'a>(catalog: &'a Catalog, args: &RunArgs) -> anyhow::Result<Verifier<'a, SimulatedDevice>> {
    let config = args.run_config()?;
    let oracle = Oracle::new(SimulatedDevice::new(!args.no_root), config.retry);
    Ok(Verifier::new(catalog, config, oracle)?)
}

fn plan(args: RunArgs) -> anyhow::Result<()> {
    let catalog = Catalog::standard()?;
    let mut v = verifier(&catalog, &args)?;
    let (generated, plan) = v.plan()?;
    let out = json!({
        "experiment_hash": plan.experiment_hash,
        "total_candidates": generated.total(),
        "selected": plan.cases.len(),
        "known_violations": plan.known_violations,
        "cases": plan.cases.iter().map(|c| json!({"hash": c.hash(), "case": c.printable()})).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn simulate(args: RunArgs) -> anyhow::Result<()> {
    let catalog = Catalog::standard()?;
    let mut v = verifier(&catalog, &args)?;
    match v.verify()? {
        RunOutcome::Archived(path) => println!("campaign finished: {}", path.display()),
        RunOutcome::Incomplete { tested, total } => println!("campaign paused at {}/{}", tested, total),
        RunOutcome::NothingToTest => println!("no case to test"),
    }
    Ok(())
}

fn show_history(args: RunArgs) -> anyhow::Result<()> {
    let config = args.run_config()?;
    let finished = config.results_dir.join(&config.campaign).join("finished");
    let histories = history::load(&finished, &config.campaign)?;
    let violated = |h: &history::History| h.values().filter(|r| r.violated()).count();
    let out = json!({
        "core": {"cases": histories.core.len(), "violations": violated(&histories.core)},
        "full": {"cases": histories.full.len(), "violations": violated(&histories.full)},
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn report(args: RunArgs) -> anyhow::Result<()> {
    let config = args.run_config()?;
    let dir = config.results_dir.join(&config.campaign);
    for (path, analysis) in analyze_campaign_dir(&dir)? {
        println!(
            "{}: {} violations, {} unknown",
            path.display(),
            analysis.count(TOTAL_VIOLATIONS_ROW),
            analysis.count(UNKNOWN_ROW)
        );
        print!("{}", analysis.to_csv());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for JSON output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan(args) => plan(args),
        Commands::Simulate(args) => simulate(args),
        Commands::History(args) => show_history(args),
        Commands::Report(args) => report(args),
    }
}
