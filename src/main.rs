use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use policy_drift::config::{Config, ConfigOverrides, OutputFormat};
use policy_drift::detect::{detect_all_with, DetectionReport, DriftResult};
use policy_drift::explain::{format_report, render_summary, summarize};
use policy_drift::intent::{load_intent_str, PolicyIntent};
use policy_drift::output::csv::{findings_to_csv, invalid_records_to_csv};
use policy_drift::output::json::render_json;
use policy_drift::output::table::{
    render_explanations, render_findings_table, render_invalid_records_table,
    render_summary_table,
};
use policy_drift::records::csv::read_records_file;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "policy-drift",
    about = "Detect drift between declared policy intent and district implementation data"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Policy intent document (JSON).
    #[arg(short, long)]
    intent: Option<String>,
    /// Implementation records (CSV).
    #[arg(short, long)]
    records: Option<String>,
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,
    /// Evaluate districts on a single thread.
    #[arg(long)]
    sequential: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every finding and every record that could not be checked.
    Detect,
    Summary,
    /// Full text report: summary, explained findings, data quality issues.
    Report,
    Explain {
        #[arg(long)]
        district: Option<String>,
    },
    /// Load and validate the intent document without reading records.
    Validate,
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        intent_path: cli.intent.clone(),
        records_path: cli.records.clone(),
        format: cli.output,
        sequential: cli.sequential,
    });
    let format = config.output.format;

    if let Commands::Config { init, show } = &cli.command {
        return handle_config_command(*init, *show, &config, &config_path);
    }

    let intent = read_intent(&config.resolved_intent_path())?;
    if matches!(cli.command, Commands::Validate) {
        return print_validation(&intent, format);
    }

    let records_path = config.resolved_records_path();
    let records = read_records_file(&records_path)?;
    info!(
        "loaded {} records from {}",
        records.len(),
        records_path.display()
    );
    let report = detect_all_with(&intent, &records, &config.detect_options());

    match &cli.command {
        Commands::Detect => print_detect(&report, format)?,
        Commands::Summary => print_summary(&report.findings, format)?,
        Commands::Report => print_report(&report, format)?,
        Commands::Explain { district } => {
            let findings = match district {
                Some(id) => report.findings_for(id).cloned().collect::<Vec<_>>(),
                None => report.findings.clone(),
            };
            print_explanations(&findings, format)?;
        }
        Commands::Validate | Commands::Config { .. } => {}
    }

    Ok(())
}

fn read_intent(path: &Path) -> Result<PolicyIntent> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed reading policy intent: {}", path.display()))?;
    let intent = load_intent_str(&text)
        .with_context(|| format!("malformed policy intent: {}", path.display()))?;
    Ok(intent)
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn print_validation(intent: &PolicyIntent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("Policy intent is valid.");
            println!("  domain: {}", intent.policy_domain());
            println!("  target groups: {}", intent.target_groups().len());
            for constraint in intent.constraints() {
                println!("  constraint: {}", constraint.label());
            }
            for rule in intent.temporal_rules() {
                println!("  temporal rule: {}", rule.label());
            }
            println!("  fingerprint: {}", intent.fingerprint());
        }
        OutputFormat::Json => println!("{}", render_json(intent)?),
        OutputFormat::Csv => {
            warn!("CSV output for validate not implemented, using JSON");
            println!("{}", render_json(intent)?);
        }
    }
    Ok(())
}

fn print_detect(report: &DetectionReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if report.findings.is_empty() {
                println!("No policy drift detected.");
            } else {
                println!("{}", render_findings_table(&report.findings));
            }
            if !report.invalid_records.is_empty() {
                println!("{}", render_invalid_records_table(&report.invalid_records));
            }
        }
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Csv => {
            print!("{}", findings_to_csv(&report.findings)?);
            if !report.invalid_records.is_empty() {
                println!();
                print!("{}", invalid_records_to_csv(&report.invalid_records)?);
            }
        }
    }
    Ok(())
}

fn print_summary(findings: &[DriftResult], format: OutputFormat) -> Result<()> {
    let stats = summarize(findings);
    match format {
        OutputFormat::Table => {
            println!("{}", render_summary(&stats));
            if stats.total > 0 {
                println!("{}", render_summary_table(&stats));
            }
        }
        OutputFormat::Json => println!("{}", render_json(&stats)?),
        OutputFormat::Csv => {
            warn!("CSV output for summary not implemented, using JSON");
            println!("{}", render_json(&stats)?);
        }
    }
    Ok(())
}

fn print_report(report: &DetectionReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", format_report(report)),
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Csv => print!("{}", findings_to_csv(&report.findings)?),
    }
    Ok(())
}

fn print_explanations(findings: &[DriftResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_explanations(findings)),
        OutputFormat::Json => {
            let explained = findings
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "district_id": f.district_id,
                        "month": f.month,
                        "severity": f.severity,
                        "explanation": policy_drift::explain::explain(f),
                    })
                })
                .collect::<Vec<_>>();
            println!("{}", render_json(&explained)?);
        }
        OutputFormat::Csv => {
            warn!("CSV output for explain not implemented, using table");
            println!("{}", render_explanations(findings));
        }
    }
    Ok(())
}
