use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use holdings_pipeline::app::quality_gate_use_case::QualityGateUseCase;
use holdings_pipeline::app::run_use_case::RunUseCase;
use holdings_pipeline::config::PipelineConfig;
use holdings_pipeline::infra::dataset_output_adapter::FileDatasetOutputAdapter;
use holdings_pipeline::infra::quality_report_output_adapter::FileQualityReportOutputAdapter;
use holdings_pipeline::infra::raw_table_adapter::JsonRawTableAdapter;
use holdings_pipeline::{logging, observability};

#[derive(Parser)]
#[command(name = "holdings-pipeline")]
#[command(about = "Normalize, consolidate and validate fund portfolio holdings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for rolling log files
    #[arg(long, global = true, env = "HOLDINGS_LOG_DIR", default_value = "logs")]
    log_dir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one as-of date
    Run {
        #[arg(long, env = "HOLDINGS_CONFIG", default_value = "config/pipeline.toml")]
        config: PathBuf,
        /// Directory holding one `<source_id>.json` raw table per source
        #[arg(long)]
        input_dir: PathBuf,
        /// Reporting date, YYYY-MM-DD
        #[arg(long)]
        as_of: NaiveDate,
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
        /// Exit non-zero when any gate FAILs
        #[arg(long)]
        fail_on_gate_failure: bool,
    },
    /// Load and validate a configuration file without running
    CheckConfig {
        #[arg(long, env = "HOLDINGS_CONFIG", default_value = "config/pipeline.toml")]
        config: PathBuf,
    },
}

async fn run(
    config_path: PathBuf,
    input_dir: PathBuf,
    as_of: NaiveDate,
    output_dir: PathBuf,
    fail_on_gate_failure: bool,
) -> anyhow::Result<ExitCode> {
    let config = Arc::new(PipelineConfig::load(&config_path).context("loading configuration")?);
    info!("Loaded {} sources from {}", config.sources.len(), config_path.display());

    let quality_gate = QualityGateUseCase::from_config(
        &config.quality,
        Box::new(FileQualityReportOutputAdapter::new(&output_dir)?),
    )?;
    let use_case = RunUseCase::new(
        config,
        Box::new(JsonRawTableAdapter::new(&input_dir)),
        Box::new(FileDatasetOutputAdapter::new(&output_dir)?),
        quality_gate,
    )?;

    let outcome = use_case.run(as_of).await?;
    let report = &outcome.quality_report;

    println!("\n📊 Pipeline Results for {}:", as_of);
    println!("   Holdings: {}", outcome.dataset.len());
    for source in &outcome.dataset.sources {
        println!(
            "   {:<28} {:>5} holdings{}",
            source.source_id,
            source.holdings_produced,
            if source.is_failed() { "  (failed)" } else { "" }
        );
    }
    println!("   Quality: {} (score {:.1})", report.overall_status, report.overall_score);
    for gate in report.gates.values() {
        println!("   - {:<22} {} {:>6.1}", gate.gate_name, gate.status, gate.score);
    }
    println!("   Output: {}", output_dir.display());

    if let Some(text) = observability::render() {
        let path = output_dir.join("metrics.prom");
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    }

    if report.has_failures() {
        let failed: Vec<&str> = report.failed_gates().iter().map(|g| g.as_str()).collect();
        warn!("Gates failed: {}", failed.join(", "));
        if fail_on_gate_failure {
            return Ok(ExitCode::from(2));
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.log_dir);

    if let Err(e) = observability::init() {
        warn!("Metrics disabled: {}", e);
    }

    let result = match cli.command {
        Commands::Run {
            config,
            input_dir,
            as_of,
            output_dir,
            fail_on_gate_failure,
        } => run(config, input_dir, as_of, output_dir, fail_on_gate_failure).await,
        Commands::CheckConfig { config } => PipelineConfig::load(&config)
            .map(|c| {
                println!("✅ {} is valid ({} sources)", config.display(), c.sources.len());
                ExitCode::SUCCESS
            })
            .map_err(anyhow::Error::from),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
