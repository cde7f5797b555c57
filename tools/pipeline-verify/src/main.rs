use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use correlation_tracer::Stage;
use pipeline_core::{EngineConfig, ResourceKind};
use pipeline_metrics::SlaMetric;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "pipeline-verify")]
#[command(about = "Pipeline verification checks over exported execution records")]
#[command(version = pipeline_core::VERSION)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON fixture with resources, execution records and routes
    #[arg(short, long)]
    fixture: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct Target {
    /// Resource kind: bucket, function, state-machine or queue
    #[arg(long, short = 'k')]
    kind: ResourceKind,

    /// Resource name
    #[arg(long, short = 'n')]
    name: String,

    /// Window length in minutes
    #[arg(long, short = 'm', default_value_t = 5)]
    minutes: u64,

    /// Window end (RFC 3339); defaults to now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count executions in the window
    Count(Target),
    /// Execution metrics for the window
    Metrics(Target),
    /// Evaluate SLA thresholds; exits non-zero on violation
    Sla {
        #[command(flatten)]
        target: Target,
        /// Threshold as name=value, e.g. maxErrors=0 (repeatable)
        #[arg(long = "require", short = 'r', value_parser = commands::parse_requirement, required = true)]
        requirements: Vec<(SlaMetric, f64)>,
    },
    /// Search records for any of the patterns
    Logs {
        #[command(flatten)]
        target: Target,
        /// Case-sensitive substring (repeatable)
        #[arg(long = "pattern", short = 'p', required = true)]
        patterns: Vec<String>,
    },
    /// Trace a correlation id through pipeline stages
    Trace {
        /// Correlation id to follow
        #[arg(long = "id")]
        correlation_id: String,
        /// Stage as stage=resource, in causal order (repeatable)
        #[arg(long = "stage", short = 's', value_parser = commands::parse_stage, required = true)]
        stages: Vec<(Stage, String)>,
        /// Lookback in minutes; defaults to the configured trace lookback
        #[arg(long)]
        lookback_minutes: Option<u64>,
        /// Window end (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).await?,
        None => {
            let mut config = EngineConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            config
        }
    };
    logging::init_tracing(&config.log)?;
    tracing::debug!(build = pipeline_core::BUILD_INFO, "starting");

    let provider = commands::load_fixture(&cli.fixture).await?;
    let output = match cli.command {
        Commands::Count(target) => commands::count(provider, &target).await?,
        Commands::Metrics(target) => commands::metrics(provider, &target).await?,
        Commands::Sla {
            target,
            requirements,
        } => commands::sla(provider, &target, requirements).await?,
        Commands::Logs { target, patterns } => commands::logs(provider, &target, &patterns).await?,
        Commands::Trace {
            correlation_id,
            stages,
            lookback_minutes,
            at,
        } => {
            let request = commands::TraceRequest {
                correlation_id,
                stages,
                lookback_minutes,
                at,
            };
            commands::trace(provider, &config, request).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output.body)?);
    if !output.passed {
        anyhow::bail!("{}", output.summary);
    }
    Ok(())
}
