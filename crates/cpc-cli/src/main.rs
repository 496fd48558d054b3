//! CPC CLI - Command-line interface
//!
//! Usage:
//!   cpc rules -i <dataset> -o <predictions>
//!   cpc fallback -i <rule predictions> -r <raw text> -o <predictions>
//!   cpc run -i <dataset> [-r <raw text>] -o <predictions>
//!   cpc enrich -i <items> -o <dataset>
//!   cpc evaluate -i <predictions>

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info_span, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cpc_core::{AppConfig, FallbackConfig, FallbackProvider, LoggingConfig, TablesConfig};

#[derive(Parser)]
#[command(name = "cpc")]
#[command(about = "Hybrid rule and model classifier for cultural provenance")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables take precedence)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a dataset with the rule cascade only
    Rules {
        /// Entity dataset with relationship lists
        #[arg(short, long, default_value = "data/validation_enriched_with_labels.csv")]
        input: PathBuf,
        /// Rule prediction table to write
        #[arg(short, long, default_value = "results/validation_rules.csv")]
        output: PathBuf,
        #[command(flatten)]
        tables: TableArgs,
        /// Evaluate rows on all cores
        #[arg(long)]
        parallel: bool,
    },
    /// Re-classify agnostic rule predictions from free text
    Fallback {
        /// Rule prediction table
        #[arg(short, long, default_value = "results/validation_rules.csv")]
        input: PathBuf,
        /// Text source with name and description columns
        #[arg(short, long, default_value = "data/validation_raw.csv")]
        raw: PathBuf,
        /// Hybrid prediction table to write
        #[arg(short, long, default_value = "results/validation_fallback.csv")]
        output: PathBuf,
        #[command(flatten)]
        fallback: FallbackArgs,
    },
    /// Run both stages on a dataset
    Run {
        /// Entity dataset with relationship lists
        #[arg(short, long, default_value = "data/test_unlabeled.csv")]
        input: PathBuf,
        /// Text source; defaults to the dataset's own name and description
        #[arg(short, long)]
        raw: Option<PathBuf>,
        /// Hybrid prediction table to write
        #[arg(short, long, default_value = "results/hybrid_test_final_predicts.csv")]
        output: PathBuf,
        #[command(flatten)]
        tables: TableArgs,
        #[command(flatten)]
        fallback: FallbackArgs,
        /// Evaluate rows on all cores
        #[arg(long)]
        parallel: bool,
    },
    /// Fetch relationship lists from Wikidata
    Enrich {
        /// CSV with an `item` column of entity URIs
        #[arg(short, long)]
        input: PathBuf,
        /// Entity dataset to write
        #[arg(short, long)]
        output: PathBuf,
        /// Minimum milliseconds between request starts
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Requests in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Report accuracy of a prediction table against its labels
    Evaluate {
        /// Prediction table with a ground-truth column
        #[arg(short, long)]
        input: PathBuf,
        /// Compare labels exactly instead of case-insensitively
        #[arg(long)]
        strict: bool,
    },
}

/// Reference table overrides
#[derive(Args)]
struct TableArgs {
    /// Heritage designation table
    #[arg(long)]
    golden_heritage: Option<PathBuf>,
    /// Culture membership table
    #[arg(long)]
    golden_culture: Option<PathBuf>,
    /// Instance-of table
    #[arg(long)]
    golden_instance: Option<PathBuf>,
}

impl TableArgs {
    fn apply(self, tables: &mut TablesConfig) {
        if let Some(path) = self.golden_heritage {
            tables.heritage = path;
        }
        if let Some(path) = self.golden_culture {
            tables.culture = path;
        }
        if let Some(path) = self.golden_instance {
            tables.instance = path;
        }
    }
}

/// Fallback classifier overrides
#[derive(Args)]
struct FallbackArgs {
    /// Classifier backend (model-server, openai, ollama)
    #[arg(long)]
    provider: Option<FallbackProvider>,
    /// Model server base URL
    #[arg(long)]
    url: Option<String>,
    /// LLM model name
    #[arg(long)]
    model: Option<String>,
    /// Abort the run if the classifier takes longer than this
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl FallbackArgs {
    fn apply(self, fallback: &mut FallbackConfig) {
        if let Some(provider) = self.provider {
            fallback.provider = provider;
        }
        if let Some(url) = self.url {
            fallback.model_server_url = url;
        }
        if let Some(model) = self.model {
            fallback.model = model;
        }
        if let Some(secs) = self.timeout_secs {
            fallback.timeout_secs = Some(secs);
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path)
            .and_then(AppConfig::with_env_override)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => AppConfig::from_env().context("reading configuration from environment"),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn dispatch(command: Commands, mut config: AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::Rules {
            input,
            output,
            tables,
            parallel,
        } => {
            tables.apply(&mut config.tables);
            config.pipeline.parallel |= parallel;
            commands::rules(&config, &input, &output)?;
            Ok(())
        }
        Commands::Fallback {
            input,
            raw,
            output,
            fallback,
        } => {
            fallback.apply(&mut config.fallback);
            let engine = commands::merge_engine(&config.fallback)?;
            commands::fallback(&engine, &input, &raw, &output).await?;
            Ok(())
        }
        Commands::Run {
            input,
            raw,
            output,
            tables,
            fallback,
            parallel,
        } => {
            tables.apply(&mut config.tables);
            fallback.apply(&mut config.fallback);
            config.pipeline.parallel |= parallel;
            let engine = commands::merge_engine(&config.fallback)?;
            commands::run(&config, &engine, &input, raw.as_deref(), &output).await?;
            Ok(())
        }
        Commands::Enrich {
            input,
            output,
            delay_ms,
            concurrency,
        } => {
            if let Some(delay) = delay_ms {
                config.enrichment.min_interval_ms = delay;
            }
            if let Some(concurrency) = concurrency {
                config.enrichment.max_concurrency = concurrency;
            }
            commands::enrich(&config.enrichment, &input, &output).await
        }
        Commands::Evaluate { input, strict } => commands::evaluate(&input, strict),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let run_id = Uuid::new_v4();
    dispatch(cli.command, config)
        .instrument(info_span!("cpc", %run_id))
        .await
}
