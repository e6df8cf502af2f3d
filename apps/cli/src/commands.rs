//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use corpus_core::{
    PipelineOptions, ProgressReporter, Stage, StagePaths, StageReport, run_pipeline, run_stage,
};
use corpus_shared::{AppConfig, init_config, load_config, load_config_from};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// npcorpus: build a retrieval corpus from nonprofit registry data.
#[derive(Parser)]
#[command(
    name = "npcorpus",
    version,
    about = "Harvest, enrich, crawl and chunk nonprofit data into a retrieval corpus.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.npcorpus/npcorpus.toml).
    #[arg(long, global = true, env = "NPCORPUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Input/output overrides shared by the table-to-table stages.
#[derive(Args, Debug, Default)]
pub(crate) struct TableArgs {
    /// Input table (defaults to the previous stage's file in data_dir).
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output table (defaults to this stage's file in data_dir).
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Query the registry for every configured category.
    Harvest {
        /// Output table.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Join the curated supplemental table onto the harvested table.
    Merge {
        #[command(flatten)]
        table: TableArgs,

        /// Supplemental table.
        #[arg(long)]
        supplemental: Option<PathBuf>,
    },

    /// Look up cause tags for every organization.
    Enrich {
        #[command(flatten)]
        table: TableArgs,

        /// Continue from the existing output file.
        #[arg(long)]
        resume: bool,
    },

    /// Discover same-site subpages of every organization's website.
    Crawl {
        #[command(flatten)]
        table: TableArgs,

        /// Continue from the existing output file.
        #[arg(long)]
        resume: bool,
    },

    /// Fetch subpages and split their text into chunks.
    Chunk {
        #[command(flatten)]
        table: TableArgs,

        /// Maximum segment length in characters.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared by consecutive segments.
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Run a range of stages in order.
    Run {
        /// First stage to run.
        #[arg(long, default_value = "harvest")]
        from: Stage,

        /// Last stage to run.
        #[arg(long, default_value = "chunk")]
        to: Stage,

        /// Let enrich and crawl continue from their existing output files.
        #[arg(long)]
        resume: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "corpus=info",
        1 => "corpus=debug",
        _ => "corpus=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
        Command::Harvest { output } => {
            let config = resolve_config(config_path)?;
            let table = TableArgs {
                input: None,
                output,
            };
            cmd_stage(&config, Stage::Harvest, &table, None, false).await
        }
        Command::Merge {
            table,
            supplemental,
        } => {
            let config = resolve_config(config_path)?;
            cmd_stage(&config, Stage::Merge, &table, supplemental, false).await
        }
        Command::Enrich { table, resume } => {
            let config = resolve_config(config_path)?;
            cmd_stage(&config, Stage::Enrich, &table, None, resume).await
        }
        Command::Crawl { table, resume } => {
            let config = resolve_config(config_path)?;
            cmd_stage(&config, Stage::Crawl, &table, None, resume).await
        }
        Command::Chunk {
            table,
            chunk_size,
            chunk_overlap,
        } => {
            let mut config = resolve_config(config_path)?;
            if let Some(size) = chunk_size {
                config.chunking.chunk_size = size;
            }
            if let Some(overlap) = chunk_overlap {
                config.chunking.chunk_overlap = overlap;
            }
            cmd_stage(&config, Stage::Chunk, &table, None, false).await
        }
        Command::Run { from, to, resume } => {
            let config = resolve_config(config_path)?;
            cmd_run(&config, PipelineOptions { from, to, resume }).await
        }
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_stage(
    config: &AppConfig,
    stage: Stage,
    table: &TableArgs,
    supplemental: Option<PathBuf>,
    resume: bool,
) -> Result<()> {
    let mut paths = StagePaths::for_stage(config, stage, resume);
    if let Some(input) = &table.input {
        paths.input = input.clone();
    }
    if let Some(output) = &table.output {
        paths.output = output.clone();
    }
    if let Some(supplemental) = supplemental {
        paths.supplemental = supplemental;
    }

    info!(%stage, input = %paths.input.display(), output = %paths.output.display(), "running stage");

    let reporter = CliProgress::new()?;
    let report = run_stage(config, stage, &paths, &reporter).await;
    reporter.finish();

    summarize(&[report?])
}

async fn cmd_run(config: &AppConfig, options: PipelineOptions) -> Result<()> {
    info!(from = %options.from, to = %options.to, resume = options.resume, "running pipeline");

    let reporter = CliProgress::new()?;
    let reports = run_pipeline(config, &options, &reporter).await;
    reporter.finish();

    summarize(&reports?)
}

/// Print one line per stage; an aborted stage makes the command fail.
fn summarize(reports: &[StageReport]) -> Result<()> {
    println!();
    for report in reports {
        println!("  {report}");
    }
    println!();

    match reports.iter().find_map(|r| r.aborted.as_ref().map(|a| (r.stage, a))) {
        Some((stage, abort)) => Err(eyre!(
            "{stage} stopped early ({}); progress saved to {}",
            abort.error,
            abort.checkpoint.display()
        )),
        None => Ok(()),
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Ok(Self { spinner })
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn record(&self, current: usize, total: usize, detail: &str) {
        self.spinner
            .set_message(format!("[{current}/{total}] {detail}"));
    }

    fn stage_done(&self, report: &StageReport) {
        self.spinner.println(format!("✓ {report}"));
    }
}
