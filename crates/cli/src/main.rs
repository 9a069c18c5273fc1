//! DocCheck CLI - Main Entry Point
//!
//! Loads configuration, resolves tests from local inputs or an external
//! source, executes them, and reports results. The process exit code
//! reflects whether anything reached FAIL; warnings and skips do not.

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use doccheck_common::config::Config;
use doccheck_engine::{api, load_inputs, report, resolve_tests, RunResult};

/// DocCheck - validate documentation by executing it
#[derive(Parser)]
#[command(name = "doccheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file path (defaults to .doccheck.{json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, resolve, and execute tests
    Run(RunArgs),

    /// Detect and resolve tests, printing the matrix without executing
    Detect(RunArgs),

    /// Show version information
    Version,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Input files or directories to scan
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// Output path for the result document
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent context executions: "true", "false", or a number
    #[arg(long)]
    concurrency: Option<String>,

    /// Execute steps marked unsafe
    #[arg(long)]
    allow_unsafe_steps: bool,

    /// Recurse into directories when scanning input
    #[arg(long)]
    recursive: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(cli.config.as_deref(), cli.verbose, args, true).await,
        Commands::Detect(args) => run(cli.config.as_deref(), cli.verbose, args, false).await,
        Commands::Version => {
            println!("doccheck {}", doccheck_common::VERSION);
            Ok(())
        }
    }
}

async fn run(
    config_path: Option<&std::path::Path>,
    verbose: bool,
    args: RunArgs,
    execute: bool,
) -> anyhow::Result<()> {
    let config = Config::load(config_path, overrides_from(&args))?;
    init_logging(verbose, &config.log_level);

    // Compile and self-check the schema registry before anything touches it.
    doccheck_schema::registry().verify_examples()?;

    let config_value = serde_json::to_value(&config)?;
    let outcome = doccheck_schema::validate("config_v3", &config_value, false)?;
    if !outcome.valid {
        anyhow::bail!("invalid configuration: {}", outcome.errors.unwrap_or_default());
    }

    let resolved = match gather_resolved_tests(&config).await? {
        Some(resolved) => resolved,
        None => {
            warn!("no tests to run");
            return Ok(());
        }
    };

    if !execute {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    let run = doccheck_engine::execute(&resolved).await?;

    let report_path = report::write_report(&run, &resolved.config.output)?;
    info!("report: {}", report_path.display());
    if let Some(reporting) = &resolved.config.integrations.reporting {
        if let Err(e) = report::post_report(&run, reporting).await {
            warn!("failed to post results: {e}");
        }
    }

    print_summary(&run);
    if run.failed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Resolve tests from the environment, the orchestration API, or local
/// detection, in that order.
async fn gather_resolved_tests(
    config: &Config,
) -> anyhow::Result<Option<doccheck_common::ResolvedTests>> {
    if let Some(resolved) = api::resolved_tests_from_env()? {
        return Ok(Some(resolved));
    }
    if let Some(orchestration) = &config.integrations.orchestration {
        return Ok(Some(api::fetch_resolved_tests(orchestration).await?));
    }

    let specs = load_inputs(config)?;
    Ok(resolve_tests(config, specs)?)
}

fn init_logging(verbose: bool, log_level: &str) {
    let level = if verbose { "debug" } else { log_level };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

/// CLI flags become the highest-precedence config overlay.
fn overrides_from(args: &RunArgs) -> Value {
    let mut overrides = serde_json::Map::new();
    if !args.input.is_empty() {
        overrides.insert("input".to_string(), json!(args.input));
    }
    if let Some(output) = &args.output {
        overrides.insert("output".to_string(), json!(output));
    }
    if let Some(concurrency) = &args.concurrency {
        let value = match concurrency.as_str() {
            "true" => json!(true),
            "false" => json!(false),
            other => match other.parse::<usize>() {
                Ok(n) => json!(n),
                Err(_) => json!(false),
            },
        };
        overrides.insert("concurrentRunners".to_string(), value);
    }
    if args.allow_unsafe_steps {
        overrides.insert("allowUnsafeSteps".to_string(), json!(true));
    }
    if let Some(recursive) = args.recursive {
        overrides.insert("recursive".to_string(), json!(recursive));
    }
    Value::Object(overrides)
}

fn print_summary(run: &RunResult) {
    let line = |label: &str, counts: &report::Counts| {
        println!(
            "{label:>9}: {} passed, {} failed, {} warnings, {} skipped",
            counts.pass, counts.fail, counts.warning, counts.skipped
        );
    };

    println!();
    println!("Result: {}", run.outcome);
    line("Specs", &run.summary.specs);
    line("Tests", &run.summary.tests);
    line("Contexts", &run.summary.contexts);
    line("Steps", &run.summary.steps);
}
