use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::adapters::Adapters;
use crate::config::{Plan, Settings};
use crate::errors::default_error_handler;
use crate::executor::Executor;
use crate::formatter::{Formatter, StandardFormatter};
use crate::progress::RunFinished;
use crate::reporter::Reporter;

#[derive(Parser)]
#[command(
    name = "panoptic",
    about = "Declarative, multi-platform UI test automation engine",
    long_about = None,
    author,
    version,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan against its target applications and emit a report.
    Run(RunArgs),
    /// Generate shell completion scripts.
    Completions { shell: Shell },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the plan document (YAML or JSON).
    plan_file: PathBuf,
    /// Overrides `Plan.output`.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Raises log verbosity to debug.
    #[arg(long)]
    verbose: bool,
    /// Global configuration file, merged underneath the plan's settings.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Exit codes, §6: 0 clean, 1 config error, 2 output-directory failure,
/// 3 cancellation, 4 report-emission failure.
mod exit_code {
    pub const OK: u8 = 0;
    pub const CONFIG_ERROR: u8 = 1;
    pub const OUTPUT_FAILURE: u8 = 2;
    pub const CANCELLED: u8 = 3;
    pub const REPORT_FAILURE: u8 = 4;
}

impl Cli {
    pub async fn run() -> ExitCode {
        let cli = Cli::parse();
        simple_logger::SimpleLogger::new()
            .env()
            .with_level(cli.verbose.log_level_filter())
            .init()
            .unwrap();

        match cli.command {
            Some(Commands::Run(args)) => run_plan(args).await,
            Some(Commands::Completions { shell }) => {
                let mut cmd = Cli::command();
                let name = cmd.get_name().to_string();
                clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
                ExitCode::from(exit_code::OK)
            }
            None => ExitCode::from(exit_code::OK),
        }
    }
}

async fn run_plan(args: RunArgs) -> ExitCode {
    let mut plan = match Plan::load(&args.plan_file) {
        Ok(plan) => plan,
        Err(error) => {
            default_error_handler(error.into(), &mut std::io::stderr());
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    if let Some(config_path) = &args.config {
        match load_global_settings(config_path) {
            Ok(global) => plan.settings = plan.settings.clone().merged_over(global),
            Err(error) => {
                default_error_handler(error, &mut std::io::stderr());
                return ExitCode::from(exit_code::CONFIG_ERROR);
            }
        }
    }

    if args.verbose {
        log::set_max_level(log::LevelFilter::Debug);
    }

    let output = args.output.clone().unwrap_or_else(|| plan.output.clone());

    let formatter = StandardFormatter::new(plan.applications.len() as u32);
    let executor = match Executor::bootstrap(&plan, &output, &formatter).await {
        Ok(executor) => executor.with_adapters(Adapters::default()),
        Err(error) => {
            default_error_handler(error.into(), &mut std::io::stderr());
            return ExitCode::from(exit_code::OUTPUT_FAILURE);
        }
    };

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested, finishing the current application before stopping");
            ctrl_c_token.cancel();
        }
    });

    let results = executor.run(&token).await;
    let cancelled = token.is_cancelled();

    let summary = crate::reporter::ReportSummary::from_results(&results);
    formatter.message(
        &RunFinished {
            total: summary.total,
            passed: summary.passed,
            failed: summary.failed,
            report_path: executor.artifact_store().report_json_path().display().to_string(),
        }
        .to_string(),
    );

    if let Err(error) = Reporter::write(
        &results,
        &executor.artifact_store().report_json_path(),
        &executor.artifact_store().report_html_path(),
    )
    .await
    {
        default_error_handler(error.into(), &mut std::io::stderr());
        return ExitCode::from(exit_code::REPORT_FAILURE);
    }

    if cancelled {
        ExitCode::from(exit_code::CANCELLED)
    } else {
        ExitCode::from(exit_code::OK)
    }
}

fn load_global_settings(path: &std::path::Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path)?;
    let settings: Settings = serde_yaml::from_str(&text)?;
    Ok(settings)
}
