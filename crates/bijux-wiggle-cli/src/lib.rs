// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

mod commands;
mod logging;
mod settings;

use bijux_wiggle_core::{ExitCode, MachineError};
use bijux_wiggle_engine::{EngineError, EngineErrorCode};
use bijux_wiggle_store::StoreError;
use clap::{error::ErrorKind, ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use logging::LogFlags;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;

const BIJUX_HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
Usage: {usage}

Options:
{options}

Commands:
{subcommands}
{after-help}";

#[derive(Parser)]
#[command(name = "bijux-wiggle", version)]
#[command(about = "Cached wiggletools computations dispatched to a batch cluster")]
#[command(help_template = BIJUX_HELP_TEMPLATE)]
#[command(
    after_help = "Environment:\n  BIJUX_LOG_LEVEL       Log filter override\n  BIJUX_WIGGLE_CONFIG   Configuration file\n  BIJUX_CACHE_DIR       Root of the default working directory"
)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,
    #[arg(long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[arg(long = "log-json", global = true, default_value_t = false)]
    log_json: bool,
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
    #[arg(long, short = 'd', global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a computation, reusing a cached result when one exists.
    Request(RequestArgs),
    /// Report the status or end result of a job.
    Result { id: i64 },
    /// Expire cache rows not accessed for the given number of days.
    Clean {
        #[arg(long, allow_negative_numbers = true)]
        days: i64,
    },
    /// Dump the cache table.
    Cache,
    /// Purge the given jobs, or every finished job.
    ClearCache { ids: Vec<i64> },
    /// List jobs, optionally restricted to the given ids.
    Jobs { ids: Vec<i64> },
    Datasets,
    /// Distinct values of every selectable attribute.
    Attributes,
    Annotations {
        #[arg(long, short = 'y')]
        assembly: String,
    },
    /// Append datasets from a tab-separated file.
    LoadDatasets { tsv: PathBuf },
    /// Register an assembly and its chromosome sizes file.
    LoadAssembly { name: String, chrom_sizes: PathBuf },
    /// Run one stage-1 task; the index defaults to the scheduler's array index.
    RunTask {
        #[arg(long)]
        tasks: PathBuf,
        #[arg(long)]
        index: Option<usize>,
    },
    /// Sign a job off once its compute stage has ended.
    Finish {
        #[arg(long)]
        context: PathBuf,
    },
    /// Print resolved configuration paths and settings.
    Config,
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
struct RequestArgs {
    /// attribute=value constraints selecting the left datasets.
    #[arg(short = 'a', num_args = 1.., required = true)]
    a: Vec<String>,
    /// Operator applied to the left datasets, e.g. `mean`.
    #[arg(long = "wa")]
    wa: String,
    /// attribute=value constraints selecting the right datasets.
    #[arg(short = 'b', num_args = 1..)]
    b: Vec<String>,
    #[arg(long = "wb")]
    wb: Option<String>,
    /// Merge operator combining both sides, e.g. `histogram 10`.
    #[arg(short = 'w', long = "merge")]
    merge: Option<String>,
    #[arg(long, short = 'y')]
    assembly: String,
    /// Keep the result out of age-based collection.
    #[arg(long, default_value_t = false)]
    remember: bool,
    #[arg(long = "email", short = 'e', num_args = 1..)]
    emails: Vec<String>,
    /// Print the planned commands without running anything.
    #[arg(long = "dry-run", default_value_t = false)]
    dry_run: bool,
}

#[derive(Clone, Copy)]
pub(crate) struct OutputMode {
    json: bool,
}

pub fn main_entry() -> ProcessExitCode {
    let wants_json = std::env::args().any(|arg| arg == "--json");
    match run() {
        Ok(()) => ProcessExitCode::from(ExitCode::Success as u8),
        Err(err) => {
            emit_error(&err, wants_json);
            ProcessExitCode::from(err.exit_code as u8)
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{err}");
                return Ok(());
            }
            _ => {
                return Err(CliError {
                    exit_code: ExitCode::Usage,
                    machine: MachineError::new("usage_error", "invalid command line arguments")
                        .with_detail("error", &err.to_string()),
                });
            }
        },
    };
    logging::init_tracing(LogFlags {
        quiet: cli.quiet,
        verbose: cli.verbose,
        json: cli.log_json,
    });
    let command = cli
        .command
        .ok_or_else(|| CliError::usage("missing command; see --help"))?;
    let ctx = commands::Context::new(
        cli.config.as_deref(),
        cli.db,
        OutputMode { json: cli.json },
    );

    match command {
        Commands::Request(args) => commands::request(&ctx, args),
        Commands::Result { id } => commands::result(&ctx, id),
        Commands::Clean { days } => commands::clean(&ctx, days),
        Commands::Cache => commands::cache(&ctx),
        Commands::ClearCache { ids } => commands::clear_cache(&ctx, &ids),
        Commands::Jobs { ids } => commands::jobs(&ctx, &ids),
        Commands::Datasets => commands::datasets(&ctx),
        Commands::Attributes => commands::attributes(&ctx),
        Commands::Annotations { assembly } => commands::annotations(&ctx, &assembly),
        Commands::LoadDatasets { tsv } => commands::load_datasets(&ctx, &tsv),
        Commands::LoadAssembly { name, chrom_sizes } => {
            commands::load_assembly(&ctx, &name, &chrom_sizes)
        }
        Commands::RunTask { tasks, index } => commands::run_task(&ctx, &tasks, index),
        Commands::Finish { context } => commands::finish(&ctx, &context),
        Commands::Config => commands::show_config(&ctx),
        Commands::Completion { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            generate(shell, &mut command, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

#[derive(Debug)]
pub(crate) struct CliError {
    exit_code: ExitCode,
    machine: MachineError,
}

impl CliError {
    fn new(exit_code: ExitCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            machine: MachineError::new(code, &message.into()),
        }
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::new(ExitCode::Usage, "usage_error", message)
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::new(ExitCode::Validation, "validation_error", message)
    }

    pub(crate) fn dependency(message: impl Into<String>) -> Self {
        Self::new(ExitCode::DependencyFailure, "dependency_failure", message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ExitCode::Internal, "internal_error", message)
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        let mapped = match err.code {
            EngineErrorCode::Validation => Self::validation(err.message),
            EngineErrorCode::NotFound => Self::new(ExitCode::Validation, "not_found", err.message),
            EngineErrorCode::Store | EngineErrorCode::Scheduler => Self::dependency(err.message),
            _ => Self::internal(err.message),
        };
        Self {
            machine: mapped.machine.with_detail("engine_code", err.code.as_str()),
            ..mapped
        }
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        EngineError::from(err).into()
    }
}

fn emit_error(error: &CliError, machine_json: bool) {
    if machine_json {
        match serde_json::to_string(&error.machine) {
            Ok(payload) => eprintln!("{payload}"),
            Err(_) => eprintln!(
                "{{\"code\":\"internal_error\",\"message\":\"failed to encode structured error\",\"details\":{{}}}}"
            ),
        }
    } else {
        eprintln!("{}", error.machine.message);
    }
}

pub(crate) fn emit_ok(output_mode: OutputMode, payload: Value) -> Result<(), CliError> {
    let rendered = if output_mode.json {
        serde_json::to_string(&payload)
    } else {
        serde_json::to_string_pretty(&payload)
    }
    .map_err(|e| CliError::internal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

pub(crate) fn to_payload<T: serde::Serialize>(value: &T) -> Result<Value, CliError> {
    serde_json::to_value(value).map_err(|e| CliError::internal(e.to_string()))
}
