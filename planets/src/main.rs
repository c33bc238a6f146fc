//! Planet test orchestration.
//!
//! Declares the `reqs`, `test` and `tidy` tasks and runs them in dependency
//! order from the current directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use planets::cli::{list_tasks, run_tasks};
use planets::engine::RunOptions;
use planets::io::config::{CONFIG_FILE_NAME, Settings, load_config};
use planets::{exit_codes, logging, tasks};

#[derive(Parser)]
#[command(
    name = "planets",
    version,
    about = "Run the planet test suite against planet-content configurations"
)]
struct Cli {
    /// Settings file, relative to the current directory. Missing means defaults.
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// 0 captures command output, 1 also prints stderr, 2 streams everything.
    #[arg(short, long, global = true, value_parser = clap::value_parser!(u8).range(0..=2))]
    verbosity: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run tasks (groups like `test` or single tasks like `test:mozilla`).
    Run {
        /// Tasks to run. Defaults to `default_tasks` from the config.
        tasks: Vec<String>,
        /// Keep running independent tasks after a failure.
        #[arg(long = "continue")]
        continue_on_failure: bool,
    },
    /// List task groups.
    List {
        /// Also clone the content repository and list every task.
        #[arg(long)]
        all: bool,
    },
    /// Check for required software (`run reqs`).
    Reqs,
    /// Run pytest once per planet (`run test`).
    Test,
    /// Remove untracked and ignored files (`run tidy`).
    Tidy,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    let config = load_config(&root.join(&cli.config))?;
    let settings = Settings::from_env(root, config)?;
    let shell = settings.shell();
    let stdout = std::io::stdout();

    let (names, continue_on_failure) = match cli.command {
        Command::List { all } => {
            list_tasks(&shell, &settings, all, stdout.lock())?;
            return Ok(exit_codes::OK);
        }
        Command::Run {
            tasks,
            continue_on_failure,
        } => (tasks, continue_on_failure),
        Command::Reqs => (vec![tasks::REQS.to_string()], false),
        Command::Test => (vec![tasks::TEST.to_string()], false),
        Command::Tidy => (vec![tasks::TIDY.to_string()], false),
    };
    let options = RunOptions {
        verbosity: cli.verbosity.unwrap_or(settings.config.verbosity),
        continue_on_failure,
    };
    run_tasks(&shell, &settings, &names, options, stdout.lock())
}
