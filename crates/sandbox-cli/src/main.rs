//! SQL sandbox command-line interface.
//!
//! # Usage
//!
//! ```bash
//! # Run a setup script for a session
//! sqlsandbox exec -f setup.sql --session alice_1 --mode setup
//!
//! # Run one statement
//! sqlsandbox exec -c "SELECT * FROM employees" --session alice_1
//!
//! # Validate a query without side effects
//! sqlsandbox validate -c "SELECT * FROM alice_1_employees"
//!
//! # Show how a script is split or namespaced
//! sqlsandbox split -f setup.sql
//! sqlsandbox rewrite --session alice_1 -f setup.sql
//!
//! # Output as JSON
//! sqlsandbox -o json exec -c "SELECT 1"
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod formatter;

use commands::SessionArg;
use formatter::OutputFormat;
use sandbox_engine::{BackendKind, ExecutionMode, SandboxConfig};

/// SQL sandbox command-line interface
#[derive(Parser, Debug)]
#[command(
    name = "sqlsandbox",
    version,
    about = "Run SQL scripts in per-session namespaces",
    long_about = "Run SQL scripts against a shared database, with each session's objects\n\
                  kept apart by a name prefix. Scripts run either statement by statement\n\
                  (adhoc) or all-or-nothing in one transaction (setup)."
)]
struct Args {
    /// Configuration file path
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database backend
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendArg>,

    /// SQLite file path or PostgreSQL URL
    #[arg(long, value_name = "URL", global = true)]
    database_url: Option<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "table", global = true)]
    output: OutputFormatArg,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a script
    Exec {
        #[command(flatten)]
        input: InputArgs,

        /// Session identifier; object names get its token as a prefix
        #[arg(short = 's', long, conflicts_with = "user")]
        session: Option<String>,

        /// Start a fresh `<user>_<timestamp>` session
        #[arg(short = 'u', long)]
        user: Option<String>,

        /// Execution mode
        #[arg(short = 'm', long, value_enum, default_value = "adhoc")]
        mode: ModeArg,
    },

    /// Validate a query without changing the database
    Validate {
        #[command(flatten)]
        input: InputArgs,

        /// Check syntax locally without connecting
        #[arg(long)]
        offline: bool,
    },

    /// Show how a script is split into statements
    Split {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Show a script rewritten into a session namespace
    Rewrite {
        #[command(flatten)]
        input: InputArgs,

        /// Session identifier
        #[arg(short = 's', long)]
        session: String,
    },
}

/// Script source. Reads standard input when neither is given.
#[derive(ClapArgs, Debug)]
struct InputArgs {
    /// SQL text
    #[arg(short = 'c', long, conflicts_with = "file")]
    command: Option<String>,

    /// SQL file
    #[arg(short = 'f', long, value_name = "FILE")]
    file: Option<PathBuf>,
}

impl InputArgs {
    fn read(&self) -> Result<String> {
        if let Some(sql) = &self.command {
            return Ok(sql.clone());
        }
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()));
        }
        let mut sql = String::new();
        std::io::stdin()
            .read_to_string(&mut sql)
            .context("failed to read standard input")?;
        Ok(sql)
    }
}

/// Output format argument
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    /// Display results in a formatted table
    Table,
    /// Display results as JSON
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Sqlite,
    Postgres,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sqlite => BackendKind::Sqlite,
            BackendArg::Postgres => BackendKind::Postgres,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Run every statement; failures do not stop the script
    Adhoc,
    /// Run in one transaction; roll back on the first failure
    Setup,
}

impl From<ModeArg> for ExecutionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Adhoc => ExecutionMode::Adhoc,
            ModeArg::Setup => ExecutionMode::Setup,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool> {
    let args = Args::parse();

    init_logging(args.verbose);

    let config = load_config(&args)?;
    let format: OutputFormat = args.output.into();

    let output = match &args.command {
        Command::Exec {
            input,
            session,
            user,
            mode,
        } => {
            let session = match (session, user) {
                (Some(id), _) => SessionArg::Id(id.clone()),
                (None, Some(user)) => SessionArg::User(user.clone()),
                (None, None) => SessionArg::None,
            };
            commands::exec(config, &input.read()?, session, (*mode).into(), format).await?
        }
        Command::Validate { input, offline } => {
            commands::validate(config, &input.read()?, *offline, format).await?
        }
        Command::Split { input } => commands::split(config, &input.read()?, format)?,
        Command::Rewrite { input, session } => {
            commands::rewrite(config, &input.read()?, session, format)?
        }
    };

    print!("{}", output.text);
    if !output.text.ends_with('\n') {
        println!();
    }
    Ok(output.success)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("sqlsandbox=debug,sandbox_engine=debug,sandbox_client=debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load_config(args: &Args) -> Result<SandboxConfig> {
    // File, then SANDBOX_* variables, then flags
    let mut config = SandboxConfig::load(args.config.as_deref())?;

    if let Some(backend) = args.backend {
        config.backend = backend.into();
    }
    if let Some(url) = &args.database_url {
        config.database_url = Some(url.clone());
    }

    Ok(config)
}
