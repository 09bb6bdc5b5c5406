mod commands;

use clap::{Parser, Subcommand};
use commands::{Context, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "enmasse",
    version,
    about = "Import and export declarative integration configuration"
)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database (overrides the configuration file).
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply a document to the store.
    Import {
        /// Document to import.
        #[arg(short, long)]
        input: PathBuf,
        /// Skip included files that do not exist.
        #[arg(long, default_value_t = false)]
        ignore_missing_includes: bool,
        /// Exit successfully when the input file does not exist.
        #[arg(long, default_value_t = false)]
        exit_on_missing_file: bool,
        /// Seconds to wait for referenced objects that do not exist yet.
        #[arg(long)]
        missing_wait_time: Option<u64>,
        /// Load KEY=VALUE lines into the environment before importing.
        #[arg(long)]
        env_file: Option<PathBuf>,
        /// Print the sync report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write the current store contents to a document.
    Export {
        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("ENMASSE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: failed to install log subscriber: {e}");
        return;
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("warning: failed to forward log records: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = Context {
        config_path: cli.config,
        database: cli.database,
    };

    let result = match cli.command {
        Commands::Import {
            input,
            ignore_missing_includes,
            exit_on_missing_file,
            missing_wait_time,
            env_file,
            json,
        } => commands::import::run(
            &ctx,
            &commands::import::ImportArgs {
                input,
                ignore_missing_includes,
                exit_on_missing_file,
                missing_wait_time,
                env_file,
                json,
            },
        ),
        Commands::Export { output } => commands::export::run(&ctx, &output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
