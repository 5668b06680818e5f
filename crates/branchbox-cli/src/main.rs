mod commands;

use branchbox_core::{install_signal_handler, Config, Engine};
use clap::{Parser, Subcommand};
use commands::EXIT_FAILURE;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "branchbox",
    version,
    about = "On-demand preview environments: branch in, public URL out"
)]
struct Cli {
    /// JSON config file; environment variables apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision a preview environment from a branch.
    Provision {
        /// Branch to build and expose.
        branch: String,
        /// Service kind, from the configured allow-list.
        #[arg(long, default_value = "web")]
        service: String,
        /// Minutes until the environment is garbage-collected.
        #[arg(long)]
        ttl_minutes: Option<i64>,
    },
    /// Destroy an environment and reclaim its resources.
    Destroy {
        /// Environment ID as returned by provision.
        env_id: String,
    },
    /// List all environments with time-to-expiry.
    List,
    /// Destroy every environment whose TTL has elapsed.
    Gc,
}

fn init_logging(verbose: bool, trace: bool) {
    let default_level = if trace {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.trace);
    install_signal_handler();

    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(commands::EXIT_INPUT_ERROR);
        }
    };

    let engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to open store: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let result = match &cli.command {
        Commands::Provision {
            branch,
            service,
            ttl_minutes,
        } => commands::provision::run(&engine, branch, service, *ttl_minutes, cli.json),
        Commands::Destroy { env_id } => commands::destroy::run(&engine, env_id, cli.json),
        Commands::List => commands::list::run(&engine, cli.json),
        Commands::Gc => commands::gc::run(&engine, cli.json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
