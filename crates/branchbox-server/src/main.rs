use branchbox_core::{install_signal_handler, Config, Engine, StoreLock};
use branchbox_server::DEFAULT_WORKERS;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "branchbox-server", about = "Branchbox preview environment HTTP API")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8400)]
    port: u16,

    /// Handler threads sharing the accept queue.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// JSON config file; environment variables apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    install_signal_handler();

    let base_dir = config.base_dir.clone();
    let engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to start engine: {e}");
            std::process::exit(1);
        }
    };

    // One server per store root; a second instance fails fast instead of
    // fighting over records.
    let layout = branchbox_store::StoreLayout::new(&base_dir);
    let _lock = match StoreLock::try_acquire(&layout.lock_file()) {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            eprintln!("another branchbox-server owns {}", base_dir.display());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("store lock failed: {e}");
            std::process::exit(1);
        }
    };

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting branchbox-server on {addr}");
    info!("base directory: {}", base_dir.display());

    let engine = Arc::new(engine);
    branchbox_server::run_server(&engine, &addr, cli.workers);
}
