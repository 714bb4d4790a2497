//! `groved` — daemon entrypoint.
//!
//! Runs the scheduler loop until signalled: instances are dispatched on
//! their own cadences and configuration is refreshed from the backend every
//! `GROVE_CONFIG_REFRESH` seconds. On SIGINT/SIGTERM, dispatch stops,
//! in-flight runs finish at their next batch boundary, and the process
//! exits once drained (or after the grace period).
//!
//! ```bash
//! GROVE_CONFIG_LOCAL_FILE_PATH=./configs groved
//! ```

use clap::Parser;
use tokio::sync::watch;

use grove_cli::{bootstrap, exit_code_for, init_logging, EXIT_SUCCESS};

/// Grove daemon — collect audit logs from SaaS services, continuously.
#[derive(Parser, Debug)]
#[command(name = "groved")]
#[command(about = "Run the Grove scheduler until signalled")]
#[command(version)]
struct Cli {}

#[tokio::main]
async fn main() {
    let _cli = Cli::parse();
    init_logging();
    tracing::info!("Grove daemon started");

    let bootstrap = match bootstrap("groved") {
        Ok(bootstrap) => bootstrap,
        Err(err) => {
            tracing::error!("Failed to initialise handlers: {}", err);
            std::process::exit(exit_code_for(&err));
        }
    };

    // Translate SIGINT/SIGTERM into the scheduler's stop channel.
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    let code = match bootstrap.scheduler.daemon(bootstrap.source, stop_rx).await {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => {
            tracing::error!("Scheduler stopped abnormally: {}", err);
            exit_code_for(&err)
        }
    };

    std::process::exit(code);
}
