//! `grove` — one-shot entrypoint.
//!
//! Runs every configured connector instance exactly once, waits for all of
//! them, and exits. Intended for scheduled execution environments (cron,
//! serverless timers, CI).
//!
//! ```bash
//! GROVE_CONFIG_LOCAL_FILE_PATH=./configs grove
//! ```

use clap::Parser;

use grove_cli::{
    bootstrap, exit_code_for, init_logging, EXIT_INSTANCE_FAILED, EXIT_NO_INSTANCES,
    EXIT_SUCCESS,
};

/// Grove — collect audit logs from SaaS services, once.
#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(about = "Run every configured Grove connector instance once and exit")]
#[command(version)]
struct Cli {}

#[tokio::main]
async fn main() {
    let _cli = Cli::parse();
    init_logging();
    tracing::info!("Grove started");

    let bootstrap = match bootstrap("grove") {
        Ok(bootstrap) => bootstrap,
        Err(err) => {
            tracing::error!("Failed to initialise handlers: {}", err);
            std::process::exit(exit_code_for(&err));
        }
    };

    let code = match bootstrap.scheduler.one_shot(&bootstrap.source).await {
        Ok(report) if report.instances == 0 => {
            tracing::error!("No connector instances could be loaded from configuration");
            EXIT_NO_INSTANCES
        }
        Ok(report) if report.fatal > 0 => {
            tracing::error!(
                "{} of {} connector instances failed",
                report.fatal,
                report.instances
            );
            EXIT_INSTANCE_FAILED
        }
        Ok(_) => {
            tracing::info!("Grove execution has finished");
            EXIT_SUCCESS
        }
        Err(err) => {
            tracing::error!("Grove execution failed: {}", err);
            exit_code_for(&err)
        }
    };

    std::process::exit(code);
}
