use std::process::ExitCode;
use tracing::{error, info};

mod cli;
mod crawler;
mod extract;
mod fetch;
mod storage;
mod utils;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse_args();

    let log_file = args.log_file.clone().unwrap_or_else(utils::default_log_file);
    if let Err(e) = utils::init_logging(args.verbose, Some(&log_file)) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting forum harvester v{}", env!("CARGO_PKG_VERSION"));

    match cli::process_command(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("Command failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
