use clap::Parser;
use tracing::error;

use traffic_limitd::config::DaemonConfig;
use traffic_limitd::startup;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    startup::init_logging();

    let config = DaemonConfig::parse();

    match startup::run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::ExitCode::FAILURE
        }
    }
}
