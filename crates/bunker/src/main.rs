use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

mod app;

fn main() -> ExitCode {
    let cli = app::Cli::parse();
    app::init_tracing();
    info!("=== Bunker Startup ===");

    match app::build_app(cli) {
        Ok(wiring) => app::run(wiring),
        Err(err) => {
            error!(error = %err, "startup_failed");
            ExitCode::FAILURE
        }
    }
}
