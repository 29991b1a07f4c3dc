use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use finpilot::api::Cli;

fn main() {
    let cli = Cli::parse();

    // RUST_LOG > --verbose > info
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    if let Err(e) = finpilot::api::run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
