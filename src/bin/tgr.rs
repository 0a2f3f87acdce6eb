//! `tgr` entry point: parses CLI arguments, initializes tracing, dispatches to
//! `tablegraph::cli::run`, and maps the result to the exit codes spec §7 prescribes.

use clap::Parser;
use tablegraph::cli::{Cli, exit_code_for, run};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(exit_code_for(&err));
    }
}
