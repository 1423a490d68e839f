//! portfolio-server entry point

#![warn(clippy::all)]

use clap::Parser;
use portfolio_server::cli::Cli;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli.init_tracing();

    let shutdown = CancellationToken::new();
    portfolio_server::install_signal_handlers(&shutdown);

    if let Err(e) = portfolio_server::serve(cli.server_config(), shutdown).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}
