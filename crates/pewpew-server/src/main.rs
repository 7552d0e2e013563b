//! pewpew relay server.
//!
//! Loads `config.ron` (created on first run), applies `PORT` and CLI
//! overrides, and relays game events until Ctrl-C.
//!
//! Run with: `cargo run -p pewpew-server -- --port 5000`

use std::process::ExitCode;

use clap::Parser;
use pewpew_config::CliArgs;
use pewpew_server::{StartupError, build_server, load_config, serve};
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pewpew: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &CliArgs) -> Result<(), StartupError> {
    let config = load_config(args)?;
    pewpew_log::init_logging(&config.log)?;

    info!("pewpew relay {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Group '{}', max {} connections, id generator {:?}",
        config.relay.default_group, config.server.max_connections, config.relay.id_generator
    );

    let server = build_server(&config)?;
    let listener = server.bind().await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(&server, listener, shutdown_signal()).await?;
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for Ctrl-C, running until killed: {e}");
        std::future::pending::<()>().await;
    }
}
