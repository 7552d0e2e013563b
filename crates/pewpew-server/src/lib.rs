//! Wiring for the `pewpew` binary: turns a [`Config`] into a serving
//! [`RelayServer`].

use std::future::Future;
use std::net::AddrParseError;
use std::sync::Arc;
use std::time::Duration;

use pewpew_config::{CliArgs, Config, ConfigError, IdGeneratorConfig, RelayConfig};
use pewpew_log::TryInitError;
use pewpew_net::{FrameConfig, RelayServer, ServerConfig, SocketConfig, resolve_bind_address};
use pewpew_relay::{CommandGenerator, IdentityGenerator, RelayOptions, UuidGenerator};
use tokio::net::TcpListener;

/// How long open connections get to close after a shutdown request.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that stop the relay from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Config could not be loaded or overridden.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A global subscriber was already installed.
    #[error("failed to initialise logging: {0}")]
    Logging(#[from] TryInitError),

    /// `server.bind_address` is not an IP address.
    #[error("invalid bind address {address:?}: {source}")]
    BindAddress {
        /// Configured value.
        address: String,
        /// Parse failure.
        #[source]
        source: AddrParseError,
    },

    /// An empty `Command` id generator.
    #[error("id generator command is empty")]
    EmptyCommand,

    /// Socket error while binding or serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load `config.ron` (creating it on first run), then apply the `PORT`
/// environment variable and the command-line flags, in that order.
pub fn load_config(args: &CliArgs) -> Result<Config, ConfigError> {
    let mut config = Config::load_or_create(&args.config_dir())?;
    config.apply_env_overrides()?;
    config.apply_cli_overrides(args);
    Ok(config)
}

/// Transport settings from the `server` section.
pub fn server_config(config: &pewpew_config::ServerConfig) -> Result<ServerConfig, StartupError> {
    let bind_addr = resolve_bind_address(&config.bind_address, config.port).map_err(|source| {
        StartupError::BindAddress {
            address: config.bind_address.clone(),
            source,
        }
    })?;
    Ok(ServerConfig {
        bind_addr,
        max_connections: config.max_connections,
        outbound_queue: config.outbound_queue,
        frame: FrameConfig {
            max_payload_size: config.max_frame_size,
        },
        socket: SocketConfig {
            tcp_nodelay: config.tcp_nodelay,
            ..SocketConfig::default()
        },
    })
}

/// Session core settings from the `relay` section.
pub fn relay_options(config: &RelayConfig) -> RelayOptions {
    RelayOptions {
        default_group: config.default_group.clone(),
        require_registration: config.require_registration,
    }
}

/// The configured player id source. `Command` values are split on
/// whitespace into a program and its arguments.
pub fn id_generator(config: &IdGeneratorConfig) -> Result<Arc<dyn IdentityGenerator>, StartupError> {
    match config {
        IdGeneratorConfig::Uuid => Ok(Arc::new(UuidGenerator)),
        IdGeneratorConfig::Command(command) => {
            let mut words = command.split_whitespace();
            let program = words.next().ok_or(StartupError::EmptyCommand)?;
            let generator = words.fold(CommandGenerator::new(program), |generator, word| {
                generator.arg(word)
            });
            Ok(Arc::new(generator))
        }
    }
}

/// Build the relay and its TCP server from a full config.
pub fn build_server(config: &Config) -> Result<RelayServer, StartupError> {
    Ok(RelayServer::new(
        server_config(&config.server)?,
        id_generator(&config.relay.id_generator)?,
        relay_options(&config.relay),
    ))
}

/// Serve on `listener` until `shutdown` completes, then stop accepting and
/// give open connections up to [`DRAIN_TIMEOUT`] to close.
pub async fn serve<F>(server: &RelayServer, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let run = server.run_with_listener(listener);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        () = shutdown => {
            tracing::info!("Shutdown requested");
            server.shutdown();
        }
    }
    run.await?;

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !server.connections.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            "{} connections still open after {DRAIN_TIMEOUT:?}",
            server.connections.len()
        );
    }
    Ok(())
}
