//! Command-line arguments for the relay binary.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;
use crate::config::default_config_dir;

/// pewpew relay command-line arguments.
///
/// CLI values override both `config.ron` and the `PORT` environment
/// variable.
#[derive(Parser, Debug, Default)]
#[command(name = "pewpew", about = "Real-time relay for the pewpew game")]
pub struct CliArgs {
    /// IP address to bind.
    #[arg(long)]
    pub bind: Option<String>,

    /// TCP port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum concurrent connections.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level or filter (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    /// The directory `config.ron` is read from.
    pub fn config_dir(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_dir)
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.server.bind_address = bind.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(max) = args.max_connections {
            self.server.max_connections = max;
        }
        if let Some(ref level) = args.log_level {
            self.log.level = level.clone();
        }
    }
}
