//! Configuration for the pewpew relay.
//!
//! Settings persist to disk as `config.ron`, are created with defaults on
//! first run, and can be overridden by the `PORT` environment variable and
//! then by command-line flags.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE, Config, IdGeneratorConfig, LogConfig, PORT_ENV, RelayConfig, ServerConfig,
    default_config_dir,
};
pub use error::ConfigError;
