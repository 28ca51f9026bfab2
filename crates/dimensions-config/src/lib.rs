//! Configuration for the Dimensions proxy.
//!
//! Settings persist to disk as a RON file, can be overridden from the command
//! line via clap, and are validated before the proxy starts.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE, CommandConfig, Config, DebugConfig, DimensionConfig, ListenConfig,
    default_config_dir,
};
pub use error::ConfigError;
