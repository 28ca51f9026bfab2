//! Command-line argument parsing for the proxy.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Dimensions proxy command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "dimensions", about = "Multi-dimension game proxy")]
pub struct CliArgs {
    /// Interface to accept clients on.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to accept clients on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Dimension new clients join.
    #[arg(long)]
    pub default_dimension: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.listen.bind_address = bind.clone();
        }
        if let Some(port) = args.port {
            self.listen.port = port;
        }
        if let Some(ref name) = args.default_dimension {
            self.default_dimension = name.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            bind: Some("127.0.0.1".to_string()),
            port: Some(9999),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.listen.bind_address, "127.0.0.1");
        assert_eq!(config.listen.port, 9999);
        // Non-overridden fields retain defaults
        assert_eq!(config.default_dimension, "lobby");
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "dimensions",
            "--port",
            "8000",
            "--default-dimension",
            "arena",
            "--log-level",
            "debug",
            "--config",
            "/tmp/dims",
        ]);
        assert_eq!(args.port, Some(8000));
        assert_eq!(args.default_dimension.as_deref(), Some("arena"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/dims")));
        assert!(args.bind.is_none());
    }
}
