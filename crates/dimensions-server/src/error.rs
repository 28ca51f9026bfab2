//! Server error types.

use dimensions_config::ConfigError;
use dimensions_proxy::DuplicateBackend;

/// Errors that stop the proxy from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Loading or validating the config failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Two dimensions share a name.
    #[error(transparent)]
    Directory(#[from] DuplicateBackend),

    /// The default dimension is not in the directory.
    #[error("unknown default dimension {0:?}")]
    UnknownDimension(String),

    /// Socket failure on the listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
