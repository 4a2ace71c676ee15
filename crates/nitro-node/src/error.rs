//! Node errors.

use crate::config::ConfigError;
use nitro_engine::EngineError;
use thiserror::Error;

/// Errors from running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An engine stopped with a fatal error.
    #[error("engine failed: {0}")]
    Engine(#[from] EngineError),

    /// An engine task panicked or was aborted.
    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
