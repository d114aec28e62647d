use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("controller is not running")]
    NotRunning,
    #[error("controller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
