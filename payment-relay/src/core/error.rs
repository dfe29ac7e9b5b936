use shared::CodecError;
use thiserror::Error;

use crate::broker::BrokerError;

/// All broker bootstrap attempts failed
#[derive(Debug, Error)]
#[error("Broker bootstrap failed after {attempts} attempt(s): {last_error}")]
pub struct BootstrapError {
    pub attempts: u32,
    pub last_error: BrokerError,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Relay 操作的 Result 类型别名
pub type RelayResult<T> = Result<T, RelayError>;
