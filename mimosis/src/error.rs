/*!
Common error types for the register access layer.
*/

use crate::block::RegisterBlock;
use thiserror::Error;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, ChipError>;

/// Error type for all chip operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChipError {
    /// An argument is outside the range the protocol can encode
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unsupported register block, or no data to write and no loaded fallback
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller buffer does not match the fixed block size
    #[error("Buffer size mismatch for {block}: expected {expected} bytes, got {actual}")]
    Size {
        block: RegisterBlock,
        expected: usize,
        actual: usize,
    },

    /// The simulated device was read through an unexpected command
    #[error("Protocol mismatch: unexpected header 0x{header:02X} on read")]
    ProtocolMismatch { header: u8 },

    /// Failure reported by the underlying byte transport
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ChipError {
    /// Create a new invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
