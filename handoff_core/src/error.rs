//! Error type for the exchange layer
//!
//! Every failure is a contract violation or resource exhaustion surfaced to
//! the caller as-is; nothing here is retried internally.

use handoff_types::{Device, LayoutError};
use thiserror::Error;

/// Main error type for handoff operations
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Memory could not be obtained, or the request exceeds addressable size
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// A shape, stride or view does not fit the memory it describes
    #[error("Shape error: {0}")]
    Shape(String),

    /// Consumer expected memory on another device; no implicit copy is made
    #[error("Device mismatch: consumer accepts {expected}, tensor lives on {actual}")]
    DeviceMismatch { expected: String, actual: Device },

    /// Capsule ownership was already transferred
    #[error("Capsule already consumed")]
    AlreadyConsumed,

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Typed access with the wrong element type
    #[error("Dtype mismatch: buffer holds {actual}, requested {requested}")]
    DtypeMismatch {
        actual: handoff_types::DType,
        requested: handoff_types::DType,
    },

    #[error("Unsupported data type: code={code}, bits={bits}, lanes={lanes}")]
    UnsupportedDtype { code: u8, bits: u8, lanes: u16 },

    #[error("Unsupported device type: {0}")]
    UnsupportedDevice(i32),

    #[error("Unsupported DLPack version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    /// Malformed foreign tensor (null pointers, negative dimensions, ...)
    #[error("Invalid tensor: {0}")]
    InvalidTensor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using HandoffError
pub type HandoffResult<T> = std::result::Result<T, HandoffError>;

/// Short alias, `Result<T>` is equivalent to `HandoffResult<T>`
pub type Result<T> = HandoffResult<T>;

impl From<LayoutError> for HandoffError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::Overflow(shape) => HandoffError::Allocation(format!(
                "shape {:?} overflows the addressable size",
                shape
            )),
            other => HandoffError::Shape(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for HandoffError {
    fn from(err: toml::de::Error) -> Self {
        HandoffError::Config(format!("TOML parse error: {}", err))
    }
}

// Helper methods
impl HandoffError {
    pub fn allocation<S: Into<String>>(msg: S) -> Self {
        HandoffError::Allocation(msg.into())
    }

    pub fn shape<S: Into<String>>(msg: S) -> Self {
        HandoffError::Shape(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        HandoffError::Config(msg.into())
    }

    pub fn invalid_tensor<S: Into<String>>(msg: S) -> Self {
        HandoffError::InvalidTensor(msg.into())
    }
}
