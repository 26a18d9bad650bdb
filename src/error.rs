use std::fmt;

use thiserror::Error;

use crate::driver::ErrorCode;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to allocate {size} bytes with alignment {alignment}")]
    AllocationError { size: usize, alignment: usize },

    #[error("Buffer too small: got {actual} bytes, {required} bytes required")]
    BufferTooSmall { actual: usize, required: usize },

    #[error("Frame capturing on device '{device}' (stream {stream}) timed out")]
    CaptureTimeout { device: String, stream: String },

    #[error("Device access error [{device}, stream {stream}]: {reason} ({code})")]
    DeviceAccess {
        device: String,
        stream: String,
        code: ErrorCode,
        reason: String,
    },

    #[error("System not ready: driver accessed outside of system context")]
    SystemNotStarted,

    #[error("Stream of device '{device}' is already streaming")]
    AlreadyStreaming { device: String },

    #[error("Operation requires the stream to be acquiring")]
    NotAcquiring,

    #[error("Frame handler '{handler}' failed: {source}")]
    Handler {
        handler: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Multiple errors during transition: {0}")]
    Transition(TransitionErrors),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Classify a native status code returned for an operation on `device`/`stream`.
    pub fn from_native(device: &str, stream: impl fmt::Display, code: ErrorCode) -> Self {
        let stream = stream.to_string();
        let reason = match code {
            ErrorCode::Timeout => {
                return CaptureError::CaptureTimeout {
                    device: device.to_string(),
                    stream,
                }
            }
            ErrorCode::ApiNotStarted => return CaptureError::SystemNotStarted,
            ErrorCode::DeviceNotOpen => "device accessed outside of context",
            ErrorCode::BadHandle => "invalid handle, device might be disconnected",
            ErrorCode::InvalidAccess => "invalid access mode",
            ErrorCode::InUse => "device is in use",
            _ => "native call failed",
        };
        CaptureError::DeviceAccess {
            device: device.to_string(),
            stream,
            code,
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may simply retry the operation
    pub fn is_timeout(&self) -> bool {
        matches!(self, CaptureError::CaptureTimeout { .. })
    }
}

/// Failures collected while walking the capture state ladder.
///
/// Errors are kept in the order they were collected. No caller should rely on
/// a particular kind sitting at a particular position.
#[derive(Debug, Default)]
pub struct TransitionErrors(Vec<CaptureError>);

impl TransitionErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CaptureError) {
        self.0.push(err);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CaptureError> {
        self.0.iter()
    }

    /// Collapse into a single result: none is success, one is raised as-is,
    /// several become [`CaptureError::Transition`].
    pub fn into_result(mut self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(CaptureError::Transition(self)),
        }
    }
}

impl fmt::Display for TransitionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, "]")
    }
}

impl IntoIterator for TransitionErrors {
    type Item = CaptureError;
    type IntoIter = std::vec::IntoIter<CaptureError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CaptureError>;
