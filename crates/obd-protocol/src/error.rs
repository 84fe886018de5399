//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObdError {
    /// Device unreachable or socket setup failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Read or write failed mid-session
    #[error("I/O error: {0}")]
    Io(String),

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// No transport link is attached
    #[error("OBD adapter not connected")]
    NotConnected,

    /// Invalid response from adapter
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No prompt arrived before the frame size limit; `raw` holds what did
    #[error("No prompt within {limit} bytes")]
    FrameTooLong { limit: usize, raw: String },

    /// Command name not present in the catalog
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl ObdError {
    /// Whether this error counts toward link failure escalation
    pub fn is_io(&self) -> bool {
        matches!(self, ObdError::Io(_) | ObdError::Serial(_))
    }

    /// Response text received before the error, if any
    pub fn raw(&self) -> Option<&str> {
        match self {
            ObdError::FrameTooLong { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::Serial(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        assert!(ObdError::Io("broken pipe".into()).is_io());
        assert!(ObdError::Serial("gone".into()).is_io());
        assert!(!ObdError::Timeout(2000).is_io());
        assert!(!ObdError::NotConnected.is_io());
    }

    #[test]
    fn test_from_io_error() {
        let err: ObdError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err, ObdError::Io("pipe".to_string()));
    }
}
