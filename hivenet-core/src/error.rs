//! Hivenet Error Types
//!
//! Errors surfaced synchronously by reactor operations. Failures that happen
//! later on a live connection are reported as events carrying a reason string.

use std::io;
use thiserror::Error;

/// Main error type for Hivenet operations
#[derive(Error, Debug)]
pub enum NetError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Reactor is at its connection cap
    #[error("too many connections (max: {max})")]
    Capacity { max: usize },

    /// Host name could not be resolved to any address
    #[error("resolve failed for {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// Send or receive buffer reached its configured maximum
    #[error("buffer overflow: {size} bytes (max: {max})")]
    BufferOverflow { size: usize, max: usize },

    /// Framing or handshake violation
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for Hivenet operations
pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = NetError::Capacity { max: 1 };
        assert_eq!(err.to_string(), "too many connections (max: 1)");
        let err = NetError::protocol("handshake mismatch");
        assert_eq!(err.to_string(), "protocol error: handshake mismatch");
    }

    #[test]
    fn test_buffer_overflow_reason() {
        let err = NetError::BufferOverflow { size: 8192, max: 4096 };
        assert_eq!(err.to_string(), "buffer overflow: 8192 bytes (max: 4096)");
    }

    #[test]
    fn test_io_conversion() {
        let err = NetError::from(io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(err, NetError::Io(ref e) if e.kind() == io::ErrorKind::AddrInUse));
    }
}
