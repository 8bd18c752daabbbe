//! Error types for the TFTP engine
//!
//! [`DecodeError`] covers malformed datagrams. [`TftpError`] covers
//! everything that can end a request or a transfer, and knows which
//! TFTP error code to put on the wire for it.

use crate::packet::{ErrorCode, Opcode};
use std::net::SocketAddr;
use thiserror::Error;

/// Failure while decoding a TFTP datagram
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than the opcode's fixed fields need
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },

    /// Opcode outside 1..=6
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// Request without a filename
    #[error("missing filename")]
    MissingFilename,

    /// RRQ mode other than octet, netascii or mail
    #[error("unknown transfer mode {0:?}")]
    UnknownMode(String),

    /// A string field was not NUL-terminated
    #[error("unterminated string field")]
    Unterminated,
}

/// Error type for TFTP operations
#[derive(Debug, Error)]
pub enum TftpError {
    /// Failed to bind to socket
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Malformed datagram
    #[error("invalid TFTP packet: {0}")]
    Decode(#[from] DecodeError),

    /// Opcode not valid here (WRQ, or a DATA/ACK sent to the listener)
    #[error("illegal operation: {0:?}")]
    IllegalOperation(Opcode),

    /// File missing, not a regular file, or outside the served directory
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Reading the file failed mid-transfer
    #[error("failed to read {filename}: {source}")]
    ReadFailed {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Option value we will not accept
    #[error("options refused: {0}")]
    OptionsRefused(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client stopped answering
    #[error("transfer timeout for {filename}")]
    Timeout { filename: String },

    /// Transfer aborted by client
    #[error("transfer aborted: {reason}")]
    Aborted { reason: String },
}

impl TftpError {
    /// Error code sent to the client, if this error warrants an ERROR packet
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            TftpError::Decode(_) | TftpError::IllegalOperation(_) => {
                Some(ErrorCode::IllegalOperation)
            }
            TftpError::FileNotFound(_) => Some(ErrorCode::FileNotFound),
            TftpError::ReadFailed { .. } => Some(ErrorCode::AccessViolation),
            TftpError::OptionsRefused(_) => Some(ErrorCode::OptionsRefused),
            TftpError::BindFailed { .. }
            | TftpError::IoError(_)
            | TftpError::Timeout { .. }
            | TftpError::Aborted { .. } => None,
        }
    }
}

/// Result type for TFTP operations
pub type Result<T> = std::result::Result<T, TftpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_error_display() {
        let err = TftpError::FileNotFound("pxelinux.0".to_string());
        assert_eq!(err.to_string(), "file not found: pxelinux.0");

        let err = TftpError::from(DecodeError::UnknownOpcode(9));
        assert_eq!(err.to_string(), "invalid TFTP packet: unknown opcode 9");

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 69);
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = TftpError::BindFailed {
            addr,
            source: io_err,
        };
        assert!(err.to_string().contains("failed to bind"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TftpError::FileNotFound("x".to_string()).error_code(),
            Some(ErrorCode::FileNotFound)
        );
        assert_eq!(
            TftpError::ReadFailed {
                filename: "x".to_string(),
                source: std::io::Error::other("disk"),
            }
            .error_code(),
            Some(ErrorCode::AccessViolation)
        );
        assert_eq!(
            TftpError::OptionsRefused("blksize".to_string()).error_code(),
            Some(ErrorCode::OptionsRefused)
        );
        assert_eq!(
            TftpError::IllegalOperation(Opcode::Wrq).error_code(),
            Some(ErrorCode::IllegalOperation)
        );
        assert_eq!(
            TftpError::Timeout {
                filename: "x".to_string()
            }
            .error_code(),
            None
        );
    }
}
