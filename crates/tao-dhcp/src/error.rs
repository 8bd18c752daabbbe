//! Error types for the DHCP engine
//!
//! Codec failures are split into [`DecodeError`] (inbound datagrams) and
//! [`EncodeError`] (reply construction). Allocation failures surface as
//! [`LeaseError`]. All of them fold into [`DhcpError`].

use ipnetwork::Ipv4Network;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure while decoding an inbound DHCP datagram
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Datagram shorter than the fixed header plus magic cookie
    #[error("packet too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },

    /// Bytes 236..240 are not 99.130.83.99
    #[error("invalid magic cookie {0:?}")]
    BadMagicCookie([u8; 4]),

    /// Option region ended without an End option, or an option was truncated
    #[error("malformed options: {0}")]
    MalformedOptions(String),
}

/// Failure while encoding a DHCP reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Destination buffer cannot hold the header, options, End and padding
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Option value longer than the one-byte length field allows
    #[error("option {code} value is {len} bytes (maximum 255)")]
    OptionTooLong { code: u8, len: usize },

    /// Value does not fit the fixed-width header field
    #[error("{field} field value is {len} bytes (maximum {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Failure while allocating from the lease table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// Every address in the range has been handed out
    #[error("lease range {range} exhausted ({capacity} addresses allocated)")]
    Exhausted { range: Ipv4Network, capacity: u64 },
}

/// Error type for DHCP operations
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Failed to bind to socket
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Failed to decode an inbound packet
    #[error("failed to decode DHCP packet: {0}")]
    Decode(#[from] DecodeError),

    /// Failed to encode a reply
    #[error("failed to encode DHCP packet: {0}")]
    Encode(#[from] EncodeError),

    /// Lease allocation failed
    #[error("lease allocation failed: {0}")]
    Lease(#[from] LeaseError),

    /// Socket send error
    #[error("failed to send packet: {0}")]
    SendError(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Result type for DHCP operations
pub type Result<T> = std::result::Result<T, DhcpError>;
