//! Tao TFTP engine
//!
//! A read-only TFTP server for network boot images: RFC 1350 transfers
//! with the option extension of RFC 2347 and the `blksize`, `tsize` and
//! `timeout` options of RFC 2348/2349.
//!
//! # Architecture
//!
//! ```text
//!   RRQ ──▶ TftpServer (port 69) ──spawn──▶ FileProvider::open
//!                                                 │
//!                                          negotiate options
//!                                                 │
//!                         TransferSession (ephemeral port): [OACK] DATA/ACK …
//! ```
//!
//! Write requests and stray DATA/ACK packets at the listener are answered
//! with ILLEGAL OPERATION.
//!
//! # Example
//!
//! ```ignore
//! use tao_tftp::{DirectoryFileProvider, TftpConfig, TftpServer};
//! use std::sync::Arc;
//!
//! let provider = Arc::new(DirectoryFileProvider::new("/srv/tftp"));
//! let server = TftpServer::bind(TftpConfig::default(), provider).await?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! ```

pub mod error;
pub mod packet;
pub mod provider;
pub mod server;
pub mod session;

pub use error::*;
pub use packet::*;
pub use provider::*;
pub use server::*;
pub use session::*;
