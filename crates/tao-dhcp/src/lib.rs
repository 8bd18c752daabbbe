//! Tao DHCP engine
//!
//! Answers DHCP DISCOVER and REQUEST messages with addresses from a
//! sequential lease table, and points PXE clients at the boot server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 DhcpServer                          │
//! │   UDP listener, one task per datagram               │
//! │                       │                             │
//! │                       ▼                             │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │         Message codec                         │  │
//! │  │   BOOTP header | magic cookie | TLV options   │  │
//! │  └───────────────────────────────────────────────┘  │
//! │                       │                             │
//! │                       ▼                             │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │         handle_message                        │  │
//! │  │   DISCOVER → OFFER | REQUEST → ACK            │  │
//! │  │   LeaseTable: MAC → IPv4                      │  │
//! │  └───────────────────────────────────────────────┘  │
//! │                       │                             │
//! │                       ▼                             │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │         DhcpEvent stream                      │  │
//! │  │   Request | Response | Error                  │  │
//! │  └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tao_dhcp::{DhcpConfig, DhcpServer, LeaseTable};
//! use std::net::Ipv4Addr;
//!
//! let range = "10.0.1.100/24".parse()?;
//! let config = DhcpConfig::new(Ipv4Addr::new(10, 0, 1, 1), range)
//!     .with_router(Ipv4Addr::new(10, 0, 1, 254))
//!     .with_boot_filename("pxelinux.0");
//!
//! let server = DhcpServer::bind(config, LeaseTable::new(range).shared()).await?;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! ```

pub mod config;
pub mod error;
pub mod lease;
pub mod options;
pub mod packet;
pub mod server;

pub use config::*;
pub use error::*;
pub use lease::*;
pub use options::*;
pub use packet::*;
pub use server::*;
