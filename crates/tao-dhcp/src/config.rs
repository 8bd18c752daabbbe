//! DHCP engine configuration
//!
//! Everything the session handler needs is carried here and handed to
//! [`DhcpServer::bind`](crate::DhcpServer::bind); the engine keeps no
//! module-level state.

use crate::error::{DhcpError, Result};
use ipnetwork::Ipv4Network;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Port the server listens on
pub const SERVER_PORT: u16 = 67;

/// Port clients listen on
pub const CLIENT_PORT: u16 = 68;

/// Lease duration advertised in option 51 (ten days)
pub const DEFAULT_LEASE_TIME: u32 = 864_000;

/// Longest boot file name that fits the 128-byte `file` field with its NUL
pub const MAX_BOOT_FILENAME_LEN: usize = 127;

/// DHCP engine configuration
#[derive(Debug, Clone)]
pub struct DhcpConfig {
    /// Address the listener binds to
    pub bind_addr: SocketAddrV4,

    /// Address sent as server identifier and, for PXE clients, as `siaddr`
    pub server_ip: Ipv4Addr,

    /// Lease range; also the source of the subnet mask and broadcast address
    pub lease_range: Ipv4Network,

    /// Default router (option 3)
    pub router: Option<Ipv4Addr>,

    /// DNS servers (option 6)
    pub dns_servers: Vec<Ipv4Addr>,

    /// Lease time in seconds (option 51)
    pub lease_time: u32,

    /// Boot file name for PXE clients
    pub boot_filename: Option<String>,

    /// Where replies are sent
    pub reply_target: SocketAddrV4,
}

impl DhcpConfig {
    /// Config listening on `0.0.0.0:67` and broadcasting replies to
    /// `255.255.255.255:68`
    pub fn new(server_ip: Ipv4Addr, lease_range: Ipv4Network) -> Self {
        Self {
            bind_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SERVER_PORT),
            server_ip,
            lease_range,
            router: None,
            dns_servers: Vec::new(),
            lease_time: DEFAULT_LEASE_TIME,
            boot_filename: None,
            reply_target: SocketAddrV4::new(Ipv4Addr::BROADCAST, CLIENT_PORT),
        }
    }

    pub fn with_bind_addr(mut self, addr: SocketAddrV4) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_router(mut self, router: Ipv4Addr) -> Self {
        self.router = Some(router);
        self
    }

    /// Add a DNS server
    pub fn with_dns_server(mut self, dns: Ipv4Addr) -> Self {
        self.dns_servers.push(dns);
        self
    }

    pub fn with_lease_time(mut self, seconds: u32) -> Self {
        self.lease_time = seconds;
        self
    }

    pub fn with_boot_filename(mut self, filename: impl Into<String>) -> Self {
        self.boot_filename = Some(filename.into());
        self
    }

    /// Send replies somewhere other than the limited broadcast address,
    /// e.g. a directed broadcast
    pub fn with_reply_target(mut self, target: SocketAddrV4) -> Self {
        self.reply_target = target;
        self
    }

    /// Subnet mask of the lease range
    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.lease_range.mask()
    }

    /// Broadcast address of the lease range
    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.lease_range.broadcast()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ref filename) = self.boot_filename {
            if filename.len() > MAX_BOOT_FILENAME_LEN {
                return Err(DhcpError::ConfigError(format!(
                    "boot filename is {} bytes (maximum {})",
                    filename.len(),
                    MAX_BOOT_FILENAME_LEN
                )));
            }
        }

        if self.server_ip.is_unspecified() {
            return Err(DhcpError::ConfigError(
                "server identifier must not be 0.0.0.0".to_string(),
            ));
        }

        Ok(())
    }
}
