//! Network services runner
//!
//! Binds the enabled engines, then runs each on its own task. Both
//! listeners are bound before either starts serving, so a port that is
//! already taken stops the whole service instead of half of it.

use crate::config::{DhcpServiceConfig, ServicesConfig};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tao_dhcp::{DhcpConfig, DhcpEvent, DhcpServer, LeaseTable};
use tao_tftp::{DirectoryFileProvider, TftpEvent, TftpServer};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("DHCP: {0}")]
    Dhcp(#[from] tao_dhcp::DhcpError),

    #[error("TFTP: {0}")]
    Tftp(#[from] tao_tftp::TftpError),

    #[error("could not determine the server address: {0}")]
    ServerIdentity(#[source] std::io::Error),
}

/// Handles to running services
#[derive(Default)]
pub struct ServiceHandles {
    pub dhcp: Option<ServiceHandle<DhcpEvent>>,
    pub tftp: Option<ServiceHandle<TftpEvent>>,
}

/// Handle to a single service
pub struct ServiceHandle<E> {
    pub events: broadcast::Receiver<E>,
    pub join_handle: JoinHandle<()>,
}

impl ServiceHandles {
    /// Wait for every started service to stop
    pub async fn join(self) {
        for handle in [
            self.dhcp.map(|h| h.join_handle),
            self.tftp.map(|h| h.join_handle),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = handle.await {
                error!(error = %e, "Service task panicked");
            }
        }
    }
}

pub struct ServiceRunner {
    config: ServicesConfig,
}

impl ServiceRunner {
    pub fn new(config: ServicesConfig) -> Self {
        Self { config }
    }

    /// Bind all configured services, then start them
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<ServiceHandles, ServiceError> {
        let dhcp = match &self.config.dhcp {
            Some(config) => Some(bind_dhcp(config).await?),
            None => None,
        };

        let tftp = match &self.config.tftp {
            Some(config) => {
                let provider = Arc::new(DirectoryFileProvider::new(&config.srv_dir));
                let server = TftpServer::bind(config.server.clone(), provider).await?;
                info!(
                    addr = %config.server.bind_addr,
                    dir = %config.srv_dir.display(),
                    "Starting TFTP server"
                );
                Some(server)
            }
            None => None,
        };

        let mut handles = ServiceHandles::default();

        if let Some(server) = dhcp {
            let events = server.subscribe();
            let rx = shutdown.clone();
            let join_handle = tokio::spawn(async move {
                if let Err(e) = server.run(rx).await {
                    error!(error = %e, "DHCP server error");
                }
            });
            handles.dhcp = Some(ServiceHandle {
                events,
                join_handle,
            });
        }

        if let Some(server) = tftp {
            let events = server.subscribe();
            let rx = shutdown.clone();
            let join_handle = tokio::spawn(async move {
                if let Err(e) = server.run(rx).await {
                    error!(error = %e, "TFTP server error");
                }
            });
            handles.tftp = Some(ServiceHandle {
                events,
                join_handle,
            });
        }

        Ok(handles)
    }
}

async fn bind_dhcp(config: &DhcpServiceConfig) -> Result<DhcpServer, ServiceError> {
    let server_ip = match config.server_id {
        Some(ip) => ip,
        None => detect_server_ip().map_err(ServiceError::ServerIdentity)?,
    };

    let mut dhcp_config = DhcpConfig::new(server_ip, config.lease_range)
        .with_bind_addr(config.bind_addr)
        .with_lease_time(config.lease_time);
    if let Some(router) = config.router {
        dhcp_config = dhcp_config.with_router(router);
    }
    for dns in &config.dns_servers {
        dhcp_config = dhcp_config.with_dns_server(*dns);
    }
    if let Some(filename) = &config.boot_filename {
        dhcp_config = dhcp_config.with_boot_filename(filename.clone());
    }

    let leases = LeaseTable::new(config.lease_range);
    info!(
        addr = %config.bind_addr,
        server_ip = %server_ip,
        range = %config.lease_range,
        capacity = leases.capacity(),
        "Starting DHCP server"
    );

    Ok(DhcpServer::bind(dhcp_config, leases.shared()).await?)
}

/// Outbound IPv4 address of this host.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick
/// the route and source address.
pub fn detect_server_ip() -> std::io::Result<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    match socket.local_addr()?.ip() {
        std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(std::io::Error::other(format!(
            "unexpected local address {}",
            other
        ))),
    }
}

/// Log engine events until both channels close
pub async fn log_events(
    mut dhcp: Option<broadcast::Receiver<DhcpEvent>>,
    mut tftp: Option<broadcast::Receiver<TftpEvent>>,
) {
    loop {
        tokio::select! {
            event = recv(&mut dhcp), if dhcp.is_some() => match event {
                Ok(event) => log_dhcp_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "DHCP event log lagging"),
                Err(broadcast::error::RecvError::Closed) => dhcp = None,
            },
            event = recv(&mut tftp), if tftp.is_some() => match event {
                Ok(event) => log_tftp_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "TFTP event log lagging"),
                Err(broadcast::error::RecvError::Closed) => tftp = None,
            },
            else => break,
        }
    }
}

async fn recv<E: Clone>(
    receiver: &mut Option<broadcast::Receiver<E>>,
) -> Result<E, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn log_dhcp_event(event: &DhcpEvent) {
    match event {
        DhcpEvent::Response {
            mac,
            message_type,
            offered_ip,
            ..
        } => debug!(mac = %mac, reply = %message_type, ip = %offered_ip, "DHCP reply"),
        DhcpEvent::Error { mac, error } => {
            debug!(mac = ?mac, error = %error, "DHCP request dropped")
        }
        other => debug!(event = ?other, "DHCP event"),
    }
}

fn log_tftp_event(event: &TftpEvent) {
    match event {
        TftpEvent::TransferCompleted {
            client,
            filename,
            bytes_sent,
        } => debug!(client = %client, filename = %filename, bytes = bytes_sent, "TFTP transfer done"),
        TftpEvent::TransferProgress { .. } => {}
        other => debug!(event = ?other, "TFTP event"),
    }
}
