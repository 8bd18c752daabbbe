//! DHCP listener and session handler
//!
//! The listener owns the UDP socket and spawns one task per datagram.
//! Each task decodes the request, runs [`DhcpServer::handle_message`]
//! and broadcasts the reply.

use crate::config::DhcpConfig;
use crate::error::{DhcpError, Result};
use crate::lease::SharedLeaseTable;
use crate::options::{DhcpOption, MessageType, OptionCode};
use crate::packet::{Message, BOOTREQUEST};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Largest datagram the listener reads
const MAX_DATAGRAM_SIZE: usize = 65535;

/// Event emitted by the DHCP server
#[derive(Debug, Clone)]
pub enum DhcpEvent {
    /// Server started
    Started { bind_addr: SocketAddr },
    /// Received a DHCP request
    Request {
        mac: String,
        message_type: Option<MessageType>,
        is_pxe: bool,
        src: SocketAddr,
    },
    /// Sent a DHCP response
    Response {
        mac: String,
        message_type: MessageType,
        offered_ip: Ipv4Addr,
        dest: SocketAddr,
    },
    /// Datagram dropped because of an error
    Error { mac: Option<String>, error: String },
    /// Server stopped
    Stopped,
}

/// DHCP server
///
/// Cloning is cheap; clones share the socket, lease table and event channel.
#[derive(Clone)]
pub struct DhcpServer {
    config: Arc<DhcpConfig>,
    leases: SharedLeaseTable,
    socket: Arc<UdpSocket>,
    event_sender: broadcast::Sender<DhcpEvent>,
}

impl DhcpServer {
    /// Bind the listener socket.
    ///
    /// A bind failure is returned as [`DhcpError::BindFailed`].
    pub async fn bind(config: DhcpConfig, leases: SharedLeaseTable) -> Result<Self> {
        config.validate()?;
        let socket = create_socket(config.bind_addr).await?;
        let (event_sender, _) = broadcast::channel(1024);

        Ok(Self {
            config: Arc::new(config),
            leases,
            socket: Arc::new(socket),
            event_sender,
        })
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<DhcpEvent> {
        self.event_sender.subscribe()
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &DhcpConfig {
        &self.config
    }

    /// Run the DHCP server until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let bind_addr = self.local_addr()?;

        info!(
            addr = %bind_addr,
            range = %self.config.lease_range,
            server_ip = %self.config.server_ip,
            "DHCP server started"
        );
        let _ = self.event_sender.send(DhcpEvent::Started { bind_addr });

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let server = self.clone();
                            let data = buf[..len].to_vec();
                            tokio::spawn(async move {
                                server.handle_datagram(&data, src).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error receiving packet");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("DHCP server shutting down");
                        let _ = self.event_sender.send(DhcpEvent::Stopped);
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Build the reply for one decoded request.
    ///
    /// DISCOVER yields an OFFER and REQUEST yields an ACK; anything else,
    /// including BOOTREPLY messages, yields `None`.
    pub async fn handle_message(&self, request: &Message) -> Result<Option<Message>> {
        if request.op != BOOTREQUEST {
            return Ok(None);
        }

        let reply_type = match request.message_type() {
            Some(MessageType::Discover) => MessageType::Offer,
            Some(MessageType::Request) => MessageType::Ack,
            _ => return Ok(None),
        };

        let assigned = self
            .leases
            .lock()
            .await
            .allocate(request.hardware_address())?;

        let mut reply = Message::reply_to(request);
        reply.yiaddr = assigned;
        reply.options.push(DhcpOption::MessageType(reply_type));
        reply
            .options
            .push(DhcpOption::ServerIdentifier(self.config.server_ip));
        reply
            .options
            .push(DhcpOption::AddressTime(self.config.lease_time));

        for &code in request.parameter_request_list() {
            if reply.option(code).is_some() {
                continue;
            }
            if let Some(option) = self.requested_option(code) {
                reply.options.push(option);
            }
        }

        if request.is_pxe_client() {
            reply.siaddr = self.config.server_ip;
            if let Some(ref filename) = self.config.boot_filename {
                reply.set_boot_file_name(filename)?;
            }
        }

        Ok(Some(reply))
    }

    /// Option synthesized from config for a parameter-request-list entry
    fn requested_option(&self, code: u8) -> Option<DhcpOption> {
        match OptionCode::try_from(code).ok()? {
            OptionCode::SubnetMask => Some(DhcpOption::SubnetMask(self.config.subnet_mask())),
            OptionCode::Router => self.config.router.map(|router| DhcpOption::Router(vec![router])),
            OptionCode::DomainServer if !self.config.dns_servers.is_empty() => {
                Some(DhcpOption::DomainServer(self.config.dns_servers.clone()))
            }
            OptionCode::BroadcastAddress => {
                Some(DhcpOption::BroadcastAddress(self.config.broadcast_address()))
            }
            _ => None,
        }
    }

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        let request = match Message::decode(data) {
            Ok(request) => request,
            Err(e) => {
                debug!(src = %src, error = %e, "Dropping malformed DHCP packet");
                let _ = self.event_sender.send(DhcpEvent::Error {
                    mac: None,
                    error: e.to_string(),
                });
                return;
            }
        };

        let mac = request.mac_address();
        let message_type = request.message_type();
        let is_pxe = request.is_pxe_client();

        debug!(
            mac = %mac,
            msg_type = ?message_type,
            is_pxe,
            src = %src,
            "Received DHCP request"
        );
        let _ = self.event_sender.send(DhcpEvent::Request {
            mac: mac.clone(),
            message_type,
            is_pxe,
            src,
        });

        let result = match self.handle_message(&request).await {
            Ok(Some(reply)) => self.send_reply(&mac, &reply).await,
            Ok(None) => {
                debug!(mac = %mac, msg_type = ?message_type, "Ignoring DHCP message");
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            match &e {
                DhcpError::Lease(_) => warn!(mac = %mac, error = %e, "No address for client"),
                _ => error!(mac = %mac, error = %e, "Error handling DHCP packet"),
            }
            let _ = self.event_sender.send(DhcpEvent::Error {
                mac: Some(mac),
                error: e.to_string(),
            });
        }
    }

    async fn send_reply(&self, mac: &str, reply: &Message) -> Result<()> {
        let bytes = reply.to_vec()?;
        let dest = SocketAddr::V4(self.config.reply_target);
        self.socket.send_to(&bytes, dest).await?;

        let message_type = reply.message_type().unwrap_or(MessageType::Offer);
        info!(
            mac = %mac,
            msg_type = %message_type,
            offered_ip = %reply.yiaddr,
            dest = %dest,
            "Sent DHCP response"
        );
        let _ = self.event_sender.send(DhcpEvent::Response {
            mac: mac.to_string(),
            message_type,
            offered_ip: reply.yiaddr,
            dest,
        });

        Ok(())
    }
}

impl std::fmt::Debug for DhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Create and configure the UDP socket
async fn create_socket(bind_addr: SocketAddrV4) -> Result<UdpSocket> {
    let bind_failed = |source| DhcpError::BindFailed {
        addr: bind_addr.into(),
        source,
    };

    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(bind_failed)?;

    socket.set_reuse_address(true).ok();

    // Replies go to 255.255.255.255
    socket.set_broadcast(true).map_err(bind_failed)?;

    socket.bind(&bind_addr.into()).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_failed)
}
