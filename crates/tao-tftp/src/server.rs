//! TFTP listener
//!
//! The listener owns the well-known port and only ever reads requests
//! from it. Every accepted RRQ gets its own task and its own ephemeral
//! socket, so a stalled client never holds up anyone else.

use crate::error::{Result, TftpError};
use crate::packet::{ErrorCode, TftpPacket};
use crate::provider::FileProvider;
use crate::session::{negotiate, RetryPolicy, TransferSession};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Well-known TFTP port
pub const TFTP_PORT: u16 = 69;

/// Default per-datagram wait before retransmitting
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of retransmissions before a session gives up
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Largest request datagram read from the listener
const MAX_REQUEST_LEN: usize = 65535;

/// Listener settings
#[derive(Debug, Clone)]
pub struct TftpConfig {
    pub bind_addr: SocketAddr,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for TftpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, TFTP_PORT).into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl TftpConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Event emitted by the TFTP server
#[derive(Debug, Clone)]
pub enum TftpEvent {
    /// Listener bound and serving
    Started { bind_addr: SocketAddr },
    /// Read request received
    Request { client: SocketAddr, filename: String },
    /// Request answered with an ERROR packet before any data was sent
    Rejected {
        client: SocketAddr,
        filename: Option<String>,
        code: ErrorCode,
        reason: String,
    },
    /// First DATA block about to be sent
    TransferStarted {
        client: SocketAddr,
        filename: String,
        size: Option<u64>,
        block_size: usize,
    },
    /// A block was acknowledged
    TransferProgress {
        client: SocketAddr,
        filename: String,
        bytes_sent: u64,
        total_bytes: Option<u64>,
    },
    /// Final block acknowledged
    TransferCompleted {
        client: SocketAddr,
        filename: String,
        bytes_sent: u64,
    },
    /// Session aborted after it started
    TransferFailed {
        client: SocketAddr,
        filename: String,
        error: String,
    },
    /// Listener stopped
    Stopped,
}

/// TFTP server
#[derive(Clone)]
pub struct TftpServer {
    config: Arc<TftpConfig>,
    file_provider: Arc<dyn FileProvider>,
    socket: Arc<UdpSocket>,
    event_sender: broadcast::Sender<TftpEvent>,
}

impl TftpServer {
    /// Bind the listener socket. Failure here is fatal for the service.
    pub async fn bind(config: TftpConfig, file_provider: Arc<dyn FileProvider>) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| TftpError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        let (event_sender, _) = broadcast::channel(1024);
        Ok(Self {
            config: Arc::new(config),
            file_provider,
            socket: Arc::new(socket),
            event_sender,
        })
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<TftpEvent> {
        self.event_sender.subscribe()
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &TftpConfig {
        &self.config
    }

    /// Serve requests until `shutdown` flips to true or its sender is dropped.
    ///
    /// Transfers already in flight keep running to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let bind_addr = self.local_addr()?;
        info!(addr = %bind_addr, "TFTP server started");
        let _ = self.event_sender.send(TftpEvent::Started { bind_addr });

        let mut buf = vec![0u8; MAX_REQUEST_LEN];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, client)) => {
                            let datagram = buf[..len].to_vec();
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_request(&datagram, client).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error receiving packet");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("TFTP server shutting down");
                        let _ = self.event_sender.send(TftpEvent::Stopped);
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Dispatch one datagram received on the listener
    async fn handle_request(&self, datagram: &[u8], client: SocketAddr) {
        let packet = match TftpPacket::parse(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(client = %client, error = %e, "Malformed request");
                self.reject(&self.socket, client, None, &TftpError::Decode(e))
                    .await;
                return;
            }
        };

        match packet {
            TftpPacket::ReadRequest {
                filename, options, ..
            } => {
                debug!(client = %client, filename = %filename, options = ?options, "Read request");
                let _ = self.event_sender.send(TftpEvent::Request {
                    client,
                    filename: filename.clone(),
                });
                self.serve(client, filename, options).await;
            }
            // ERROR is never answered
            TftpPacket::Error { code, message } => {
                debug!(client = %client, code = ?code, message = %message, "Dropping ERROR sent to listener");
            }
            other => {
                let opcode = other.opcode();
                debug!(client = %client, opcode = ?opcode, "Unsupported opcode on listener");
                self.reject(
                    &self.socket,
                    client,
                    None,
                    &TftpError::IllegalOperation(opcode),
                )
                .await;
            }
        }
    }

    /// Open the file, negotiate options and drive the transfer
    async fn serve(&self, client: SocketAddr, filename: String, options: Vec<(String, String)>) {
        let socket = match UdpSocket::bind(SocketAddr::new(self.config.bind_addr.ip(), 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(client = %client, error = %e, "Failed to allocate transfer socket");
                return;
            }
        };

        let file = match self.file_provider.open(&filename).await {
            Ok(file) => file,
            Err(e) => {
                warn!(client = %client, filename = %filename, "File not found");
                self.reject(&socket, client, Some(&filename), &e).await;
                return;
            }
        };

        let negotiated = match negotiate(&options, file.size) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                warn!(client = %client, filename = %filename, error = %e, "Refusing options");
                self.reject(&socket, client, Some(&filename), &e).await;
                return;
            }
        };

        let retry = RetryPolicy {
            timeout: self.config.timeout,
            max_retries: self.config.max_retries,
        };
        let session = TransferSession::new(
            socket,
            client,
            filename.clone(),
            file,
            negotiated,
            retry,
            self.event_sender.clone(),
        );

        match session.run().await {
            Ok(bytes_sent) => {
                let _ = self.event_sender.send(TftpEvent::TransferCompleted {
                    client,
                    filename,
                    bytes_sent,
                });
            }
            Err(e) => {
                warn!(client = %client, filename = %filename, error = %e, "Transfer failed");
                let _ = self.event_sender.send(TftpEvent::TransferFailed {
                    client,
                    filename,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Answer with the ERROR packet matching `error`
    async fn reject(
        &self,
        socket: &UdpSocket,
        client: SocketAddr,
        filename: Option<&str>,
        error: &TftpError,
    ) {
        let Some(code) = error.error_code() else {
            return;
        };

        if let Err(e) = socket
            .send_to(&TftpPacket::error(code).encode(), client)
            .await
        {
            error!(client = %client, error = %e, "Failed to send error packet");
        }

        let _ = self.event_sender.send(TftpEvent::Rejected {
            client,
            filename: filename.map(str::to_string),
            code,
            reason: error.to_string(),
        });
    }
}

impl std::fmt::Debug for TftpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TftpServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryFileProvider;

    #[test]
    fn test_config_defaults() {
        let config = TftpConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:69".parse().unwrap());
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 5);

        let config = TftpConfig::new("127.0.0.1:6969".parse().unwrap())
            .with_timeout(Duration::from_secs(1))
            .with_max_retries(2);
        assert_eq!(config.bind_addr.port(), 6969);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_retries, 2);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = TftpServer::bind(
            TftpConfig::new("127.0.0.1:0".parse().unwrap()),
            Arc::new(MemoryFileProvider::new()),
        )
        .await
        .unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
        let _receiver = server.subscribe();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let result = TftpServer::bind(
            TftpConfig::new("192.0.2.1:0".parse().unwrap()),
            Arc::new(MemoryFileProvider::new()),
        )
        .await;

        assert!(matches!(result, Err(TftpError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let server = TftpServer::bind(
            TftpConfig::new("127.0.0.1:0".parse().unwrap()),
            Arc::new(MemoryFileProvider::new()),
        )
        .await
        .unwrap();
        let mut events = server.subscribe();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let mut stopped = false;
        while let Ok(event) = events.try_recv() {
            stopped |= matches!(event, TftpEvent::Stopped);
        }
        assert!(stopped);
    }
}
