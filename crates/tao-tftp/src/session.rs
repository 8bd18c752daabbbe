//! Transfer session
//!
//! One session per accepted RRQ, running on its own ephemeral socket:
//!
//! ```text
//!   Negotiating ──ACK 0──▶ Transferring ──ACK of short block──▶ Done
//!        │                      │
//!        └──ERROR / timeout─────┴──▶ Aborted
//! ```
//!
//! Negotiating is skipped when no option was accepted. Transfers are
//! stop-and-wait: one DATA block is outstanding at a time.

use crate::error::{Result, TftpError};
use crate::packet::{ErrorCode, TftpOptions, TftpPacket};
use crate::provider::TftpFile;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::server::TftpEvent;

/// Default block size (RFC 1350)
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// Smallest block size accepted (RFC 2348)
pub const MIN_BLOCK_SIZE: u16 = 8;

/// Maximum block size (RFC 2348)
pub const MAX_BLOCK_SIZE: u16 = 65464;

/// Largest datagram a client sends during a transfer (ACK or ERROR)
const MAX_CLIENT_DATAGRAM: usize = 1024;

/// Decide which requested options to accept.
///
/// `blksize` outside 8..=65464 or not a number refuses the whole request.
/// `tsize` is answered with `file_size` when known. A `timeout` outside
/// 1..=255 is ignored, as are unknown keys.
pub fn negotiate(requested: &[(String, String)], file_size: Option<u64>) -> Result<TftpOptions> {
    let mut accepted = TftpOptions::default();

    for (key, value) in requested {
        match key.as_str() {
            "blksize" => {
                let size = value
                    .parse::<u16>()
                    .ok()
                    .filter(|size| (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(size))
                    .ok_or_else(|| {
                        TftpError::OptionsRefused(format!("blksize {:?} not in 8..=65464", value))
                    })?;
                accepted.blksize = Some(size);
            }
            "tsize" => {
                if value.parse::<u64>().is_ok() {
                    accepted.tsize = file_size;
                }
            }
            "timeout" => match value.parse::<u8>() {
                Ok(secs) if secs > 0 => accepted.timeout = Some(secs),
                _ => debug!(value = %value, "Ignoring invalid timeout option"),
            },
            other => debug!(option = %other, "Ignoring unknown option"),
        }
    }

    Ok(accepted)
}

/// Per-session retransmission settings
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Wait for the expected datagram before retransmitting
    pub timeout: Duration,
    /// Consecutive timeouts tolerated before the session aborts
    pub max_retries: u32,
}

/// State of one read transfer
pub struct TransferSession {
    socket: UdpSocket,
    client: SocketAddr,
    filename: String,
    file: TftpFile,
    options: TftpOptions,
    block_size: usize,
    retry: RetryPolicy,
    event_sender: broadcast::Sender<TftpEvent>,
}

impl TransferSession {
    /// `options` are the already negotiated ones; a negotiated
    /// timeout overrides `retry.timeout`.
    pub fn new(
        socket: UdpSocket,
        client: SocketAddr,
        filename: impl Into<String>,
        file: TftpFile,
        options: TftpOptions,
        mut retry: RetryPolicy,
        event_sender: broadcast::Sender<TftpEvent>,
    ) -> Self {
        if let Some(secs) = options.timeout {
            retry.timeout = Duration::from_secs(u64::from(secs));
        }
        Self {
            socket,
            client,
            filename: filename.into(),
            file,
            block_size: usize::from(options.blksize.unwrap_or(DEFAULT_BLOCK_SIZE)),
            options,
            retry,
            event_sender,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Drive the transfer to completion, returning the number of bytes sent.
    ///
    /// A read failure sends ACCESS VIOLATION before returning the error.
    pub async fn run(mut self) -> Result<u64> {
        if !self.options.is_empty() {
            let oack = TftpPacket::oack(self.options.clone()).encode();
            debug!(client = %self.client, options = ?self.options, "Sending OACK");
            self.send(&oack).await?;
            self.await_ack(0, &oack).await?;
        }

        let _ = self.event_sender.send(TftpEvent::TransferStarted {
            client: self.client,
            filename: self.filename.clone(),
            size: self.file.size,
            block_size: self.block_size,
        });

        let mut block: u16 = 1;
        let mut bytes_sent: u64 = 0;
        let mut payload = vec![0u8; self.block_size];

        loop {
            let len = match self.read_block(&mut payload).await {
                Ok(len) => len,
                Err(source) => {
                    warn!(client = %self.client, filename = %self.filename, error = %source, "Read failed");
                    let error = TftpPacket::error(ErrorCode::AccessViolation).encode();
                    let _ = self.send(&error).await;
                    return Err(TftpError::ReadFailed {
                        filename: self.filename,
                        source,
                    });
                }
            };

            let data = TftpPacket::data(block, Bytes::copy_from_slice(&payload[..len])).encode();
            self.send(&data).await?;
            self.await_ack(block, &data).await?;

            bytes_sent += len as u64;
            let _ = self.event_sender.send(TftpEvent::TransferProgress {
                client: self.client,
                filename: self.filename.clone(),
                bytes_sent,
                total_bytes: self.file.size,
            });

            if len < self.block_size {
                break;
            }
            block = block.wrapping_add(1);
        }

        info!(client = %self.client, filename = %self.filename, bytes = bytes_sent, "Transfer completed");
        Ok(bytes_sent)
    }

    /// Fill `buf` from the file; short only at end of file
    async fn read_block(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn send(&self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.client).await?;
        Ok(())
    }

    /// Wait for ACK `expected` from the client, retransmitting `outstanding`
    /// on each timeout.
    ///
    /// Datagrams from other addresses, stale ACKs and anything that does
    /// not decode are ignored without resetting the timer.
    async fn await_ack(&self, expected: u16, outstanding: &Bytes) -> Result<()> {
        let mut buf = BytesMut::zeroed(MAX_CLIENT_DATAGRAM);
        let mut retries = 0;
        let mut deadline = Instant::now() + self.retry.timeout;

        loop {
            let (len, src) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(result) => result?,
                Err(_) => {
                    retries += 1;
                    if retries > self.retry.max_retries {
                        warn!(client = %self.client, filename = %self.filename, block = expected, "Client stopped responding");
                        return Err(TftpError::Timeout {
                            filename: self.filename.clone(),
                        });
                    }
                    debug!(client = %self.client, block = expected, retry = retries, "Timeout, retransmitting");
                    self.send(outstanding).await?;
                    deadline = Instant::now() + self.retry.timeout;
                    continue;
                }
            };

            if src != self.client {
                debug!(client = %self.client, src = %src, "Ignoring datagram from foreign address");
                continue;
            }

            match TftpPacket::parse(&buf[..len]) {
                Ok(TftpPacket::Ack { block }) if block == expected => return Ok(()),
                Ok(TftpPacket::Ack { block }) => {
                    debug!(client = %self.client, block, expected, "Ignoring stale ACK");
                }
                Ok(TftpPacket::Error { code, message }) => {
                    warn!(client = %self.client, code = ?code, message = %message, "Client aborted transfer");
                    return Err(TftpError::Aborted {
                        reason: format!("client sent {:?}: {}", code, message),
                    });
                }
                Ok(other) => {
                    debug!(client = %self.client, opcode = ?other.opcode(), "Ignoring unexpected packet");
                }
                Err(e) => {
                    debug!(client = %self.client, error = %e, "Ignoring malformed packet");
                }
            }
        }
    }
}

impl std::fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("client", &self.client)
            .field("filename", &self.filename)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FileProvider, MemoryFileProvider};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    fn opts(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_negotiate_accepts_supported_options() {
        let accepted = negotiate(
            &opts(&[("blksize", "1468"), ("tsize", "0"), ("timeout", "3"), ("windowsize", "4")]),
            Some(4096),
        )
        .unwrap();

        assert_eq!(
            accepted,
            TftpOptions {
                blksize: Some(1468),
                tsize: Some(4096),
                timeout: Some(3),
            }
        );
    }

    #[test]
    fn test_negotiate_refuses_bad_blksize() {
        for value in ["abc", "", "-1", "7", "65465", "100000"] {
            let result = negotiate(&opts(&[("blksize", value)]), None);
            assert!(
                matches!(result, Err(TftpError::OptionsRefused(_))),
                "blksize {:?} was accepted",
                value
            );
        }

        assert!(negotiate(&opts(&[("blksize", "8")]), None).is_ok());
        assert!(negotiate(&opts(&[("blksize", "65464")]), None).is_ok());
    }

    #[test]
    fn test_negotiate_omits_unknown_tsize_and_bad_timeout() {
        let accepted = negotiate(&opts(&[("tsize", "0"), ("timeout", "0")]), None).unwrap();
        assert!(accepted.is_empty());

        let accepted = negotiate(&opts(&[("timeout", "256")]), Some(1)).unwrap();
        assert!(accepted.is_empty());
    }

    #[test]
    fn test_block_numbers_wrap() {
        let block: u16 = 65535;
        assert_eq!(block.wrapping_add(1), 0);
    }

    /// Yields `remaining` bytes, then fails
    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::other("disk error")));
            }
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![0xab; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    async fn session_pair(file: TftpFile, options: TftpOptions) -> (TransferSession, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();
        let (event_sender, _) = broadcast::channel(16);

        let session = TransferSession::new(
            server,
            client.local_addr().unwrap(),
            "test.bin",
            file,
            options,
            RetryPolicy {
                timeout: Duration::from_millis(200),
                max_retries: 2,
            },
            event_sender,
        );
        (session, client)
    }

    async fn recv(client: &UdpSocket) -> TftpPacket {
        let mut buf = vec![0u8; 2048];
        let len = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        TftpPacket::parse(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_1025_byte_file_in_three_blocks() {
        let mut provider = MemoryFileProvider::new();
        let contents: Vec<u8> = (0..1025u32).map(|i| i as u8).collect();
        provider.add_file("test.bin", contents.clone());
        let file = provider.open("test.bin").await.unwrap();

        let (session, client) = session_pair(file, TftpOptions::default()).await;
        let transfer = tokio::spawn(session.run());

        let mut received = Vec::new();
        for (expected_block, expected_len) in [(1u16, 512usize), (2, 512), (3, 1)] {
            match recv(&client).await {
                TftpPacket::Data { block, data } => {
                    assert_eq!(block, expected_block);
                    assert_eq!(data.len(), expected_len);
                    received.extend_from_slice(&data);
                }
                other => panic!("expected Data, got {:?}", other),
            }
            client.send(&TftpPacket::ack(expected_block).encode()).await.unwrap();
        }

        assert_eq!(transfer.await.unwrap().unwrap(), 1025);
        assert_eq!(received, contents);
    }

    #[tokio::test]
    async fn test_stale_ack_is_ignored_and_timeout_retransmits() {
        let mut provider = MemoryFileProvider::new();
        provider.add_file("test.bin", vec![7u8; 10]);
        let file = provider.open("test.bin").await.unwrap();

        let (session, client) = session_pair(file, TftpOptions::default()).await;
        let transfer = tokio::spawn(session.run());

        assert!(matches!(recv(&client).await, TftpPacket::Data { block: 1, .. }));
        client.send(&TftpPacket::ack(0).encode()).await.unwrap();

        // no valid ACK yet, so DATA 1 comes again after the timeout
        assert!(matches!(recv(&client).await, TftpPacket::Data { block: 1, .. }));
        client.send(&TftpPacket::ack(1).encode()).await.unwrap();

        assert_eq!(transfer.await.unwrap().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let mut provider = MemoryFileProvider::new();
        provider.add_file("test.bin", vec![1u8; 600]);
        let file = provider.open("test.bin").await.unwrap();

        let (session, _client) = session_pair(file, TftpOptions::default()).await;
        let result = session.run().await;
        assert!(matches!(result, Err(TftpError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_client_error_aborts() {
        let mut provider = MemoryFileProvider::new();
        provider.add_file("test.bin", vec![1u8; 600]);
        let file = provider.open("test.bin").await.unwrap();

        let (session, client) = session_pair(file, TftpOptions::default()).await;
        let transfer = tokio::spawn(session.run());

        assert!(matches!(recv(&client).await, TftpPacket::Data { block: 1, .. }));
        client
            .send(&TftpPacket::error(ErrorCode::NotDefined).encode())
            .await
            .unwrap();

        assert!(matches!(
            transfer.await.unwrap(),
            Err(TftpError::Aborted { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_failure_sends_access_violation() {
        let file = TftpFile {
            reader: Box::new(FailingReader { remaining: 512 }),
            size: None,
        };

        let (session, client) = session_pair(file, TftpOptions::default()).await;
        let transfer = tokio::spawn(session.run());

        assert!(matches!(recv(&client).await, TftpPacket::Data { block: 1, .. }));
        client.send(&TftpPacket::ack(1).encode()).await.unwrap();

        match recv(&client).await {
            TftpPacket::Error { code, .. } => assert_eq!(code, ErrorCode::AccessViolation),
            other => panic!("expected Error, got {:?}", other),
        }
        assert!(matches!(
            transfer.await.unwrap(),
            Err(TftpError::ReadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_oack_handshake_then_data() {
        let mut provider = MemoryFileProvider::new();
        provider.add_file("test.bin", vec![3u8; 20]);
        let file = provider.open("test.bin").await.unwrap();
        let options = TftpOptions {
            blksize: Some(16),
            tsize: Some(20),
            timeout: None,
        };

        let (session, client) = session_pair(file, options.clone()).await;
        let transfer = tokio::spawn(session.run());

        assert_eq!(recv(&client).await, TftpPacket::Oack { options });
        client.send(&TftpPacket::ack(0).encode()).await.unwrap();

        match recv(&client).await {
            TftpPacket::Data { block: 1, data } => assert_eq!(data.len(), 16),
            other => panic!("expected Data 1, got {:?}", other),
        }
        client.send(&TftpPacket::ack(1).encode()).await.unwrap();
        match recv(&client).await {
            TftpPacket::Data { block: 2, data } => assert_eq!(data.len(), 4),
            other => panic!("expected Data 2, got {:?}", other),
        }
        client.send(&TftpPacket::ack(2).encode()).await.unwrap();

        assert_eq!(transfer.await.unwrap().unwrap(), 20);
    }
}
