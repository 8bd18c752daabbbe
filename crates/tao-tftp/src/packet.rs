//! TFTP packet handling
//!
//! Parsing and building TFTP packets according to RFC 1350, with the
//! option extension of RFC 2347 (OACK) and the `blksize`, `tsize` and
//! `timeout` options of RFC 2348/2349.

use crate::error::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// TFTP opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// Read request
    Rrq = 1,
    /// Write request
    Wrq = 2,
    /// Data packet
    Data = 3,
    /// Acknowledgment
    Ack = 4,
    /// Error
    Error = 5,
    /// Option acknowledgment (RFC 2347)
    Oack = 6,
}

impl TryFrom<u16> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            6 => Ok(Opcode::Oack),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// TFTP error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
    /// Option negotiation refused (RFC 2347)
    OptionsRefused = 8,
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            8 => ErrorCode::OptionsRefused,
            _ => ErrorCode::NotDefined,
        }
    }
}

/// TFTP transfer mode. Data is always sent as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Octet,
    NetAscii,
    Mail,
}

impl TransferMode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(TransferMode::Octet),
            "netascii" => Some(TransferMode::NetAscii),
            "mail" => Some(TransferMode::Mail),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Octet => "octet",
            TransferMode::NetAscii => "netascii",
            TransferMode::Mail => "mail",
        }
    }
}

/// Negotiated options, as carried in an OACK
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TftpOptions {
    /// Block size (RFC 2348)
    pub blksize: Option<u16>,
    /// Transfer size (RFC 2349)
    pub tsize: Option<u64>,
    /// Timeout in seconds (RFC 2349)
    pub timeout: Option<u8>,
}

impl TftpOptions {
    /// Check if any options are set
    pub fn is_empty(&self) -> bool {
        self.blksize.is_none() && self.tsize.is_none() && self.timeout.is_none()
    }
}

/// TFTP packet types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    /// Read request. Option keys are lowercased, values kept verbatim
    /// so negotiation can refuse bad ones instead of guessing.
    ReadRequest {
        filename: String,
        mode: Option<TransferMode>,
        options: Vec<(String, String)>,
    },
    /// Write request, decoded only so it can be refused
    WriteRequest { filename: String },
    /// Data packet
    Data { block: u16, data: Bytes },
    /// Acknowledgment
    Ack { block: u16 },
    /// Error
    Error { code: ErrorCode, message: String },
    /// Option acknowledgment
    Oack { options: TftpOptions },
}

impl TftpPacket {
    /// Parse a TFTP packet from bytes
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 2 {
            return Err(DecodeError::TooShort { len: data.len() });
        }

        let mut buf = data;
        let opcode = Opcode::try_from(buf.get_u16())?;

        match opcode {
            Opcode::Rrq => Self::parse_read_request(buf),
            Opcode::Wrq => {
                let filename = strings(buf)?
                    .next()
                    .filter(|name| !name.is_empty())
                    .ok_or(DecodeError::MissingFilename)?;
                Ok(TftpPacket::WriteRequest { filename })
            }
            Opcode::Data => {
                if buf.len() < 2 {
                    return Err(DecodeError::TooShort { len: data.len() });
                }
                let block = buf.get_u16();
                Ok(TftpPacket::Data {
                    block,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            Opcode::Ack => {
                if buf.len() < 2 {
                    return Err(DecodeError::TooShort { len: data.len() });
                }
                Ok(TftpPacket::Ack {
                    block: buf.get_u16(),
                })
            }
            Opcode::Error => {
                if buf.len() < 2 {
                    return Err(DecodeError::TooShort { len: data.len() });
                }
                let code = ErrorCode::from(buf.get_u16());
                // Some clients omit the terminator on the message
                let message = buf
                    .split(|&b| b == 0)
                    .next()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Ok(TftpPacket::Error { code, message })
            }
            Opcode::Oack => Self::parse_oack(buf),
        }
    }

    /// RRQ: filename, optional mode, then key/value option pairs.
    ///
    /// Options come in pairs, so an odd number of fields after the
    /// filename means the first one is the mode.
    fn parse_read_request(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut fields = strings(buf)?.collect::<Vec<_>>().into_iter();

        let filename = fields
            .next()
            .filter(|name| !name.is_empty())
            .ok_or(DecodeError::MissingFilename)?;

        let mode = if fields.len() % 2 == 1 {
            let field = fields.next().unwrap_or_default();
            Some(TransferMode::parse(&field).ok_or(DecodeError::UnknownMode(field))?)
        } else {
            None
        };

        let mut options = Vec::new();
        while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
            if key.is_empty() {
                break;
            }
            options.push((key.to_ascii_lowercase(), value));
        }

        Ok(TftpPacket::ReadRequest {
            filename,
            mode,
            options,
        })
    }

    fn parse_oack(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut fields = strings(buf)?;
        let mut options = TftpOptions::default();

        while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
            match key.to_ascii_lowercase().as_str() {
                "blksize" => options.blksize = value.parse().ok(),
                "tsize" => options.tsize = value.parse().ok(),
                "timeout" => options.timeout = value.parse().ok(),
                _ => {}
            }
        }

        Ok(TftpPacket::Oack { options })
    }

    /// Encode the packet to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            TftpPacket::ReadRequest {
                filename,
                mode,
                options,
            } => {
                buf.put_u16(Opcode::Rrq as u16);
                put_string(&mut buf, filename);
                if let Some(mode) = mode {
                    put_string(&mut buf, mode.as_str());
                }
                for (key, value) in options {
                    put_string(&mut buf, key);
                    put_string(&mut buf, value);
                }
            }
            TftpPacket::WriteRequest { filename } => {
                buf.put_u16(Opcode::Wrq as u16);
                put_string(&mut buf, filename);
                put_string(&mut buf, TransferMode::Octet.as_str());
            }
            TftpPacket::Data { block, data } => {
                buf.reserve(4 + data.len());
                buf.put_u16(Opcode::Data as u16);
                buf.put_u16(*block);
                buf.put_slice(data);
            }
            TftpPacket::Ack { block } => {
                buf.put_u16(Opcode::Ack as u16);
                buf.put_u16(*block);
            }
            TftpPacket::Error { code, message } => {
                buf.put_u16(Opcode::Error as u16);
                buf.put_u16(*code as u16);
                put_string(&mut buf, message);
            }
            TftpPacket::Oack { options } => {
                buf.put_u16(Opcode::Oack as u16);
                Self::encode_options(&mut buf, options);
            }
        }

        buf.freeze()
    }

    fn encode_options(buf: &mut BytesMut, options: &TftpOptions) {
        if let Some(blksize) = options.blksize {
            put_string(buf, "blksize");
            put_string(buf, &blksize.to_string());
        }
        if let Some(tsize) = options.tsize {
            put_string(buf, "tsize");
            put_string(buf, &tsize.to_string());
        }
        if let Some(timeout) = options.timeout {
            put_string(buf, "timeout");
            put_string(buf, &timeout.to_string());
        }
    }

    /// Error packet with an empty message
    pub fn error(code: ErrorCode) -> Self {
        TftpPacket::Error {
            code,
            message: String::new(),
        }
    }

    /// Create a data packet
    pub fn data(block: u16, data: impl Into<Bytes>) -> Self {
        TftpPacket::Data {
            block,
            data: data.into(),
        }
    }

    /// Create an ACK packet
    pub fn ack(block: u16) -> Self {
        TftpPacket::Ack { block }
    }

    /// Create an OACK packet
    pub fn oack(options: TftpOptions) -> Self {
        TftpPacket::Oack { options }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            TftpPacket::ReadRequest { .. } => Opcode::Rrq,
            TftpPacket::WriteRequest { .. } => Opcode::Wrq,
            TftpPacket::Data { .. } => Opcode::Data,
            TftpPacket::Ack { .. } => Opcode::Ack,
            TftpPacket::Error { .. } => Opcode::Error,
            TftpPacket::Oack { .. } => Opcode::Oack,
        }
    }
}

/// NUL-terminated strings of a request body.
///
/// Every field must be terminated; an empty body yields no fields.
fn strings(buf: &[u8]) -> Result<impl Iterator<Item = String> + '_, DecodeError> {
    let body = match buf.split_last() {
        None => &buf[..0],
        Some((0, body)) => body,
        Some(_) => return Err(DecodeError::Unterminated),
    };
    let fields = (!buf.is_empty()).then(|| body.split(|&b| b == 0));
    Ok(fields
        .into_iter()
        .flatten()
        .map(|field| String::from_utf8_lossy(field).into_owned()))
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}
