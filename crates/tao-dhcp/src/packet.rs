//! DHCP message codec
//!
//! A message is the 236-byte BOOTP header, the magic cookie, then a
//! TLV option list terminated by End.
//!
//! ```text
//!   0        1        2        3        4       8       10      12
//!   +--------+--------+--------+--------+-------+-------+-------+
//!   |   op   | htype  |  hlen  |  hops  |  xid  | secs  | flags |
//!   +--------+--------+--------+--------+-------+-------+-------+
//!  12 ciaddr  16 yiaddr  20 siaddr  24 giaddr  28 chaddr (16)
//!  44 sname (64)  108 file (128)  236 magic cookie  240 options ...
//! ```

use crate::error::{DecodeError, EncodeError};
use crate::options::{DhcpOption, MessageType, OptionCode, PXE_CLIENT_CLASS};
use bytes::{Buf, BufMut};
use std::net::Ipv4Addr;

/// 99.130.83.99
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Size of the BOOTP header before the magic cookie
pub const HEADER_LEN: usize = 236;

/// Offset of the first option
pub const OPTIONS_OFFSET: usize = HEADER_LEN + MAGIC_COOKIE.len();

/// Encoded messages are zero-padded to this length; some PXE ROMs
/// reject shorter BOOTP replies.
pub const MIN_MESSAGE_LEN: usize = 300;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

const CHADDR_LEN: usize = 16;
const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;

/// A decoded DHCP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; CHADDR_LEN],
    pub sname: [u8; SNAME_LEN],
    pub file: [u8; FILE_LEN],
    /// Options in wire order
    pub options: Vec<DhcpOption>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; CHADDR_LEN],
            sname: [0; SNAME_LEN],
            file: [0; FILE_LEN],
            options: Vec::new(),
        }
    }
}

impl Message {
    /// Decode a datagram.
    ///
    /// Bytes after the End option are treated as padding.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < OPTIONS_OFFSET {
            return Err(DecodeError::TooShort {
                len: data.len(),
                min: OPTIONS_OFFSET,
            });
        }

        let mut buf = data;
        let mut message = Self {
            op: buf.get_u8(),
            htype: buf.get_u8(),
            hlen: buf.get_u8(),
            hops: buf.get_u8(),
            xid: buf.get_u32(),
            secs: buf.get_u16(),
            flags: buf.get_u16(),
            ciaddr: Ipv4Addr::from(buf.get_u32()),
            yiaddr: Ipv4Addr::from(buf.get_u32()),
            siaddr: Ipv4Addr::from(buf.get_u32()),
            giaddr: Ipv4Addr::from(buf.get_u32()),
            ..Self::default()
        };
        buf.copy_to_slice(&mut message.chaddr);
        buf.copy_to_slice(&mut message.sname);
        buf.copy_to_slice(&mut message.file);

        let mut cookie = [0u8; 4];
        buf.copy_to_slice(&mut cookie);
        if cookie != MAGIC_COOKIE {
            return Err(DecodeError::BadMagicCookie(cookie));
        }

        message.options = decode_options(buf)?;
        Ok(message)
    }

    /// Length [`encode`](Self::encode) will write, padding included
    pub fn encoded_len(&self) -> usize {
        let options: usize = self.options.iter().map(DhcpOption::encoded_len).sum();
        (OPTIONS_OFFSET + options + 1).max(MIN_MESSAGE_LEN)
    }

    /// Encode into `out`, returning the number of bytes written.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, EncodeError> {
        let needed = self.encoded_len();
        if out.len() < needed {
            return Err(EncodeError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }

        let mut buf = &mut out[..needed];
        buf.put_u8(self.op);
        buf.put_u8(self.htype);
        buf.put_u8(self.hlen);
        buf.put_u8(self.hops);
        buf.put_u32(self.xid);
        buf.put_u16(self.secs);
        buf.put_u16(self.flags);
        buf.put_slice(&self.ciaddr.octets());
        buf.put_slice(&self.yiaddr.octets());
        buf.put_slice(&self.siaddr.octets());
        buf.put_slice(&self.giaddr.octets());
        buf.put_slice(&self.chaddr);
        buf.put_slice(&self.sname);
        buf.put_slice(&self.file);
        buf.put_slice(&MAGIC_COOKIE);
        for option in &self.options {
            option.encode(&mut buf)?;
        }
        buf.put_u8(OptionCode::End as u8);
        let padding = buf.remaining_mut();
        buf.put_bytes(0, padding);

        Ok(needed)
    }

    /// Encode into a freshly allocated buffer
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = vec![0u8; self.encoded_len()];
        let len = self.encode(&mut out)?;
        out.truncate(len);
        Ok(out)
    }

    /// Reply skeleton for `request`: BOOTREPLY over Ethernet with the
    /// transaction id, flags, relay address and hardware address copied.
    pub fn reply_to(request: &Message) -> Self {
        Self {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            xid: request.xid,
            flags: request.flags,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            ..Self::default()
        }
    }

    /// First option with the given code
    pub fn option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|option| option.code() == code)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self.option(OptionCode::MessageType as u8) {
            Some(DhcpOption::MessageType(message_type)) => Some(*message_type),
            _ => None,
        }
    }

    /// Requested option codes, empty when the client sent none
    pub fn parameter_request_list(&self) -> &[u8] {
        match self.option(OptionCode::ParameterRequestList as u8) {
            Some(DhcpOption::ParameterRequestList(codes)) => codes,
            _ => &[],
        }
    }

    pub fn class_identifier(&self) -> Option<&[u8]> {
        match self.option(OptionCode::ClassIdentifier as u8) {
            Some(DhcpOption::ClassIdentifier(class)) => Some(class),
            _ => None,
        }
    }

    /// True when the class identifier contains "PXEClient"
    pub fn is_pxe_client(&self) -> bool {
        self.class_identifier().is_some_and(|class| {
            class
                .windows(PXE_CLIENT_CLASS.len())
                .any(|window| window == PXE_CLIENT_CLASS)
        })
    }

    /// Meaningful prefix of `chaddr` according to `hlen`.
    ///
    /// An out-of-range `hlen` yields the whole field.
    pub fn hardware_address(&self) -> &[u8] {
        match usize::from(self.hlen) {
            len @ 1..=CHADDR_LEN => &self.chaddr[..len],
            _ => &self.chaddr,
        }
    }

    /// Hardware address as colon-separated lowercase hex
    pub fn mac_address(&self) -> String {
        self.hardware_address()
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Boot file name up to the first NUL
    pub fn boot_file_name(&self) -> String {
        fixed_field_str(&self.file)
    }

    pub fn set_boot_file_name(&mut self, name: &str) -> Result<(), EncodeError> {
        self.file = fixed_field("file", name)?;
        Ok(())
    }

    /// Server host name up to the first NUL
    pub fn server_name(&self) -> String {
        fixed_field_str(&self.sname)
    }
}

fn decode_options(mut buf: &[u8]) -> Result<Vec<DhcpOption>, DecodeError> {
    let mut options = Vec::new();

    loop {
        if !buf.has_remaining() {
            return Err(DecodeError::MalformedOptions(
                "option list has no End option".to_string(),
            ));
        }

        let code = buf.get_u8();
        match OptionCode::try_from(code) {
            Ok(OptionCode::Pad) => continue,
            Ok(OptionCode::End) => return Ok(options),
            _ => {}
        }

        if !buf.has_remaining() {
            return Err(DecodeError::MalformedOptions(format!(
                "option {code} is missing its length byte"
            )));
        }
        let len = usize::from(buf.get_u8());
        if buf.remaining() < len {
            return Err(DecodeError::MalformedOptions(format!(
                "option {code} declares {len} bytes but only {} remain",
                buf.remaining()
            )));
        }

        let (value, rest) = buf.split_at(len);
        options.push(DhcpOption::decode(code, value));
        buf = rest;
    }
}

/// Null-padded fixed-width field. The value must leave room for one NUL.
fn fixed_field<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], EncodeError> {
    let bytes = value.as_bytes();
    if bytes.len() >= N {
        return Err(EncodeError::FieldTooLong {
            field,
            len: bytes.len(),
            max: N - 1,
        });
    }
    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn fixed_field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
