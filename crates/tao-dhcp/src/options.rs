//! DHCP options (RFC 2132)
//!
//! Each option is a code byte, a length byte and `length` value bytes.
//! Pad (0) and End (255) carry no length. Only the options the engine
//! reads or writes get their own variant; everything else is kept as
//! [`DhcpOption::Unknown`].

use crate::error::EncodeError;
use bytes::BufMut;
use std::fmt;
use std::net::Ipv4Addr;

/// Substring of the class identifier sent by PXE firmware
pub const PXE_CLIENT_CLASS: &[u8] = b"PXEClient";

/// DHCP option codes handled by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DomainServer = 6,
    BroadcastAddress = 28,
    AddressTime = 51,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    ClassIdentifier = 60,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DomainServer),
            28 => Ok(Self::BroadcastAddress),
            51 => Ok(Self::AddressTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            55 => Ok(Self::ParameterRequestList),
            60 => Ok(Self::ClassIdentifier),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message type (option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

/// A decoded DHCP option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Option 1
    SubnetMask(Ipv4Addr),
    /// Option 3, first entry is the default gateway
    Router(Vec<Ipv4Addr>),
    /// Option 6
    DomainServer(Vec<Ipv4Addr>),
    /// Option 28
    BroadcastAddress(Ipv4Addr),
    /// Option 51, lease duration in seconds
    AddressTime(u32),
    /// Option 53
    MessageType(MessageType),
    /// Option 54
    ServerIdentifier(Ipv4Addr),
    /// Option 55, option codes the client wants in the reply
    ParameterRequestList(Vec<u8>),
    /// Option 60, vendor class identifier
    ClassIdentifier(Vec<u8>),
    /// Any other code, value kept verbatim
    Unknown(u8, Vec<u8>),
}

impl DhcpOption {
    /// Wire code of this option
    pub fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DomainServer(_) => OptionCode::DomainServer as u8,
            Self::BroadcastAddress(_) => OptionCode::BroadcastAddress as u8,
            Self::AddressTime(_) => OptionCode::AddressTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::ParameterRequestList(_) => OptionCode::ParameterRequestList as u8,
            Self::ClassIdentifier(_) => OptionCode::ClassIdentifier as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Decode the value bytes of an option with the given code.
    ///
    /// Pad and End never reach here; the option-list walker consumes them.
    /// A known code whose value does not fit its typed form (wrong length,
    /// message type outside 1..=8) is kept as [`DhcpOption::Unknown`] so the
    /// rest of the message still decodes.
    pub fn decode(code: u8, data: &[u8]) -> Self {
        let typed = match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => decode_addr(data).map(Self::SubnetMask),
            Ok(OptionCode::Router) => decode_addr_list(data).map(Self::Router),
            Ok(OptionCode::DomainServer) => decode_addr_list(data).map(Self::DomainServer),
            Ok(OptionCode::BroadcastAddress) => decode_addr(data).map(Self::BroadcastAddress),
            Ok(OptionCode::AddressTime) => <[u8; 4]>::try_from(data)
                .ok()
                .map(|bytes| Self::AddressTime(u32::from_be_bytes(bytes))),
            Ok(OptionCode::MessageType) => match data {
                [value] => MessageType::try_from(*value).ok().map(Self::MessageType),
                _ => None,
            },
            Ok(OptionCode::ServerIdentifier) => decode_addr(data).map(Self::ServerIdentifier),
            Ok(OptionCode::ParameterRequestList) => Some(Self::ParameterRequestList(data.to_vec())),
            Ok(OptionCode::ClassIdentifier) => Some(Self::ClassIdentifier(data.to_vec())),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) | Err(_) => None,
        };

        typed.unwrap_or_else(|| Self::Unknown(code, data.to_vec()))
    }

    fn value_len(&self) -> usize {
        match self {
            Self::SubnetMask(_)
            | Self::BroadcastAddress(_)
            | Self::ServerIdentifier(_)
            | Self::AddressTime(_) => 4,
            Self::MessageType(_) => 1,
            Self::Router(addrs) | Self::DomainServer(addrs) => addrs.len() * 4,
            Self::ParameterRequestList(data)
            | Self::ClassIdentifier(data)
            | Self::Unknown(_, data) => data.len(),
        }
    }

    /// Bytes this option occupies on the wire (code + length + value)
    pub fn encoded_len(&self) -> usize {
        2 + self.value_len()
    }

    /// Write code, length and value
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), EncodeError> {
        let len = self.value_len();
        let len_byte = u8::try_from(len).map_err(|_| EncodeError::OptionTooLong {
            code: self.code(),
            len,
        })?;

        buf.put_u8(self.code());
        buf.put_u8(len_byte);
        match self {
            Self::SubnetMask(addr) | Self::BroadcastAddress(addr) | Self::ServerIdentifier(addr) => {
                buf.put_slice(&addr.octets())
            }
            Self::Router(addrs) | Self::DomainServer(addrs) => {
                for addr in addrs {
                    buf.put_slice(&addr.octets());
                }
            }
            Self::AddressTime(seconds) => buf.put_u32(*seconds),
            Self::MessageType(message_type) => buf.put_u8(*message_type as u8),
            Self::ParameterRequestList(data)
            | Self::ClassIdentifier(data)
            | Self::Unknown(_, data) => buf.put_slice(data),
        }

        Ok(())
    }
}

fn decode_addr(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

fn decode_addr_list(data: &[u8]) -> Option<Vec<Ipv4Addr>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }
    Some(data.chunks_exact(4).filter_map(decode_addr).collect())
}
