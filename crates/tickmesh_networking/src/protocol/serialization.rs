//! # Message Serialization
//!
//! Allocation-free encoding into a reusable buffer, bounds-checked decoding.
//!
//! ## Design
//!
//! - One pre-allocated buffer per serializer, reused for every send
//! - MASTER_INFO/SLAVE_INFO carry only the payload's real size
//! - Every inbound length is clamped before it is trusted

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytemuck::bytes_of;

use super::messages::{
    truncate_text, ExitReason, InitAck, InitStatus, MasterInfo, Message, MessageType, Payload,
    PeerIndex, PlayerExit, SlaveInfo, WireHeader,
};
use crate::error::ProtocolError;
use crate::{HOST_NAME_SIZE, MAX_MESSAGE_SIZE, MAX_PLAYERS, PLAYER_NAME_SIZE};

/// Address family byte: no address.
const FAMILY_NONE: u8 = 0;
/// Address family byte: IPv4.
const FAMILY_V4: u8 = 4;
/// Address family byte: IPv6.
const FAMILY_V6: u8 = 6;

/// Packs active flags into a bitmask, bit `i` for slot `i`.
#[must_use]
pub fn pack_flags(flags: &[bool; MAX_PLAYERS]) -> u8 {
    flags
        .iter()
        .enumerate()
        .fold(0u8, |mask, (i, &on)| if on { mask | (1 << i) } else { mask })
}

/// Unpacks a bitmask; bits beyond `MAX_PLAYERS` are ignored.
#[must_use]
pub fn unpack_flags(mask: u8) -> [bool; MAX_PLAYERS] {
    let mut flags = [false; MAX_PLAYERS];
    for (i, flag) in flags.iter_mut().enumerate() {
        *flag = mask & (1 << i) != 0;
    }
    flags
}

/// Message serializer - writes messages to a pre-allocated buffer.
///
/// Reused across sends to avoid allocations.
pub struct MessageSerializer {
    buffer: [u8; MAX_MESSAGE_SIZE],
    position: usize,
}

impl MessageSerializer {
    /// Creates a new serializer with a fresh buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0u8; MAX_MESSAGE_SIZE],
            position: 0,
        }
    }

    /// Resets the serializer for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.position
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    /// Writes raw bytes.
    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.position + bytes.len() > MAX_MESSAGE_SIZE {
            return false;
        }
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        true
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) -> bool {
        self.write_bytes(&[value])
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) -> bool {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a boolean as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) -> bool {
        self.write_u8(u8::from(value))
    }

    /// Writes the datagram header.
    #[inline]
    pub fn write_header(&mut self, header: &WireHeader) -> bool {
        self.write_bytes(bytes_of(header))
    }

    /// Writes a length-prefixed string, cut to `max` bytes.
    pub fn write_text(&mut self, text: &str, max: usize) -> bool {
        let text = truncate_text(text, max.min(usize::from(u8::MAX)));
        #[allow(clippy::cast_possible_truncation)]
        let len = text.len() as u8;
        self.write_u8(len) && self.write_bytes(text.as_bytes())
    }

    /// Writes an optional socket address.
    pub fn write_addr(&mut self, addr: Option<SocketAddr>) -> bool {
        match addr {
            None => self.write_u8(FAMILY_NONE),
            Some(SocketAddr::V4(v4)) => {
                self.write_u8(FAMILY_V4)
                    && self.write_bytes(&v4.ip().octets())
                    && self.write_u16(v4.port())
            }
            Some(SocketAddr::V6(v6)) => {
                self.write_u8(FAMILY_V6)
                    && self.write_bytes(&v6.ip().octets())
                    && self.write_u16(v6.port())
            }
        }
    }

    /// Writes a payload trimmed to its real size.
    pub fn write_payload<const MAX: usize>(&mut self, payload: &Payload<MAX>) -> bool {
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u16;
        self.write_u16(len) && self.write_bytes(payload.as_slice())
    }

    /// Serializes a complete message, returning the datagram bytes.
    pub fn serialize(&mut self, message: &Message) -> Result<&[u8], ProtocolError> {
        self.reset();
        let ok = self.write_header(&WireHeader::new(message.message_type()))
            && match message {
                Message::Init { player_name } => self.write_text(player_name, PLAYER_NAME_SIZE),
                Message::InitAck(ack) => self.write_init_ack(ack),
                Message::PlayerExit(exit) => self.write_player_exit(exit),
                Message::MasterInfo(info) => {
                    self.write_u8(info.master_index.to_wire())
                        && self.write_bool(info.resync)
                        && self.write_u8(pack_flags(&info.active))
                        && self.write_payload(&info.payload)
                }
                Message::SlaveInfo(info) => {
                    self.write_u8(info.player_index.to_wire())
                        && self.write_bool(info.resync_request)
                        && self.write_payload(&info.payload)
                }
            };

        if ok {
            Ok(self.as_slice())
        } else {
            Err(ProtocolError::Overflow(MAX_MESSAGE_SIZE))
        }
    }

    fn write_init_ack(&mut self, ack: &InitAck) -> bool {
        self.write_u8(ack.status as u8)
            && self.write_u8(ack.player_index.to_wire())
            && self.write_u8(ack.master_index.to_wire())
            && self.write_text(&ack.master_name, PLAYER_NAME_SIZE)
            && self.write_text(&ack.redirect_host, HOST_NAME_SIZE)
    }

    fn write_player_exit(&mut self, exit: &PlayerExit) -> bool {
        if !(self.write_u8(exit.player_index.to_wire())
            && self.write_u8(exit.reason as u8)
            && self.write_u8(pack_flags(&exit.active)))
        {
            return false;
        }
        exit.addresses.iter().all(|addr| self.write_addr(*addr))
    }
}

impl Default for MessageSerializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Message deserializer - reads one message from a datagram.
pub struct MessageDeserializer<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MessageDeserializer<'a> {
    /// Creates a new deserializer from a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Reads `len` raw bytes.
    #[inline]
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::Truncated);
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a boolean; any non-zero byte is true.
    #[inline]
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads the datagram header.
    pub fn read_header(&mut self) -> Result<WireHeader, ProtocolError> {
        let bytes = self.read_bytes(WireHeader::SIZE)?;
        bytemuck::try_pod_read_unaligned(bytes).map_err(|_| ProtocolError::Truncated)
    }

    /// Reads a length-prefixed string, cut to `max` bytes.
    pub fn read_text(&mut self, max: usize) -> Result<String, ProtocolError> {
        let len = usize::from(self.read_u8()?);
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidText)?;
        Ok(truncate_text(text, max).to_owned())
    }

    /// Reads an optional socket address.
    pub fn read_addr(&mut self) -> Result<Option<SocketAddr>, ProtocolError> {
        match self.read_u8()? {
            FAMILY_NONE => Ok(None),
            FAMILY_V4 => {
                let b = self.read_bytes(4)?;
                let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
                let port = self.read_u16()?;
                Ok(Some(SocketAddr::new(IpAddr::V4(ip), port)))
            }
            FAMILY_V6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(self.read_bytes(16)?);
                let port = self.read_u16()?;
                Ok(Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)))
            }
            other => Err(ProtocolError::InvalidAddress(other)),
        }
    }

    /// Reads a payload.
    ///
    /// The declared size is clamped to the payload capacity, then exactly
    /// that many bytes must follow.
    pub fn read_payload<const MAX: usize>(&mut self) -> Result<Payload<MAX>, ProtocolError> {
        let declared = usize::from(self.read_u16()?);
        let len = declared.min(MAX);
        let bytes = self.read_bytes(len)?;
        Payload::from_slice(bytes)
    }

    /// Deserializes a message from the buffer.
    pub fn deserialize(&mut self) -> Result<Message, ProtocolError> {
        let header = self.read_header()?;
        if !header.is_valid() {
            return Err(ProtocolError::BadHeader {
                magic: u16::from_le_bytes(header.magic),
                version: header.version,
            });
        }

        let message_type =
            MessageType::from_u8(header.tag).ok_or(ProtocolError::UnknownTag(header.tag))?;

        match message_type {
            MessageType::Init => Ok(Message::Init {
                player_name: self.read_text(PLAYER_NAME_SIZE)?,
            }),
            MessageType::InitAck => Ok(Message::InitAck(InitAck {
                status: InitStatus::from_wire(self.read_u8()?)?,
                player_index: PeerIndex::from_wire(self.read_u8()?)?,
                master_index: PeerIndex::from_wire(self.read_u8()?)?,
                master_name: self.read_text(PLAYER_NAME_SIZE)?,
                redirect_host: self.read_text(HOST_NAME_SIZE)?,
            })),
            MessageType::PlayerExit => {
                let player_index = PeerIndex::from_wire(self.read_u8()?)?;
                let reason = ExitReason::from_wire(self.read_u8()?)?;
                let active = unpack_flags(self.read_u8()?);
                let mut addresses = [None; MAX_PLAYERS];
                for addr in &mut addresses {
                    *addr = self.read_addr()?;
                }
                Ok(Message::PlayerExit(PlayerExit {
                    player_index,
                    reason,
                    active,
                    addresses,
                }))
            }
            MessageType::MasterInfo => Ok(Message::MasterInfo(MasterInfo {
                master_index: PeerIndex::from_wire(self.read_u8()?)?,
                resync: self.read_bool()?,
                active: unpack_flags(self.read_u8()?),
                payload: self.read_payload()?,
            })),
            MessageType::SlaveInfo => Ok(Message::SlaveInfo(SlaveInfo {
                player_index: PeerIndex::from_wire(self.read_u8()?)?,
                resync_request: self.read_bool()?,
                payload: self.read_payload()?,
            })),
        }
    }
}

/// Decodes one datagram.
pub fn decode(datagram: &[u8]) -> Result<Message, ProtocolError> {
    MessageDeserializer::new(datagram).deserialize()
}
