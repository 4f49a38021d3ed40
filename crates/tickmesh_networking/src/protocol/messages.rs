//! # Message Definitions
//!
//! Every message type exchanged between peers.
//!
//! ## Payload Design
//!
//! Replicated state travels as a fixed-capacity [`Payload`] with an explicit
//! length. The buffer is `Copy` and stack-allocated; only `len` bytes ever
//! reach the wire.

use std::fmt;
use std::net::SocketAddr;

use bytemuck::{Pod, Zeroable};

use crate::error::ProtocolError;
use crate::{MAX_MASTER_PAYLOAD, MAX_PLAYERS, MAX_SLAVE_PAYLOAD};

/// Header - present in every datagram.
///
/// Total size: 4 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct WireHeader {
    /// Protocol magic, always [`WireHeader::MAGIC`].
    pub magic: [u8; 2],
    /// Protocol version.
    pub version: u8,
    /// Message tag, see [`MessageType`].
    pub tag: u8,
}

impl WireHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 4;
    /// Magic bytes identifying our datagrams on the shared port.
    pub const MAGIC: [u8; 2] = *b"TM";
    /// Current protocol version.
    pub const VERSION: u8 = 1;

    /// Creates a header for the given message type.
    #[inline]
    #[must_use]
    pub const fn new(message_type: MessageType) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            tag: message_type as u8,
        }
    }

    /// Returns true if magic and version match ours.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == Self::MAGIC && self.version == Self::VERSION
    }
}

/// Wire tags.
///
/// There is no tag for a timeout: "nothing arrived" is a local
/// [`Delivery::TimeOut`](crate::transport::Delivery) and never leaves the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Joiner -> master: admission request.
    Init = 0,
    /// Master/slave -> joiner: admission verdict.
    InitAck = 1,
    /// Departure notice, or mastership handoff when sent by a master.
    PlayerExit = 2,
    /// Master -> slaves: authoritative state.
    MasterInfo = 3,
    /// Slave -> master: per-tick report.
    SlaveInfo = 4,
}

impl MessageType {
    /// Decodes a wire tag.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Init),
            1 => Some(Self::InitAck),
            2 => Some(Self::PlayerExit),
            3 => Some(Self::MasterInfo),
            4 => Some(Self::SlaveInfo),
            _ => None,
        }
    }
}

/// Index of a peer slot, always `< MAX_PLAYERS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerIndex(u8);

impl PeerIndex {
    /// Slot zero - where a fresh or self-promoted master sits.
    pub const FIRST: Self = Self(0);

    /// Creates an index, or `None` if it falls outside the slot table.
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_PLAYERS {
            #[allow(clippy::cast_possible_truncation)]
            let byte = index as u8;
            Some(Self(byte))
        } else {
            None
        }
    }

    /// Decodes an index from its wire byte.
    pub const fn from_wire(byte: u8) -> Result<Self, ProtocolError> {
        if (byte as usize) < MAX_PLAYERS {
            Ok(Self(byte))
        } else {
            Err(ProtocolError::InvalidIndex(byte))
        }
    }

    /// Position in the slot table.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Wire byte.
    #[inline]
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        self.0
    }

    /// Iterates over every slot index.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..MAX_PLAYERS).filter_map(Self::new)
    }
}

impl fmt::Display for PeerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Admission verdict carried by INIT_ACK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum InitStatus {
    /// Joiner got a slot.
    Accept = 0,
    /// Master is not admitting anyone.
    Refuse = 1,
    /// Every slot is taken.
    NoCapacity = 2,
    /// Contacted peer is not the master; try `redirect_host`.
    Redirect = 3,
}

impl InitStatus {
    /// Decodes a wire byte.
    pub const fn from_wire(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Accept),
            1 => Ok(Self::Refuse),
            2 => Ok(Self::NoCapacity),
            3 => Ok(Self::Redirect),
            _ => Err(ProtocolError::UnknownValue { field: "init status", value }),
        }
    }
}

/// Why a peer left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitReason {
    /// Won the game.
    Winner = 0,
    /// Was eliminated.
    Killed = 1,
    /// Closed the game.
    #[default]
    Quit = 2,
}

impl ExitReason {
    /// Decodes a wire byte.
    pub const fn from_wire(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Winner),
            1 => Ok(Self::Killed),
            2 => Ok(Self::Quit),
            _ => Err(ProtocolError::UnknownValue { field: "exit reason", value }),
        }
    }
}

/// Opaque replicated state with an explicit size.
#[derive(Clone, Copy)]
pub struct Payload<const MAX: usize> {
    len: u16,
    bytes: [u8; MAX],
}

/// Master -> slave payload.
pub type MasterPayload = Payload<MAX_MASTER_PAYLOAD>;

/// Slave -> master payload.
pub type SlavePayload = Payload<MAX_SLAVE_PAYLOAD>;

impl<const MAX: usize> Payload<MAX> {
    /// Capacity in bytes.
    pub const CAPACITY: usize = MAX;

    /// Creates an empty payload.
    #[must_use]
    pub const fn empty() -> Self {
        Self { len: 0, bytes: [0; MAX] }
    }

    /// Copies `data` into a payload.
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut payload = Self::empty();
        payload.set(data)?;
        Ok(payload)
    }

    /// Replaces the contents with `data`.
    pub fn set(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > MAX {
            return Err(ProtocolError::PayloadTooLarge { len: data.len(), max: MAX });
        }
        self.bytes[..data.len()].copy_from_slice(data);
        #[allow(clippy::cast_possible_truncation)]
        let len = data.len() as u16;
        self.len = len;
        Ok(())
    }

    /// The meaningful bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Number of meaningful bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true if the payload carries no bytes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const MAX: usize> Default for Payload<MAX> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const MAX: usize> PartialEq for Payload<MAX> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<const MAX: usize> Eq for Payload<MAX> {}

impl<const MAX: usize> fmt::Debug for Payload<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.len)
            .field("capacity", &MAX)
            .finish()
    }
}

/// INIT_ACK body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitAck {
    /// Verdict.
    pub status: InitStatus,
    /// Slot assigned to the joiner (meaningful on `Accept`).
    pub player_index: PeerIndex,
    /// Slot of the admitting master.
    pub master_index: PeerIndex,
    /// Admitting master's player name.
    pub master_name: String,
    /// Where to go instead (meaningful on `Redirect`).
    pub redirect_host: String,
}

impl InitAck {
    /// A verdict with no slot assignment.
    #[must_use]
    pub fn verdict(status: InitStatus) -> Self {
        Self {
            status,
            player_index: PeerIndex::FIRST,
            master_index: PeerIndex::FIRST,
            master_name: String::new(),
            redirect_host: String::new(),
        }
    }
}

/// PLAYER_EXIT body.
///
/// From a slave it is a plain departure notice. From a master the tables are
/// filled in and the lowest remaining active peer takes over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerExit {
    /// Departing peer.
    pub player_index: PeerIndex,
    /// Why it left.
    pub reason: ExitReason,
    /// Active flags after the departure.
    pub active: [bool; MAX_PLAYERS],
    /// Peer addresses known to the sender.
    pub addresses: [Option<SocketAddr>; MAX_PLAYERS],
}

impl PlayerExit {
    /// A departure notice with empty tables.
    #[must_use]
    pub fn notice(player_index: PeerIndex, reason: ExitReason) -> Self {
        Self {
            player_index,
            reason,
            active: [false; MAX_PLAYERS],
            addresses: [None; MAX_PLAYERS],
        }
    }
}

/// MASTER_INFO body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterInfo {
    /// Sender's slot.
    pub master_index: PeerIndex,
    /// Payload is a full refresh; slaves must resynchronize.
    pub resync: bool,
    /// Master's view of who is in the session.
    pub active: [bool; MAX_PLAYERS],
    /// Authoritative state.
    pub payload: MasterPayload,
}

/// SLAVE_INFO body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaveInfo {
    /// Sender's slot.
    pub player_index: PeerIndex,
    /// Sender asks for a full refresh.
    pub resync_request: bool,
    /// Sender's local state.
    pub payload: SlavePayload,
}

/// Every message that can cross the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Admission request.
    Init {
        /// Joiner's player name.
        player_name: String,
    },
    /// Admission verdict.
    InitAck(InitAck),
    /// Departure or handoff.
    PlayerExit(PlayerExit),
    /// Authoritative broadcast.
    MasterInfo(MasterInfo),
    /// Slave report.
    SlaveInfo(SlaveInfo),
}

impl Message {
    /// Returns the message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Init { .. } => MessageType::Init,
            Self::InitAck(_) => MessageType::InitAck,
            Self::PlayerExit(_) => MessageType::PlayerExit,
            Self::MasterInfo(_) => MessageType::MasterInfo,
            Self::SlaveInfo(_) => MessageType::SlaveInfo,
        }
    }
}

/// Cuts `text` to at most `max` bytes without splitting a character.
#[must_use]
pub fn truncate_text(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
