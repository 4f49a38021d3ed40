//! # Wire Protocol
//!
//! Tagged binary messages exchanged between session peers.
//!
//! ## Datagram Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (4 bytes): magic "TM" │ version │ tag                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Body (per tag)                                               │
//! │   INIT        name                                           │
//! │   INIT_ACK    status │ index │ master │ name │ redirect host │
//! │   PLAYER_EXIT index │ reason │ active mask │ addresses       │
//! │   MASTER_INFO index │ resync │ active mask │ size │ payload  │
//! │   SLAVE_INFO  index │ resync │ size │ payload                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Philosophy
//!
//! - Payload-carrying messages are trimmed to the real payload size
//! - Nothing inbound is trusted: indices, lengths and tags are all checked
//! - Strings are length-prefixed and capped

mod messages;
mod serialization;

pub use messages::{
    truncate_text, ExitReason, InitAck, InitStatus, MasterInfo, MasterPayload, Message,
    MessageType, Payload, PeerIndex, PlayerExit, SlaveInfo, SlavePayload, WireHeader,
};
pub use serialization::{decode, pack_flags, unpack_flags, MessageDeserializer, MessageSerializer};
