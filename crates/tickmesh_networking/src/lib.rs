//! # TICKMESH Networking
//!
//! A small multi-peer session synchronizer for soft-realtime games.
//!
//! ## Architecture
//!
//! Up to [`MAX_PLAYERS`] cooperating processes exchange per-tick state over
//! unreliable UDP. Exactly one peer is the authoritative aggregator (the
//! *master*); the rest report to it (the *slaves*).
//!
//! - **Protocol**: tagged binary messages, payload trimmed to its real size
//! - **Transport**: one non-blocking UDP socket per peer, bounded polling
//! - **Session**: role, peer-slot table, resync flags and timers
//! - **Failure**: per-peer timeout counters and self-promotion
//! - **Departure**: graceful exit and mastership handoff
//!
//! ## Tick Cycle
//!
//! ```text
//! SLAVE                            MASTER
//!   |                                 |
//!   |--- SLAVE_INFO (my state) ------>| get_slave()
//!   |                                 | <- game merges reports
//!   |<-- MASTER_INFO (merged state) --| send_master()
//! get_master()                        |
//! ```
//!
//! The replicated payload is an opaque byte blob. Its meaning belongs to
//! the game layer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tickmesh_networking::{Session, SessionConfig};
//!
//! let mut session = Session::init_as_slave(SessionConfig::default(), "10.0.0.1", "ada")?;
//! loop {
//!     if session.is_master() {
//!         let tick = session.tick_master()?;
//!         // merge tick.reports() into the world...
//!         session.send_master(&world_bytes)?;
//!     } else {
//!         let update = session.tick_slave(&my_bytes)?;
//!         // apply update.payload...
//!     }
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::{ProtocolError, SessionError, SessionResult};
pub use protocol::{
    ExitReason, InitStatus, MasterPayload, Message, Payload, PeerIndex, SlavePayload,
};
pub use session::{
    JoinOutcome, MasterTick, PeerSlot, Role, Session, SlaveUpdate, SlotTable, Status,
    StatusLevel,
};
pub use transport::{
    Delivery, LoopbackNetwork, LoopbackTransport, Transport, TransportStats, UdpTransport,
};

/// Well-known UDP port every peer binds.
pub const NETWORK_PORT: u16 = 4507;

/// Maximum number of peers in one session, master included.
///
/// Active-flag tables travel as a one-byte bitmask, so this must stay <= 8.
pub const MAX_PLAYERS: usize = 3;

/// Maximum player name length in bytes.
pub const PLAYER_NAME_SIZE: usize = 50;

/// Maximum host name length in bytes.
pub const HOST_NAME_SIZE: usize = 50;

/// Maximum master -> slave payload in bytes.
pub const MAX_MASTER_PAYLOAD: usize = 2048;

/// Maximum slave -> master payload in bytes.
pub const MAX_SLAVE_PAYLOAD: usize = 256;

/// Consecutive missed rounds before a peer is presumed gone.
pub const MAX_MSG_TIME_OUTS: u32 = 5;

/// Largest datagram the protocol ever produces.
///
/// MASTER_INFO is the biggest message: header, index, flags, mask,
/// size and a full payload.
pub const MAX_MESSAGE_SIZE: usize = protocol::WireHeader::SIZE + 5 + MAX_MASTER_PAYLOAD;

const _: () = assert!(MAX_PLAYERS <= 8, "active flags are packed into one byte");
