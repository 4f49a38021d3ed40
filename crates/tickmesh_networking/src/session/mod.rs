//! # Session Endpoint
//!
//! All mutable protocol state for one peer, owned by one struct.
//!
//! ## Design
//!
//! - Single-threaded: the game loop owns the [`Session`] and drives it once per tick
//! - Every wait is bounded; a silent peer costs one wait budget, never a hang
//! - Timeouts are not errors; they flip resync flags and slot activity
//!
//! ## Roles
//!
//! ```text
//! bootstrap (join)  --ACCEPT-->  Slave  --handoff / timeouts-->  Master
//!        \--REFUSE / NO_CAPACITY / TIME_OUT / local host-->  Master
//! ```
//!
//! The submodules split the endpoint by concern: [`bootstrap`] admission,
//! [`master`] and [`slave`] replication, [`failure`] timeout bookkeeping and
//! [`departure`] for leaving.

mod bootstrap;
mod departure;
mod failure;
mod master;
mod slave;
mod slots;

pub use bootstrap::JoinOutcome;
pub use master::MasterTick;
pub use slave::SlaveUpdate;
pub use slots::{PeerSlot, SlotTable};

use std::fmt;
use std::net::SocketAddr;

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{truncate_text, MasterPayload, Message, PeerIndex};
use crate::transport::{Delivery, MessageChannel, Transport, TransportStats, UdpTransport};
use crate::PLAYER_NAME_SIZE;

/// Which side of the replication loop this peer is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Aggregates reports and broadcasts the authoritative state.
    Master,
    /// Reports local state and applies the broadcast.
    Slave,
}

/// Severity of the last status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusLevel {
    /// Nothing to report.
    #[default]
    Ok,
    /// Something worth showing the player: admitted, redirected, promoted.
    Info,
    /// The session cannot continue.
    Fatal,
}

/// Outcome of the most recent protocol call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    /// Severity.
    pub level: StatusLevel,
    /// Human-readable detail; empty when `level` is `Ok`.
    pub message: String,
}

impl Status {
    fn info(message: impl Into<String>) -> Self {
        Self { level: StatusLevel::Info, message: message.into() }
    }

    fn fatal(message: impl Into<String>) -> Self {
        Self { level: StatusLevel::Fatal, message: message.into() }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.level, self.message)
    }
}

/// One peer's view of the session.
pub struct Session<T: Transport = UdpTransport, C: Clock = SystemClock> {
    channel: MessageChannel<T>,
    clock: C,
    config: SessionConfig,
    player_name: String,

    role: Role,
    own_index: PeerIndex,
    master_index: PeerIndex,
    master_addr: Option<SocketAddr>,
    slots: SlotTable,

    /// Next broadcast is a full refresh.
    master_synch: bool,
    /// A slave asked for (or this slave needs) a full refresh.
    slave_synch: bool,
    /// Promoted and not yet broadcast.
    new_master: bool,
    /// Consecutive rounds without MASTER_INFO.
    master_timeouts: u32,
    /// Latched by `leave`.
    terminated: bool,
    /// Master admits new players.
    accepting: bool,

    /// Last authoritative state, sent or received.
    master_payload: MasterPayload,
    status: Status,
}

impl Session {
    /// Binds the configured UDP port and starts a session as its master.
    pub fn init_as_master(config: SessionConfig, player_name: &str) -> SessionResult<Self> {
        let transport = UdpTransport::bind(config.bind_socket_addr())?;
        let mut session = Self::new(config, transport, SystemClock)?;
        session.start_master(player_name)?;
        Ok(session)
    }

    /// Binds the configured UDP port and joins the session run by `master_host`.
    ///
    /// Falls back to mastering a session of its own when the host refuses,
    /// is full, is silent, or is this machine; see [`Session::status`].
    pub fn init_as_slave(
        config: SessionConfig,
        master_host: &str,
        player_name: &str,
    ) -> SessionResult<Self> {
        let transport = UdpTransport::bind(config.bind_socket_addr())?;
        let mut session = Self::new(config, transport, SystemClock)?;
        session.join(master_host, player_name)?;
        Ok(session)
    }
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Creates an idle session over an existing transport.
    ///
    /// Call [`Session::start_master`] or [`Session::join`] next.
    pub fn new(config: SessionConfig, transport: T, clock: C) -> SessionResult<Self> {
        config.validate()?;
        Ok(Self {
            channel: MessageChannel::new(transport),
            clock,
            config,
            player_name: String::new(),
            role: Role::Slave,
            own_index: PeerIndex::FIRST,
            master_index: PeerIndex::FIRST,
            master_addr: None,
            slots: SlotTable::new(),
            master_synch: false,
            slave_synch: false,
            new_master: false,
            master_timeouts: 0,
            terminated: false,
            accepting: true,
            master_payload: MasterPayload::empty(),
            status: Status::default(),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Current role.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns true while this peer is the master.
    #[inline]
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// This peer's slot.
    #[inline]
    #[must_use]
    pub const fn own_index(&self) -> PeerIndex {
        self.own_index
    }

    /// Slot of the peer currently believed to be master.
    #[inline]
    #[must_use]
    pub const fn master_index(&self) -> PeerIndex {
        self.master_index
    }

    /// Address of the peer currently believed to be master.
    #[must_use]
    pub const fn master_addr(&self) -> Option<SocketAddr> {
        self.master_addr
    }

    /// The peer table.
    #[must_use]
    pub const fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Active flags in slot order.
    #[must_use]
    pub fn current_players(&self) -> [bool; crate::MAX_PLAYERS] {
        self.slots.active_flags()
    }

    /// Outcome of the last protocol call.
    #[must_use]
    pub const fn status(&self) -> &Status {
        &self.status
    }

    /// Next broadcast is (or the last one received was) a full refresh.
    #[must_use]
    pub const fn master_synch(&self) -> bool {
        self.master_synch
    }

    /// A full refresh was requested.
    #[must_use]
    pub const fn slave_synch(&self) -> bool {
        self.slave_synch
    }

    /// Promoted and still owing the first broadcast.
    #[must_use]
    pub const fn new_master(&self) -> bool {
        self.new_master
    }

    /// Returns true once `leave` ran.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Name this peer joined under.
    #[must_use]
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// Last authoritative state sent or received.
    #[must_use]
    pub const fn master_payload(&self) -> &MasterPayload {
        &self.master_payload
    }

    /// Address the session socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.channel.transport().local_addr()
    }

    /// Socket statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        self.channel.stats()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Knobs
    // ------------------------------------------------------------------

    /// Opens or closes admissions. Closed masters answer INIT with REFUSE.
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    /// Forces a full refresh on the next exchange.
    ///
    /// A master flags its next broadcast; call it between `tick_master` and
    /// `send_master`. A slave flags its next report.
    pub fn request_resync(&mut self) {
        if self.is_master() {
            self.master_synch = true;
        } else {
            self.slave_synch = true;
        }
    }

    // ------------------------------------------------------------------
    // Internals shared by the submodules
    // ------------------------------------------------------------------

    /// Entry check of every protocol call.
    fn begin(&mut self) -> SessionResult<()> {
        if self.terminated {
            return Err(SessionError::Terminated);
        }
        self.status = Status::default();
        Ok(())
    }

    /// Records a fatal failure in the status before handing it back.
    fn finish<R>(&mut self, result: SessionResult<R>) -> SessionResult<R> {
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::error!("Session failure: {}", err);
                self.status = Status::fatal(err.to_string());
            }
        }
        result
    }

    fn set_info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.status = Status::info(message);
    }

    fn set_player_name(&mut self, player_name: &str) {
        let name = if player_name.is_empty() { "Unknown" } else { player_name };
        self.player_name = truncate_text(name, PLAYER_NAME_SIZE).to_owned();
    }

    fn send(&mut self, message: &Message, addr: SocketAddr) -> SessionResult<()> {
        self.channel.send(message, addr)
    }

    fn receive(&mut self, wait: bool) -> SessionResult<Delivery> {
        self.channel.receive(
            &self.clock,
            self.config.message_wait(),
            self.config.retry_interval(),
            wait,
        )
    }

    /// Takes the master seat in slot zero with an otherwise empty table.
    fn become_master(&mut self) {
        self.role = Role::Master;
        self.own_index = PeerIndex::FIRST;
        self.master_index = PeerIndex::FIRST;
        let local = self.local_addr();
        self.master_addr = Some(local);
        self.slots = SlotTable::new();
        self.slots.activate(self.own_index, Some(local));
        self.master_timeouts = 0;
    }
}

impl<T: Transport, C: Clock> fmt::Debug for Session<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("own_index", &self.own_index)
            .field("master_index", &self.master_index)
            .field("master_addr", &self.master_addr)
            .field("active", &self.slots.active_flags())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
