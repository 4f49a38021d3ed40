//! Slave half of the replication loop.
//!
//! Each tick: report local state with [`Session::send_slave`], then take
//! in the master's broadcast with [`Session::get_master`].
//! [`Session::tick_slave`] does both and completes a pending promotion.

use std::net::SocketAddr;

use crate::clock::Clock;
use crate::error::SessionResult;
use crate::protocol::{MasterInfo, MasterPayload, Message, PeerIndex, PlayerExit, SlaveInfo};
use crate::transport::{Delivery, Transport};

use super::{Role, Session};

/// What one slave round produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaveUpdate {
    /// Newest authoritative state, if any arrived.
    pub payload: Option<MasterPayload>,
    /// The master declared a full refresh.
    pub resync: bool,
    /// This peer became master during the round and already broadcast.
    pub promoted: bool,
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Per-tick entry point of a slave.
    ///
    /// Reports `payload`, waits for the broadcast, and if the round ended
    /// with this peer promoted, immediately broadcasts the last known state
    /// so the remaining slaves are not stalled. Switch to
    /// [`Session::tick_master`] once `promoted` is set.
    pub fn tick_slave(&mut self, payload: &[u8]) -> SessionResult<SlaveUpdate> {
        self.send_slave(payload)?;
        let received = self.get_master()?;

        let promoted = self.new_master;
        if promoted {
            let result = self.broadcast();
            self.finish(result)?;
        }

        Ok(SlaveUpdate { payload: received, resync: self.master_synch, promoted })
    }

    /// Sends this peer's state to the master.
    pub fn send_slave(&mut self, payload: &[u8]) -> SessionResult<()> {
        self.begin()?;
        let own = self.own_index;
        self.slots.get_mut(own).payload.set(payload)?;

        if self.is_master() {
            tracing::debug!("Not reporting: this peer is master");
            return Ok(());
        }
        let Some(master_addr) = self.master_addr else {
            tracing::debug!("No master to report to yet");
            return Ok(());
        };
        let report = Message::SlaveInfo(SlaveInfo {
            player_index: own,
            resync_request: self.slave_synch,
            payload: self.slots.get(own).payload,
        });
        let result = self.send(&report, master_addr);
        self.finish(result)
    }

    /// Waits for the master's broadcast.
    ///
    /// Returns the newest payload that arrived. Joiners are redirected to
    /// the master; a handoff from the master makes this peer master; a
    /// silent round counts toward self-promotion.
    pub fn get_master(&mut self) -> SessionResult<Option<MasterPayload>> {
        self.begin()?;
        let result = self.await_broadcast();
        self.finish(result)
    }

    fn await_broadcast(&mut self) -> SessionResult<Option<MasterPayload>> {
        self.master_synch = false;
        self.slave_synch = false;

        let mut received = None;
        loop {
            let (message, from) = match self.receive(received.is_none())? {
                Delivery::Message { message, from } => (message, from),
                Delivery::TimeOut => {
                    if received.is_none() {
                        self.master_silent();
                    }
                    return Ok(received);
                }
            };

            match message {
                Message::MasterInfo(info) => {
                    self.ingest_broadcast(&info, from, received.is_some());
                    received = Some(info.payload);
                }
                // A handoff earlier in the round makes us the one to admit.
                Message::Init { player_name } if self.is_master() => {
                    self.admit(&player_name, from)?;
                }
                Message::Init { player_name } => self.redirect(&player_name, from)?,
                Message::PlayerExit(exit) => {
                    if exit.player_index == self.master_index && !self.new_master {
                        self.take_over(&exit);
                    } else if exit.player_index != self.own_index {
                        tracing::info!("Player {} left", exit.player_index);
                        self.slots.deactivate(exit.player_index);
                    }
                }
                Message::SlaveInfo(info) => {
                    tracing::debug!(
                        "Ignoring SLAVE_INFO from {} ({}): not master",
                        from,
                        info.player_index
                    );
                }
                Message::InitAck(_) => {
                    tracing::debug!("Ignoring stray INIT_ACK from {}", from);
                }
            }
        }
    }

    fn ingest_broadcast(&mut self, info: &MasterInfo, from: SocketAddr, duplicate: bool) {
        if duplicate && !self.new_master {
            tracing::warn!("Straggler MASTER_INFO from {}", from);
            self.slave_synch = true;
        }

        self.master_timeouts = 0;
        self.master_synch |= info.resync || self.new_master;
        self.master_payload = info.payload;

        // A fresh promotion keeps local authority over stale broadcasts.
        if self.new_master {
            return;
        }
        self.master_index = info.master_index;
        self.master_addr = Some(from);

        let own = self.own_index;
        for index in PeerIndex::all().filter(|&i| i != own) {
            if info.active[index.get()] {
                if !self.slots.is_active(index) {
                    self.slots.activate(index, None);
                }
            } else {
                self.slots.deactivate(index);
            }
        }
        self.slots.activate(info.master_index, Some(from));
        self.slots.activate(own, None);
    }

    /// The departing master picked us.
    fn take_over(&mut self, exit: &PlayerExit) {
        let own = self.own_index;
        for index in PeerIndex::all().filter(|&i| i != own) {
            let slot = self.slots.get_mut(index);
            slot.addr = exit.addresses[index.get()];
            if exit.active[index.get()] {
                slot.activate(None);
            } else {
                slot.deactivate();
            }
        }

        self.role = Role::Master;
        self.master_index = own;
        self.master_addr = Some(self.local_addr());
        self.master_timeouts = 0;
        self.new_master = true;
        self.master_synch = true;
        self.set_info(format!(
            "Player {} left ({:?}): taking over as master",
            exit.player_index, exit.reason
        ));
    }
}
