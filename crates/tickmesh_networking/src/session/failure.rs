//! Timeout bookkeeping and self-promotion.
//!
//! Silence is never an error. A master charges each silent slave one
//! timeout per round and drops it at the limit; a slave charges the master
//! and, at the limit, takes over a session of its own.

use crate::clock::Clock;
use crate::protocol::PeerIndex;
use crate::transport::Transport;
use crate::MAX_PLAYERS;

use super::{Role, Session};

impl<T: Transport, C: Clock> Session<T, C> {
    /// Master side: the wait ran out with reports still owed.
    pub(super) fn expire_silent(&mut self, need_info: &[bool; MAX_PLAYERS]) {
        let max = self.config.max_timeouts;
        for index in PeerIndex::all().filter(|i| need_info[i.get()]) {
            let slot = self.slots.get_mut(index);
            slot.timeouts += 1;
            if slot.timeouts >= max {
                slot.deactivate();
                tracing::warn!("Player {} timed out after {} silent rounds", index, max);
            } else {
                tracing::debug!("{} silent for {} rounds", index, slot.timeouts);
            }
        }
        self.master_synch = true;
    }

    /// Slave side: the round ended without MASTER_INFO.
    pub(super) fn master_silent(&mut self) {
        if self.new_master {
            // Handoff arrived this round; nothing more to wait for.
            self.master_timeouts = 0;
            return;
        }

        self.master_timeouts += 1;
        if self.master_timeouts >= self.config.max_timeouts {
            tracing::warn!(
                "Master {} silent for {} rounds",
                self.master_index,
                self.master_timeouts
            );
            self.promote_self("Connection timed-out");
        } else {
            tracing::debug!("Master silent for {} rounds", self.master_timeouts);
            self.slave_synch = true;
        }
    }

    /// Takes over with nobody else in the session.
    fn promote_self(&mut self, reason: &str) {
        let own = self.own_index;
        self.role = Role::Master;
        self.master_index = own;
        self.master_addr = Some(self.local_addr());
        self.master_timeouts = 0;
        self.slots.deactivate_others(own);
        self.slots.activate(own, None);
        self.new_master = true;
        self.master_synch = true;
        self.set_info(format!("{reason}: continuing as master"));
    }
}
