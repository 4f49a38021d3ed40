//! Leaving a session.
//!
//! A slave just says goodbye to its master. A master hands its tables to
//! the lowest-indexed remaining peer, which takes over on receipt. Either
//! way the send is best effort: a short delay gives the datagram time to
//! leave before the socket goes away, nothing more.

use crate::clock::Clock;
use crate::error::SessionResult;
use crate::protocol::{ExitReason, Message, PlayerExit};
use crate::transport::Transport;

use super::{Session, Status};

impl<T: Transport, C: Clock> Session<T, C> {
    /// Leaves the session.
    ///
    /// Only the first call does anything; later calls return `Ok` and send
    /// nothing. Every other protocol call fails with
    /// [`SessionError::Terminated`](crate::SessionError::Terminated) afterwards.
    pub fn leave(&mut self, reason: ExitReason) -> SessionResult<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.status = Status::default();

        let result = self.announce_exit(reason);
        let result = self.finish(result);
        if result.is_ok() {
            self.clock.sleep(self.config.exit_delay());
        }
        result
    }

    fn announce_exit(&mut self, reason: ExitReason) -> SessionResult<()> {
        let own = self.own_index;
        self.slots.deactivate(own);

        if !self.is_master() {
            let Some(master_addr) = self.master_addr else {
                return Ok(());
            };
            tracing::info!("{} leaving ({:?})", self.player_name, reason);
            return self.send(&Message::PlayerExit(PlayerExit::notice(own, reason)), master_addr);
        }

        let Some(successor) = self.slots.lowest_active(own) else {
            tracing::info!("Last player leaving, session closed");
            return Ok(());
        };
        let handoff = PlayerExit {
            player_index: own,
            reason,
            active: self.slots.active_flags(),
            addresses: self.slots.addresses(),
        };
        self.slots.deactivate_others(successor);
        self.master_synch = true;

        let Some(addr) = self.slots.get(successor).addr else {
            tracing::warn!("Successor {} has no known address", successor);
            return Ok(());
        };
        tracing::info!("Handing mastership to {} at {}", successor, addr);
        self.send(&Message::PlayerExit(handoff), addr)
    }
}
