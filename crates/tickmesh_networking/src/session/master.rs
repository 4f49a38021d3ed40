//! Master half of the replication loop.
//!
//! Each tick: [`Session::tick_master`] gathers slave reports (and handles
//! joins and exits on the way), the game merges them, then
//! [`Session::send_master`] fans the merged state out.

use std::net::SocketAddr;

use crate::clock::Clock;
use crate::error::SessionResult;
use crate::protocol::{MasterInfo, Message, PeerIndex, SlaveInfo, SlavePayload};
use crate::transport::{Delivery, Transport};
use crate::MAX_PLAYERS;

use super::Session;

/// What one master round collected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MasterTick {
    /// Reports received this round, by slot.
    pub reports: [Option<SlavePayload>; MAX_PLAYERS],
    /// The next broadcast must be a full refresh.
    pub resync: bool,
}

impl MasterTick {
    /// Iterates over the slots that reported.
    pub fn reports(&self) -> impl Iterator<Item = (PeerIndex, &SlavePayload)> {
        PeerIndex::all().filter_map(|i| self.reports[i.get()].as_ref().map(|p| (i, p)))
    }
}

/// Slots still owing a report this round.
struct Pending {
    need_info: [bool; MAX_PLAYERS],
    count: usize,
}

impl Pending {
    fn expect(&mut self, index: PeerIndex) {
        if !self.need_info[index.get()] {
            self.need_info[index.get()] = true;
            self.count += 1;
        }
    }

    /// Returns false if `index` was not owed.
    fn settle(&mut self, index: PeerIndex) -> bool {
        let owed = self.need_info[index.get()];
        if owed {
            self.need_info[index.get()] = false;
            self.count -= 1;
        }
        owed
    }
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Per-tick entry point of a master. Same as [`Session::get_slave`].
    pub fn tick_master(&mut self) -> SessionResult<MasterTick> {
        self.get_slave()
    }

    /// Collects this round's slave reports.
    ///
    /// Waits until every active slave has reported or the wait budget runs
    /// out, then drains whatever else is queued without waiting. Silent
    /// slaves are charged a timeout; stragglers, admissions, departures and
    /// expiries all raise the resync flag for the next broadcast.
    pub fn get_slave(&mut self) -> SessionResult<MasterTick> {
        self.begin()?;
        let result = self.collect_reports();
        self.finish(result)
    }

    fn collect_reports(&mut self) -> SessionResult<MasterTick> {
        self.master_synch = false;
        self.slave_synch = false;

        let mut pending = Pending { need_info: [false; MAX_PLAYERS], count: 0 };
        for (index, _) in self.slots.iter_active(self.own_index) {
            pending.expect(index);
        }
        let mut reports = [None; MAX_PLAYERS];

        loop {
            let (message, from) = match self.receive(pending.count > 0)? {
                Delivery::Message { message, from } => (message, from),
                Delivery::TimeOut => {
                    if pending.count > 0 {
                        self.expire_silent(&pending.need_info);
                    }
                    break;
                }
            };

            match message {
                Message::SlaveInfo(info) => {
                    self.store_report(&info, &mut pending);
                    reports[info.player_index.get()] = Some(info.payload);
                }
                Message::Init { player_name } => {
                    if let Some(index) = self.admit(&player_name, from)? {
                        pending.expect(index);
                    }
                }
                Message::PlayerExit(exit) => {
                    self.drop_player(exit.player_index, from);
                    pending.settle(exit.player_index);
                }
                Message::MasterInfo(info) => {
                    tracing::warn!(
                        "Ignoring MASTER_INFO from {} claiming master {}",
                        from,
                        info.master_index
                    );
                }
                Message::InitAck(_) => {
                    tracing::debug!("Ignoring stray INIT_ACK from {}", from);
                }
            }
        }

        Ok(MasterTick { reports, resync: self.master_synch })
    }

    fn store_report(&mut self, info: &SlaveInfo, pending: &mut Pending) {
        let index = info.player_index;
        if !pending.settle(index) {
            // Already reported, or from a slot given up on; keep the data
            // but refresh everyone.
            tracing::warn!("Straggler report from {}", index);
            self.master_synch = true;
        }
        if info.resync_request {
            tracing::debug!("{} requested a resync", index);
            self.master_synch = true;
            self.slave_synch = true;
        }

        let slot = self.slots.get_mut(index);
        slot.payload = info.payload;
        if slot.active {
            slot.timeouts = 0;
        }
    }

    fn drop_player(&mut self, index: PeerIndex, from: SocketAddr) {
        if index == self.own_index {
            tracing::warn!("Ignoring PLAYER_EXIT for our own slot from {}", from);
            return;
        }
        if self.slots.is_active(index) {
            tracing::info!("Player {} left", index);
            self.slots.deactivate(index);
        }
        self.master_synch = true;
    }

    /// Stores `payload` as the authoritative state and broadcasts it.
    pub fn send_master(&mut self, payload: &[u8]) -> SessionResult<()> {
        self.begin()?;
        self.master_payload.set(payload)?;
        let result = self.broadcast();
        self.finish(result)
    }

    /// Sends MASTER_INFO with the stored payload to every active peer.
    pub(super) fn broadcast(&mut self) -> SessionResult<()> {
        let message = Message::MasterInfo(MasterInfo {
            master_index: self.own_index,
            resync: self.master_synch,
            active: self.slots.active_flags(),
            payload: self.master_payload,
        });

        let own = self.own_index;
        let addresses = self.slots.addresses();
        let active = self.slots.active_flags();
        for index in PeerIndex::all().filter(|&i| i != own && active[i.get()]) {
            if let Some(addr) = addresses[index.get()] {
                self.send(&message, addr)?;
            }
        }
        tracing::debug!(
            resync = self.master_synch,
            len = self.master_payload.len(),
            "broadcast"
        );

        self.new_master = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::SessionError;
    use crate::protocol::{ExitReason, PlayerExit};
    use crate::transport::LoopbackNetwork;

    fn report(player: usize, bytes: &[u8], resync_request: bool) -> Message {
        Message::SlaveInfo(SlaveInfo {
            player_index: idx(player),
            resync_request,
            payload: SlavePayload::from_slice(bytes).unwrap(),
        })
    }

    /// Master at .1 with scripted slaves at .2 and .3 already admitted.
    fn full_session(network: &LoopbackNetwork) -> (TestSession, Script, Script) {
        let mut host = master(network, 1);
        let mut a = Script::new(network, 2);
        let mut b = Script::new(network, 3);
        a.send(&Message::Init { player_name: "a".into() }, 1);
        b.send(&Message::Init { player_name: "b".into() }, 1);
        host.get_slave().unwrap();
        a.recv();
        b.recv();
        (host, a, b)
    }

    #[test]
    fn test_collects_reports() {
        let network = LoopbackNetwork::new();
        let (mut host, mut a, mut b) = full_session(&network);

        a.send(&report(1, b"score:5", false), 1);
        b.send(&report(2, b"score:7", false), 1);
        let tick = host.tick_master().unwrap();

        assert!(!tick.resync);
        let got: Vec<(PeerIndex, &[u8])> = tick.reports().map(|(i, p)| (i, p.as_slice())).collect();
        assert_eq!(got, [(idx(1), &b"score:5"[..]), (idx(2), &b"score:7"[..])]);
        assert_eq!(host.slots().get(idx(2)).timeouts, 0);
    }

    #[test]
    fn test_straggler_forces_resync() {
        let network = LoopbackNetwork::new();
        let (mut host, mut a, mut b) = full_session(&network);

        a.send(&report(1, b"old", false), 1);
        b.send(&report(2, b"x", false), 1);
        a.send(&report(1, b"new", false), 1);
        let tick = host.tick_master().unwrap();

        assert!(tick.resync);
        assert_eq!(tick.reports[1].unwrap().as_slice(), b"new");
    }

    #[test]
    fn test_report_from_inactive_slot_is_kept() {
        let network = LoopbackNetwork::new();
        let mut host = master(&network, 1);
        let mut late = Script::new(&network, 3);

        late.send(&report(2, b"late", false), 1);
        let tick = host.tick_master().unwrap();

        assert!(tick.resync);
        assert_eq!(tick.reports[2].unwrap().as_slice(), b"late");
        assert_eq!(host.slots().get(idx(2)).payload.as_slice(), b"late");
        assert!(!host.slots().is_active(idx(2)));
        assert_eq!(host.current_players(), [true, false, false]);
    }

    #[test]
    fn test_resync_request_sets_both_flags() {
        let network = LoopbackNetwork::new();
        let (mut host, mut a, mut b) = full_session(&network);

        a.send(&report(1, b"", true), 1);
        b.send(&report(2, b"", false), 1);
        let tick = host.tick_master().unwrap();

        assert!(tick.resync);
        assert!(host.slave_synch());
    }

    #[test]
    fn test_exit_frees_slot() {
        let network = LoopbackNetwork::new();
        let (mut host, mut a, mut b) = full_session(&network);

        a.send(&report(1, b"", false), 1);
        b.send(&Message::PlayerExit(PlayerExit::notice(idx(2), ExitReason::Killed)), 1);
        let tick = host.tick_master().unwrap();

        assert!(tick.resync);
        assert_eq!(host.current_players(), [true, true, false]);
        assert_eq!(host.slots().first_free(), Some(idx(2)));
    }

    #[test]
    fn test_broadcast_reaches_active_peers() {
        let network = LoopbackNetwork::new();
        let (mut host, mut a, mut b) = full_session(&network);
        assert!(host.master_synch());

        host.send_master(b"world").unwrap();

        for peer in [&mut a, &mut b] {
            let Some(Message::MasterInfo(info)) = peer.recv() else { panic!("Expected MASTER_INFO") };
            assert_eq!(info.master_index, idx(0));
            assert!(info.resync);
            assert_eq!(info.active, [true, true, true]);
            assert_eq!(info.payload.as_slice(), b"world");
        }
        assert_eq!(host.master_payload().as_slice(), b"world");
    }

    #[test]
    fn test_oversized_broadcast_is_rejected() {
        let network = LoopbackNetwork::new();
        let mut host = master(&network, 1);

        let err = host.send_master(&vec![0u8; crate::MAX_MASTER_PAYLOAD + 1]).unwrap_err();

        assert!(matches!(err, SessionError::PayloadTooLarge { .. }));
        assert!(!err.is_fatal());
    }
}
