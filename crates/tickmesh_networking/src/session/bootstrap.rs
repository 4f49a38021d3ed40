//! Joining a session, and admitting joiners.
//!
//! ```text
//! RESOLVING --local--> Master
//!     |
//! CONTACTING <--REDIRECT (bounded hops)--+
//!     |                                  |
//!     +--INIT_ACK-------------------------+
//!     |   ACCEPT                  -> Slave
//!     |   REFUSE / NO_CAPACITY    -> Master
//!     +--TIME_OUT / anything else -> Master
//! ```

use std::net::SocketAddr;

use crate::clock::Clock;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{
    truncate_text, InitAck, InitStatus, Message, MessageType, PeerIndex, SlavePayload,
};
use crate::transport::{Delivery, Transport};
use crate::HOST_NAME_SIZE;

use super::{Role, Session};

/// How a join attempt ended.
///
/// Everything except `Accepted` leaves the peer mastering its own session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Admitted as a slave.
    Accepted {
        /// Slot assigned to us.
        player_index: PeerIndex,
        /// Slot of the admitting master.
        master_index: PeerIndex,
        /// Admitting master's player name.
        master_name: String,
    },
    /// The master host is this very endpoint.
    LocalMaster,
    /// The master is closed to new players.
    Refused,
    /// The session is full.
    NoCapacity,
    /// Nobody answered.
    TimedOut,
    /// Redirects kept coming.
    RedirectLimit,
    /// Something other than INIT_ACK answered.
    Unexpected(MessageType),
}

impl JoinOutcome {
    /// Returns true if the join made this peer a slave.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Starts a fresh session with this peer as master in slot zero.
    pub fn start_master(&mut self, player_name: &str) -> SessionResult<()> {
        self.begin()?;
        self.set_player_name(player_name);
        self.become_master();
        tracing::info!(
            "{} is master of a new session at {}",
            self.player_name,
            self.local_addr()
        );
        Ok(())
    }

    /// Joins the session mastered at `master_host`.
    ///
    /// Only an unresolvable host or a socket failure is an error. Every
    /// other failure to get in ends with this peer as master, reported
    /// through the returned outcome and an `Info` status.
    pub fn join(&mut self, master_host: &str, player_name: &str) -> SessionResult<JoinOutcome> {
        self.begin()?;
        self.set_player_name(player_name);
        let result = self.contact(master_host);
        self.finish(result)
    }

    fn contact(&mut self, master_host: &str) -> SessionResult<JoinOutcome> {
        let mut candidate = self.resolve_master(master_host)?;
        let mut hops = 0u32;

        loop {
            if self.channel.transport().is_local(candidate) {
                return Ok(self.fall_back(JoinOutcome::LocalMaster, "Cannot connect to self"));
            }

            tracing::debug!("Sending INIT to {}", candidate);
            let init = Message::Init { player_name: self.player_name.clone() };
            self.send(&init, candidate)?;

            let (ack, from) = match self.receive(true)? {
                Delivery::Message { message: Message::InitAck(ack), from } => (ack, from),
                Delivery::Message { message, from } => {
                    let kind = message.message_type();
                    tracing::warn!("Expected INIT_ACK from {}, got {:?} from {}", candidate, kind, from);
                    return Ok(self.fall_back(
                        JoinOutcome::Unexpected(kind),
                        &format!("Unexpected {kind:?} arrived"),
                    ));
                }
                Delivery::TimeOut => {
                    return Ok(self.fall_back(JoinOutcome::TimedOut, "Connection attempt timed-out"));
                }
            };

            match ack.status {
                InitStatus::Accept => return Ok(self.adopt_admission(ack, from)),
                InitStatus::Refuse => {
                    return Ok(self.fall_back(JoinOutcome::Refused, "Connection refused"));
                }
                InitStatus::NoCapacity => {
                    return Ok(self.fall_back(JoinOutcome::NoCapacity, "Cannot add new player"));
                }
                InitStatus::Redirect => {
                    hops += 1;
                    if hops > self.config.max_redirects {
                        return Ok(self.fall_back(JoinOutcome::RedirectLimit, "Too many redirects"));
                    }
                    candidate = self.resolve_master(&ack.redirect_host)?;
                    tracing::info!("{} redirected us to {}", from, candidate);
                }
            }
        }
    }

    fn resolve_master(&self, host: &str) -> SessionResult<SocketAddr> {
        let host = truncate_text(host, HOST_NAME_SIZE);
        self.channel
            .transport()
            .resolve(host, self.config.port)
            .ok_or_else(|| SessionError::UnknownHost { host: host.to_owned() })
    }

    fn adopt_admission(&mut self, ack: InitAck, from: SocketAddr) -> JoinOutcome {
        let local = self.local_addr();
        self.role = Role::Slave;
        self.own_index = ack.player_index;
        self.master_index = ack.master_index;
        self.master_addr = Some(from);
        self.slots = super::SlotTable::new();
        self.slots.activate(ack.master_index, Some(from));
        self.slots.activate(ack.player_index, Some(local));
        self.master_timeouts = 0;
        self.set_info(format!("Connection accepted by {}", ack.master_name));

        JoinOutcome::Accepted {
            player_index: ack.player_index,
            master_index: ack.master_index,
            master_name: ack.master_name,
        }
    }

    fn fall_back(&mut self, outcome: JoinOutcome, reason: &str) -> JoinOutcome {
        self.become_master();
        self.set_info(format!("{reason}: continuing as master"));
        outcome
    }

    /// Master side of the handshake.
    ///
    /// Returns the slot a new player was given, so the caller can start
    /// expecting its reports.
    pub(super) fn admit(
        &mut self,
        player_name: &str,
        from: SocketAddr,
    ) -> SessionResult<Option<PeerIndex>> {
        // Our INIT_ACK got lost and the joiner retried.
        if let Some(existing) = self.slots.find_by_addr(from) {
            if existing != self.own_index {
                tracing::debug!("Repeating INIT_ACK for {} at {}", existing, from);
                let ack = self.accept_ack(existing);
                self.send(&ack, from)?;
            }
            return Ok(None);
        }

        if !self.accepting {
            tracing::info!("Refusing {} from {}: admissions closed", player_name, from);
            self.send(&Message::InitAck(InitAck::verdict(InitStatus::Refuse)), from)?;
            return Ok(None);
        }

        let Some(index) = self.slots.first_free() else {
            tracing::warn!("Session full, turning away {} from {}", player_name, from);
            self.send(&Message::InitAck(InitAck::verdict(InitStatus::NoCapacity)), from)?;
            return Ok(None);
        };

        let ack = self.accept_ack(index);
        self.send(&ack, from)?;

        self.slots.activate(index, Some(from));
        self.slots.get_mut(index).payload = SlavePayload::empty();
        self.master_synch = true;
        self.set_info(format!("Accepted player {player_name}"));
        Ok(Some(index))
    }

    fn accept_ack(&self, index: PeerIndex) -> Message {
        Message::InitAck(InitAck {
            status: InitStatus::Accept,
            player_index: index,
            master_index: self.master_index,
            master_name: self.player_name.clone(),
            redirect_host: String::new(),
        })
    }

    /// Slave side: point a joiner at whoever we think is master.
    pub(super) fn redirect(&mut self, player_name: &str, from: SocketAddr) -> SessionResult<()> {
        // A wildcard address would send the joiner back to itself.
        let Some(master_addr) = self.master_addr.filter(|addr| !addr.ip().is_unspecified()) else {
            tracing::warn!("Refusing {} from {}: no routable master address", player_name, from);
            return self.send(&Message::InitAck(InitAck::verdict(InitStatus::Refuse)), from);
        };
        let mut ack = InitAck::verdict(InitStatus::Redirect);
        ack.master_index = self.master_index;
        ack.redirect_host = master_addr.to_string();
        tracing::info!("Redirecting {} at {} to {}", player_name, from, ack.redirect_host);
        self.send(&Message::InitAck(ack), from)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::session::StatusLevel;
    use crate::transport::LoopbackNetwork;
    use std::time::Duration;

    fn verdict(status: InitStatus, redirect_host: &str) -> Message {
        let mut ack = InitAck::verdict(status);
        ack.redirect_host = redirect_host.to_owned();
        Message::InitAck(ack)
    }

    #[test]
    fn test_join_accepted() {
        let network = LoopbackNetwork::new();
        let mut master = Script::new(&network, 1);
        let mut joiner = session(&network, 2);
        master.accept(2, 1, 0);

        let outcome = joiner.join("10.0.0.1", "ada").unwrap();

        assert!(outcome.is_accepted());
        assert_eq!(joiner.role(), Role::Slave);
        assert_eq!(joiner.own_index(), idx(1));
        assert_eq!(joiner.master_index(), idx(0));
        assert_eq!(joiner.master_addr(), Some(addr(1)));
        assert_eq!(joiner.current_players(), [true, true, false]);
        assert_eq!(joiner.status().level, StatusLevel::Info);
        assert_eq!(
            master.recv(),
            Some(Message::Init { player_name: "ada".into() })
        );
    }

    #[test]
    fn test_join_self_becomes_master() {
        let network = LoopbackNetwork::new();
        let mut joiner = session(&network, 2);

        let outcome = joiner.join("10.0.0.2:4507", "ada").unwrap();

        assert_eq!(outcome, JoinOutcome::LocalMaster);
        assert!(joiner.is_master());
        assert_eq!(network.sent_from(addr(2)), 0);
    }

    #[test]
    fn test_silent_master_times_out() {
        let network = LoopbackNetwork::new();
        let _master = Script::new(&network, 1);
        let mut joiner = session(&network, 2);

        let outcome = joiner.join("10.0.0.1", "ada").unwrap();

        assert_eq!(outcome, JoinOutcome::TimedOut);
        assert!(joiner.is_master());
        assert_eq!(joiner.own_index(), PeerIndex::FIRST);
        assert_eq!(joiner.current_players(), [true, false, false]);
        assert!(joiner.status().message.contains("continuing as master"));
        assert_eq!(joiner.clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_refused_and_full() {
        let network = LoopbackNetwork::new();
        let mut master = Script::new(&network, 1);

        let mut first = session(&network, 2);
        master.send(&verdict(InitStatus::Refuse, ""), 2);
        assert_eq!(first.join("10.0.0.1", "ada").unwrap(), JoinOutcome::Refused);
        assert!(first.is_master());

        let mut second = session(&network, 3);
        master.send(&verdict(InitStatus::NoCapacity, ""), 3);
        assert_eq!(second.join("10.0.0.1", "bob").unwrap(), JoinOutcome::NoCapacity);
        assert!(second.is_master());
    }

    #[test]
    fn test_redirect_is_followed() {
        let network = LoopbackNetwork::new();
        let mut stale = Script::new(&network, 1);
        let mut real = Script::new(&network, 3);
        let mut joiner = session(&network, 2);
        stale.send(&verdict(InitStatus::Redirect, "10.0.0.3:4507"), 2);
        real.accept(2, 2, 0);

        let outcome = joiner.join("10.0.0.1", "ada").unwrap();

        assert!(outcome.is_accepted());
        assert_eq!(joiner.master_addr(), Some(addr(3)));
        assert_eq!(joiner.own_index(), idx(2));
        assert!(matches!(real.recv(), Some(Message::Init { .. })));
    }

    #[test]
    fn test_redirect_loop_is_bounded() {
        let network = LoopbackNetwork::new();
        let mut stale = Script::new(&network, 1);
        let config = SessionConfig { max_redirects: 2, ..SessionConfig::default() };
        let mut joiner =
            Session::new(config, network.endpoint(addr(2)), ManualClock::new()).unwrap();
        for _ in 0..3 {
            stale.send(&verdict(InitStatus::Redirect, "10.0.0.1:4507"), 2);
        }

        let outcome = joiner.join("10.0.0.1", "ada").unwrap();

        assert_eq!(outcome, JoinOutcome::RedirectLimit);
        assert!(joiner.is_master());
        assert_eq!(network.sent_from(addr(2)), 3);
    }

    #[test]
    fn test_unresolvable_host_is_fatal() {
        let network = LoopbackNetwork::new();
        let mut joiner = session(&network, 2);

        let err = joiner.join("", "ada").unwrap_err();

        assert!(matches!(err, SessionError::UnknownHost { .. }));
        assert_eq!(joiner.status().level, StatusLevel::Fatal);
    }

    #[test]
    fn test_master_admits_and_reacks() {
        let network = LoopbackNetwork::new();
        let mut host = master(&network, 1);
        let mut joiner = Script::new(&network, 2);

        joiner.send(&Message::Init { player_name: "ada".into() }, 1);
        host.get_slave().unwrap();

        assert_eq!(host.current_players(), [true, true, false]);
        assert!(host.master_synch());
        assert_eq!(host.status().message, "Accepted player ada");
        let Some(Message::InitAck(ack)) = joiner.recv() else { panic!("Expected INIT_ACK") };
        assert_eq!(ack.status, InitStatus::Accept);
        assert_eq!(ack.player_index, idx(1));
        assert_eq!(ack.master_name, "m1");

        // Retry from the same address keeps the same slot.
        joiner.send(&Message::Init { player_name: "ada".into() }, 1);
        host.get_slave().unwrap();
        let Some(Message::InitAck(again)) = joiner.recv() else { panic!("Expected INIT_ACK") };
        assert_eq!(again.player_index, idx(1));
        assert_eq!(host.slots().active_count(), 2);
    }

    #[test]
    fn test_master_turns_away_when_full_or_closed() {
        let network = LoopbackNetwork::new();
        let mut host = master(&network, 1);
        let mut closed = Script::new(&network, 2);

        host.set_accepting(false);
        closed.send(&Message::Init { player_name: "ada".into() }, 1);
        host.get_slave().unwrap();
        let Some(Message::InitAck(ack)) = closed.recv() else { panic!("Expected INIT_ACK") };
        assert_eq!(ack.status, InitStatus::Refuse);
        drop(closed);

        host.set_accepting(true);
        let mut peers: Vec<Script> = (2..=4).map(|last| Script::new(&network, last)).collect();
        for (i, peer) in peers.iter_mut().enumerate() {
            peer.send(&Message::Init { player_name: format!("p{i}") }, 1);
        }
        host.get_slave().unwrap();

        let statuses: Vec<InitStatus> = peers
            .iter_mut()
            .map(|peer| match peer.recv() {
                Some(Message::InitAck(ack)) => ack.status,
                other => panic!("Expected INIT_ACK, got {other:?}"),
            })
            .collect();
        assert_eq!(statuses, [InitStatus::Accept, InitStatus::Accept, InitStatus::NoCapacity]);
    }

    #[test]
    fn test_slave_redirects_joiners() {
        let network = LoopbackNetwork::new();
        let mut master_peer = Script::new(&network, 1);
        let mut slave = session(&network, 2);
        master_peer.accept(2, 1, 0);
        slave.join("10.0.0.1", "ada").unwrap();

        let mut joiner = Script::new(&network, 3);
        joiner.send(&Message::Init { player_name: "bob".into() }, 2);
        slave.get_master().unwrap();

        let Some(Message::InitAck(ack)) = joiner.recv() else { panic!("Expected INIT_ACK") };
        assert_eq!(ack.status, InitStatus::Redirect);
        assert_eq!(ack.redirect_host, "10.0.0.1:4507");
    }

    #[test]
    fn test_wildcard_master_address_is_never_a_redirect_target() {
        let network = LoopbackNetwork::new();
        let mut master_peer = Script::new(&network, 1);
        let mut slave = session(&network, 2);
        master_peer.accept(2, 1, 0);
        slave.join("10.0.0.1", "ada").unwrap();
        slave.master_addr = Some("0.0.0.0:4507".parse().unwrap());

        let mut joiner = Script::new(&network, 3);
        joiner.send(&Message::Init { player_name: "bob".into() }, 2);
        slave.get_master().unwrap();

        let Some(Message::InitAck(ack)) = joiner.recv() else { panic!("Expected INIT_ACK") };
        assert_eq!(ack.status, InitStatus::Refuse);
        assert!(ack.redirect_host.is_empty());
    }
}
