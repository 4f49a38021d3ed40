//! # Peer Slot Table
//!
//! Fixed table of [`MAX_PLAYERS`] slots, one per session participant.
//!
//! ## Design
//!
//! - Slots are addressed by [`PeerIndex`] and reused, never removed
//! - No allocations: the table is a plain array
//! - Own slot stays active for the lifetime of the session

use std::net::SocketAddr;

use crate::protocol::{PeerIndex, SlavePayload};
use crate::MAX_PLAYERS;

/// One session participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerSlot {
    /// Where the peer lives, once known.
    pub addr: Option<SocketAddr>,
    /// Participating in the session.
    pub active: bool,
    /// Consecutive rounds without a report.
    pub timeouts: u32,
    /// Last report received from this peer.
    pub payload: SlavePayload,
}

impl PeerSlot {
    /// Marks the slot active at `addr` with a fresh timeout counter.
    pub fn activate(&mut self, addr: Option<SocketAddr>) {
        if addr.is_some() {
            self.addr = addr;
        }
        self.active = true;
        self.timeouts = 0;
    }

    /// Marks the slot inactive. The address is kept for diagnostics.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.timeouts = 0;
    }
}

/// The session's peer table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotTable {
    slots: [PeerSlot; MAX_PLAYERS],
}

impl SlotTable {
    /// Creates a table with every slot inactive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a slot.
    #[inline]
    #[must_use]
    pub fn get(&self, index: PeerIndex) -> &PeerSlot {
        &self.slots[index.get()]
    }

    /// Returns a slot mutably.
    #[inline]
    pub fn get_mut(&mut self, index: PeerIndex) -> &mut PeerSlot {
        &mut self.slots[index.get()]
    }

    /// Returns true if `index` is active.
    #[inline]
    #[must_use]
    pub fn is_active(&self, index: PeerIndex) -> bool {
        self.get(index).active
    }

    /// Activates `index`, recording `addr` if given.
    pub fn activate(&mut self, index: PeerIndex, addr: Option<SocketAddr>) {
        self.get_mut(index).activate(addr);
    }

    /// Deactivates `index`.
    pub fn deactivate(&mut self, index: PeerIndex) {
        self.get_mut(index).deactivate();
    }

    /// Deactivates every slot except `keep`.
    pub fn deactivate_others(&mut self, keep: PeerIndex) {
        for index in PeerIndex::all().filter(|&i| i != keep) {
            self.deactivate(index);
        }
    }

    /// Lowest inactive slot.
    #[must_use]
    pub fn first_free(&self) -> Option<PeerIndex> {
        PeerIndex::all().find(|&i| !self.is_active(i))
    }

    /// Lowest active slot other than `except`.
    #[must_use]
    pub fn lowest_active(&self, except: PeerIndex) -> Option<PeerIndex> {
        PeerIndex::all().find(|&i| i != except && self.is_active(i))
    }

    /// Active slot owned by `addr`.
    #[must_use]
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PeerIndex> {
        PeerIndex::all().find(|&i| {
            let slot = self.get(i);
            slot.active && slot.addr == Some(addr)
        })
    }

    /// Active flags in slot order.
    #[must_use]
    pub fn active_flags(&self) -> [bool; MAX_PLAYERS] {
        let mut flags = [false; MAX_PLAYERS];
        for (flag, slot) in flags.iter_mut().zip(&self.slots) {
            *flag = slot.active;
        }
        flags
    }

    /// Known addresses in slot order.
    #[must_use]
    pub fn addresses(&self) -> [Option<SocketAddr>; MAX_PLAYERS] {
        let mut addrs = [None; MAX_PLAYERS];
        for (addr, slot) in addrs.iter_mut().zip(&self.slots) {
            *addr = slot.addr;
        }
        addrs
    }

    /// Number of active slots.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Iterates over active slots other than `except`.
    pub fn iter_active(&self, except: PeerIndex) -> impl Iterator<Item = (PeerIndex, &PeerSlot)> {
        PeerIndex::all()
            .filter(move |&i| i != except)
            .map(|i| (i, self.get(i)))
            .filter(|(_, slot)| slot.active)
    }
}
