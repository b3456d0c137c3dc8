//! An in-memory network for driving several sessions from one test thread.

use lockstep_chess::{NonBlockingSocket, Packet};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::rc::Rc;

#[derive(Default)]
struct Wires {
    inboxes: BTreeMap<SocketAddr, Vec<(SocketAddr, Packet)>>,
    /// Directed links that currently drop everything.
    cut: BTreeSet<(SocketAddr, SocketAddr)>,
    delivered: usize,
}

/// A perfect, lossless network. Packets sent during one iteration are readable by the
/// recipient on its next `receive_all_packets`.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    wires: Rc<RefCell<Wires>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A socket bound to `addr` on this network.
    #[must_use]
    pub fn socket(&self, addr: SocketAddr) -> LoopbackSocket {
        self.wires.borrow_mut().inboxes.entry(addr).or_default();
        LoopbackSocket {
            addr,
            wires: Rc::clone(&self.wires),
        }
    }

    /// Drops everything `from` sends to `to` until [`LoopbackNetwork::heal`].
    #[allow(dead_code)]
    pub fn cut(&self, from: SocketAddr, to: SocketAddr) {
        self.wires.borrow_mut().cut.insert((from, to));
    }

    /// Restores every cut link.
    #[allow(dead_code)]
    pub fn heal(&self) {
        self.wires.borrow_mut().cut.clear();
    }

    /// Packets delivered so far.
    #[allow(dead_code)]
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.wires.borrow().delivered
    }
}

/// One endpoint of a [`LoopbackNetwork`].
pub struct LoopbackSocket {
    addr: SocketAddr,
    wires: Rc<RefCell<Wires>>,
}

impl NonBlockingSocket<SocketAddr> for LoopbackSocket {
    fn send_to(&mut self, packet: &Packet, addr: &SocketAddr) {
        let mut guard = self.wires.borrow_mut();
        let wires = &mut *guard;
        if wires.cut.contains(&(self.addr, *addr)) {
            return;
        }
        // Sending to an address nobody bound is silently lost, like UDP.
        if let Some(inbox) = wires.inboxes.get_mut(addr) {
            inbox.push((self.addr, packet.clone()));
            wires.delivered += 1;
        }
    }

    fn receive_all_packets(&mut self) -> Vec<(SocketAddr, Packet)> {
        self.wires
            .borrow_mut()
            .inboxes
            .get_mut(&self.addr)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}
