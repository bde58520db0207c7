//! Link conditioning between loopback endpoints

use agora_core::{ActorId, SessionId};

/// One datagram in flight between two members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub session: SessionId,
    pub from: ActorId,
    pub to: ActorId,
    pub bytes: Vec<u8>,
}

/// Decides the fate of datagrams crossing the hub
pub trait LinkConditioner: Send {
    /// Datagrams to deliver now in exchange for `datagram`: none drops it,
    /// two duplicates it. A conditioner may also hold it back.
    fn submit(&mut self, datagram: Datagram) -> Vec<Datagram>;

    /// Called once per hub step; releases held datagrams
    fn step(&mut self) -> Vec<Datagram> {
        Vec::new()
    }
}

/// Delivers everything, once, in order
#[derive(Debug, Default, Clone, Copy)]
pub struct PerfectLink;

impl LinkConditioner for PerfectLink {
    fn submit(&mut self, datagram: Datagram) -> Vec<Datagram> {
        vec![datagram]
    }
}

/// Holds every datagram until the next step. Handy for tests that need
/// traffic to be in flight while something else happens.
#[derive(Debug, Default)]
pub struct DelayedLink {
    held: Vec<Datagram>,
}

impl LinkConditioner for DelayedLink {
    fn submit(&mut self, datagram: Datagram) -> Vec<Datagram> {
        self.held.push(datagram);
        Vec::new()
    }

    fn step(&mut self) -> Vec<Datagram> {
        std::mem::take(&mut self.held)
    }
}
