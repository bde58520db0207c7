//! In-process room provider
//!
//! `LoopbackHub` plays the part of the relay: it owns the session directory,
//! routes datagrams between member endpoints through a `LinkConditioner`, and
//! turns directory events into per-member transport events. Membership events
//! are queued even for suspended members; datagrams are not.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use agora_core::{ActorId, AgoraError, AgoraResult, LeaveReason, SessionId, SessionTime, Target};
use agora_session::{DirectoryEvent, JoinOutcome, JoinRequest, SessionDirectory};
use parking_lot::Mutex;
use tracing::debug;

use crate::{Datagram, LinkConditioner, PerfectLink, Transport, TransportEvent};

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a suspended member keeps its identity
    pub grace: Duration,
    /// Round-trip reported by `ping`
    pub rtt: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            grace: Duration::from_secs(10),
            rtt: Duration::from_millis(20),
        }
    }
}

/// Hub counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub datagrams_sent: u64,
    pub datagrams_delivered: u64,
    pub datagrams_dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Up,
    Suspended,
    Closed,
}

struct Endpoint {
    state: LinkState,
    inbox: VecDeque<TransportEvent>,
}

struct HubState {
    config: HubConfig,
    now: SessionTime,
    directory: SessionDirectory,
    endpoints: HashMap<(SessionId, ActorId), Endpoint>,
    conditioner: Box<dyn LinkConditioner>,
    stats: HubStats,
}

impl HubState {
    fn link_state(&self, session: SessionId, actor: ActorId) -> LinkState {
        self.endpoints
            .get(&(session, actor))
            .map_or(LinkState::Closed, |e| e.state)
    }

    fn require_up(&self, session: SessionId, actor: ActorId) -> AgoraResult<()> {
        match self.link_state(session, actor) {
            LinkState::Up => Ok(()),
            LinkState::Suspended => Err(AgoraError::ConnectionError(
                "link to room provider is down".into(),
            )),
            LinkState::Closed => Err(AgoraError::Disconnected),
        }
    }

    fn deliver(&mut self, datagram: Datagram) {
        match self.endpoints.get_mut(&(datagram.session, datagram.to)) {
            Some(endpoint) if endpoint.state == LinkState::Up => {
                endpoint.inbox.push_back(TransportEvent::Message {
                    from: datagram.from,
                    bytes: datagram.bytes,
                });
                self.stats.datagrams_delivered += 1;
            }
            _ => self.stats.datagrams_dropped += 1,
        }
    }

    fn route(&mut self, session: SessionId, from: ActorId, target: Target, bytes: Vec<u8>) -> AgoraResult<()> {
        let recipients = match self.directory.resolve(session, from, target) {
            Ok(recipients) => recipients,
            Err(AgoraError::MemberNotFound(actor)) => {
                debug!(session = %session, to = %actor, "datagram to departed member dropped");
                self.stats.datagrams_dropped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for to in recipients.into_iter().filter(|&to| to != from) {
            self.stats.datagrams_sent += 1;
            let datagram = Datagram {
                session,
                from,
                to,
                bytes: bytes.clone(),
            };
            for out in self.conditioner.submit(datagram) {
                self.deliver(out);
            }
        }
        Ok(())
    }

    fn push_to_session(&mut self, session: SessionId, event: &TransportEvent, skip: Option<ActorId>) {
        for ((s, actor), endpoint) in self.endpoints.iter_mut() {
            if *s != session || Some(*actor) == skip || endpoint.state == LinkState::Closed {
                continue;
            }
            endpoint.inbox.push_back(event.clone());
        }
    }

    /// Turn directory events into transport events
    fn dispatch(&mut self) {
        for event in self.directory.drain_events() {
            match event {
                DirectoryEvent::MemberJoined { session, member } => {
                    let skip = Some(member.actor);
                    self.push_to_session(session, &TransportEvent::MemberJoined(member), skip);
                }
                DirectoryEvent::MemberLeft {
                    session,
                    actor,
                    reason,
                } => {
                    self.push_to_session(session, &TransportEvent::MemberLeft { actor, reason }, None);
                    if let Some(endpoint) = self.endpoints.get_mut(&(session, actor)) {
                        if reason == LeaveReason::TimedOut {
                            endpoint.inbox.push_back(TransportEvent::Disconnected);
                        }
                        endpoint.state = LinkState::Closed;
                    }
                }
                DirectoryEvent::MemberSuspended { session, actor } => {
                    self.push_to_session(session, &TransportEvent::MemberSuspended(actor), Some(actor));
                }
                DirectoryEvent::MemberResumed { session, actor } => {
                    self.push_to_session(session, &TransportEvent::MemberResumed(actor), Some(actor));
                }
                // Clients elect locally from the roster
                DirectoryEvent::AuthorityChanged { .. } | DirectoryEvent::SessionClosed { .. } => {}
            }
        }
    }
}

/// In-process room provider shared by every loopback transport
#[derive(Clone)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new(config: HubConfig) -> Self {
        Self::with_conditioner(config, PerfectLink)
    }

    pub fn with_conditioner(config: HubConfig, conditioner: impl LinkConditioner + 'static) -> Self {
        LoopbackHub {
            state: Arc::new(Mutex::new(HubState {
                config,
                now: SessionTime::ZERO,
                directory: SessionDirectory::new(),
                endpoints: HashMap::new(),
                conditioner: Box::new(conditioner),
                stats: HubStats::default(),
            })),
        }
    }

    /// Connect and join (or create) a room
    pub fn join(&self, request: JoinRequest) -> AgoraResult<(LoopbackTransport, JoinOutcome)> {
        let mut state = self.state.lock();
        let outcome = state.directory.create_or_join(request)?;
        state.endpoints.insert(
            (outcome.session, outcome.member.actor),
            Endpoint {
                state: LinkState::Up,
                inbox: VecDeque::new(),
            },
        );
        state.dispatch();
        let transport = LoopbackTransport {
            hub: Arc::clone(&self.state),
            session: outcome.session,
            actor: outcome.member.actor,
        };
        Ok((transport, outcome))
    }

    /// Advance the hub clock: release held datagrams and time out members
    /// suspended beyond the grace window
    pub fn advance(&self, dt: Duration) {
        let mut state = self.state.lock();
        state.now = state.now + dt;
        for datagram in state.conditioner.step() {
            state.deliver(datagram);
        }
        let (now, grace) = (state.now, state.config.grace);
        let expired = state.directory.expire(now, grace);
        if !expired.is_empty() {
            debug!(count = expired.len(), "suspended members timed out");
        }
        state.dispatch();
    }

    pub fn now(&self) -> SessionTime {
        self.state.lock().now
    }

    pub fn authority(&self, session: SessionId) -> AgoraResult<ActorId> {
        self.state.lock().directory.current_authority(session)
    }

    pub fn roster(&self, session: SessionId) -> Vec<ActorId> {
        self.state
            .lock()
            .directory
            .room(session)
            .map(|room| room.actors().collect())
            .unwrap_or_default()
    }

    pub fn set_open(&self, session: SessionId, open: bool) -> AgoraResult<()> {
        self.state.lock().directory.set_open(session, open)
    }

    pub fn stats(&self) -> HubStats {
        self.state.lock().stats
    }
}

/// One member's connection to a loopback room
#[derive(Clone)]
pub struct LoopbackTransport {
    hub: Arc<Mutex<HubState>>,
    session: SessionId,
    actor: ActorId,
}

impl LoopbackTransport {
    /// Drop the link; the member stays in the roster as suspended
    pub fn disconnect(&self) -> AgoraResult<()> {
        let mut state = self.hub.lock();
        state.require_up(self.session, self.actor)?;
        let now = state.now;
        state.directory.suspend(self.session, self.actor, now)?;
        if let Some(endpoint) = state.endpoints.get_mut(&(self.session, self.actor)) {
            endpoint.state = LinkState::Suspended;
        }
        state.dispatch();
        Ok(())
    }

    /// Restore the link under the same actor identity
    pub fn reconnect(&self) -> AgoraResult<()> {
        let mut state = self.hub.lock();
        match state.link_state(self.session, self.actor) {
            LinkState::Up => return Ok(()),
            LinkState::Closed => return Err(AgoraError::Disconnected),
            LinkState::Suspended => {}
        }
        state.directory.resume(self.session, self.actor)?;
        if let Some(endpoint) = state.endpoints.get_mut(&(self.session, self.actor)) {
            endpoint.state = LinkState::Up;
        }
        state.dispatch();
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.hub.lock().link_state(self.session, self.actor) == LinkState::Up
    }
}

impl Transport for LoopbackTransport {
    fn local_actor(&self) -> ActorId {
        self.actor
    }

    fn session(&self) -> SessionId {
        self.session
    }

    fn send(&self, target: Target, bytes: Vec<u8>) -> AgoraResult<()> {
        let mut state = self.hub.lock();
        state.require_up(self.session, self.actor)?;
        state.route(self.session, self.actor, target, bytes)
    }

    fn poll(&self) -> Vec<TransportEvent> {
        let mut state = self.hub.lock();
        let key = (self.session, self.actor);
        let Some(endpoint) = state.endpoints.get_mut(&key) else {
            return Vec::new();
        };
        let events: Vec<TransportEvent> = endpoint.inbox.drain(..).collect();
        if endpoint.state == LinkState::Closed {
            state.endpoints.remove(&key);
        }
        events
    }

    fn ping(&self) -> Option<Duration> {
        let state = self.hub.lock();
        (state.link_state(self.session, self.actor) == LinkState::Up).then_some(state.config.rtt)
    }

    fn kick(&self, actor: ActorId) -> AgoraResult<()> {
        let mut state = self.hub.lock();
        state.require_up(self.session, self.actor)?;
        state.directory.kick(self.session, actor)?;
        state.dispatch();
        Ok(())
    }

    fn leave(&self) -> AgoraResult<()> {
        let mut state = self.hub.lock();
        if state.link_state(self.session, self.actor) == LinkState::Closed {
            return Err(AgoraError::Disconnected);
        }
        state.directory.leave(self.session, self.actor)?;
        state.dispatch();
        Ok(())
    }
}
