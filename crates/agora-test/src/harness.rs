//! Multi-client classroom harness
//!
//! Joins runtime clients to one room on a `LoopbackHub` and steps the hub and
//! every connected client in lock step, the way a set of devices in one
//! classroom would run.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use std::time::Duration;

use agora_core::{ActorId, AgoraError, AgoraResult, Role, SessionId, SessionTime};
use agora_runtime::{Client, ClientConfig, ClientEvent};
use agora_session::JoinRequest;
use agora_transport::{HubConfig, LinkConditioner, LoopbackHub, LoopbackTransport};
use agora_voice::LocalVoiceOutput;
use tracing::debug;

/// Default harness step, one 60 Hz frame
pub const FRAME: Duration = Duration::from_millis(16);

/// One device in the classroom
pub struct Seat {
    pub client: Client,
    /// Kept to cut and restore the link from outside the client
    pub transport: LoopbackTransport,
    /// Events drained from the client so far
    pub events: Vec<ClientEvent>,
    /// False while the harness holds the link down
    linked: bool,
}

impl Seat {
    /// Active and not cut off by the harness. A seat removed by the hub
    /// keeps ticking until its client notices.
    fn is_running(&self) -> bool {
        self.linked && self.client.is_active()
    }
}

/// A room full of clients sharing one hub
pub struct Classroom {
    hub: LoopbackHub,
    room: String,
    config: ClientConfig,
    step: Duration,
    session: Option<SessionId>,
    seats: BTreeMap<ActorId, Seat>,
}

impl Classroom {
    /// Perfect links, default hub
    pub fn new(room: &str) -> Self {
        Self::with_hub(room, LoopbackHub::new(HubConfig::default()))
    }

    /// Route every datagram through `conditioner`
    pub fn with_conditioner(
        room: &str,
        config: HubConfig,
        conditioner: impl LinkConditioner + 'static,
    ) -> Self {
        Self::with_hub(room, LoopbackHub::with_conditioner(config, conditioner))
    }

    pub fn with_hub(room: &str, hub: LoopbackHub) -> Self {
        Classroom {
            hub,
            room: room.to_string(),
            config: ClientConfig::default(),
            step: FRAME,
            session: None,
            seats: BTreeMap::new(),
        }
    }

    /// Configuration for clients joining from now on
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn now(&self) -> SessionTime {
        self.hub.now()
    }

    /// Join (or create) the room
    pub fn join(&mut self, name: &str, role: Role) -> AgoraResult<ActorId> {
        let (transport, outcome) = self.hub.join(JoinRequest::named(&self.room, name, role))?;
        let actor = outcome.member.actor;
        self.session = Some(outcome.session);
        let client = Client::new(
            self.config.clone(),
            outcome,
            Box::new(transport.clone()),
            Box::new(LocalVoiceOutput::new()),
        )?;
        debug!(actor = %actor, name, "seat joined");
        self.seats.insert(
            actor,
            Seat {
                client,
                transport,
                events: Vec::new(),
                linked: true,
            },
        );
        Ok(actor)
    }

    pub fn seat(&self, actor: ActorId) -> Option<&Seat> {
        self.seats.get(&actor)
    }

    pub fn seat_mut(&mut self, actor: ActorId) -> Option<&mut Seat> {
        self.seats.get_mut(&actor)
    }

    /// Every seat ever joined, including stopped ones
    pub fn actors(&self) -> Vec<ActorId> {
        self.seats.keys().copied().collect()
    }

    /// Seats whose client is active and whose link is up
    pub fn running(&self) -> Vec<ActorId> {
        self.seats
            .iter()
            .filter(|(_, seat)| seat.is_running())
            .map(|(actor, _)| *actor)
            .collect()
    }

    /// Cut a seat's link; the hub keeps it suspended for the grace window
    pub fn disconnect(&mut self, actor: ActorId) -> AgoraResult<()> {
        let seat = self
            .seats
            .get_mut(&actor)
            .ok_or(AgoraError::MemberNotFound(actor))?;
        seat.transport.disconnect()?;
        seat.linked = false;
        Ok(())
    }

    pub fn reconnect(&mut self, actor: ActorId) -> AgoraResult<()> {
        let seat = self
            .seats
            .get_mut(&actor)
            .ok_or(AgoraError::MemberNotFound(actor))?;
        seat.transport.reconnect()?;
        seat.linked = true;
        Ok(())
    }

    /// One hub step followed by one tick of every running client
    pub fn step(&mut self) -> AgoraResult<()> {
        self.hub.advance(self.step);
        for seat in self.seats.values_mut() {
            if !seat.is_running() {
                continue;
            }
            match seat.client.tick(self.step) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => debug!(error = %e, "seat stopped"),
                Err(e) => return Err(e),
            }
            seat.events.extend(seat.client.drain_events());
        }
        Ok(())
    }

    /// Step for at least `duration`
    pub fn run_for(&mut self, duration: Duration) -> AgoraResult<()> {
        let steps = (duration.as_micros() / self.step.as_micros().max(1)).max(1);
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    /// Step until the hub clock reaches `at`
    pub fn run_until(&mut self, at: SessionTime) -> AgoraResult<()> {
        while self.now() < at {
            self.step()?;
        }
        Ok(())
    }

    /// Take the events a seat collected
    pub fn take_events(&mut self, actor: ActorId) -> Vec<ClientEvent> {
        self.seats
            .get_mut(&actor)
            .map(|seat| std::mem::take(&mut seat.events))
            .unwrap_or_default()
    }

    /// Authority as seen by every running client
    pub fn authority_views(&self) -> Vec<(ActorId, Option<ActorId>)> {
        self.seats
            .iter()
            .filter(|(_, seat)| seat.is_running())
            .map(|(actor, seat)| (*actor, seat.client.authority()))
            .collect()
    }
}

impl Index<ActorId> for Classroom {
    type Output = Client;

    fn index(&self, actor: ActorId) -> &Client {
        &self.seats[&actor].client
    }
}

impl IndexMut<ActorId> for Classroom {
    fn index_mut(&mut self, actor: ActorId) -> &mut Client {
        match self.seats.get_mut(&actor) {
            Some(seat) => &mut seat.client,
            None => panic!("no seat for {actor}"),
        }
    }
}
