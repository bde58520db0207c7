//! Replication channel
//!
//! Sending assigns stream sequences, keeps the encoded envelope for
//! retransmission and loops `All`/`Buffered` traffic back to the local
//! member. Receiving decodes, filters and orders envelopes and queues
//! [`Inbound`] items for the runtime to dispatch.
//!
//! # Late joiners
//!
//! A member that joins a populated room starts in syncing mode and holds
//! reliable broadcast traffic. The authority answers with one or more
//! `Snapshot` messages on its direct control stream: the buffered log, the
//! replicated controls, and a cursor per broadcast stream. The joiner
//! replays the log, adopts the cursors as delivered watermarks and then
//! releases what it held; anything the snapshot already covered drops as a
//! duplicate and any gap is NACKed to its origin.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use agora_core::{
    ActorId, AgoraError, AgoraResult, DeliveryClass, Lane, SessionId, SessionTime, Target,
};
use agora_session::Room;
use agora_transport::Transport;
use agora_wire::{ControlsSnapshot, Envelope, Message, Snapshot, StreamCursor};
use tracing::{debug, info, warn};

use crate::{Accept, BufferedLog, InboundStream, LatestWins, OutboundStream, StreamKey};

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Encoded envelopes kept per outbound stream for retransmission
    pub history_capacity: usize,
    /// Envelopes held per inbound stream while waiting for a gap to fill
    pub max_pending: usize,
    /// Minimum spacing of NACKs per inbound stream
    pub nack_interval: Duration,
    /// Most sequences requested by one NACK
    pub max_nack_batch: usize,
    pub heartbeat_interval: Duration,
    /// Re-request a snapshot when none completed within this long
    pub sync_retry: Duration,
    /// Soft limit on buffered-log bytes per snapshot message
    pub snapshot_chunk_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            history_capacity: 4096,
            max_pending: 4096,
            nack_interval: Duration::from_millis(100),
            max_nack_batch: 64,
            heartbeat_interval: Duration::from_millis(250),
            sync_retry: Duration::from_secs(1),
            snapshot_chunk_bytes: 48 * 1024,
        }
    }
}

impl ChannelConfig {
    /// Same-site classroom: short retry timers
    pub fn local_network() -> Self {
        ChannelConfig {
            nack_interval: Duration::from_millis(40),
            heartbeat_interval: Duration::from_millis(100),
            sync_retry: Duration::from_millis(500),
            ..Default::default()
        }
    }

    /// Remote students on poor links: fewer control packets, longer history
    pub fn constrained() -> Self {
        ChannelConfig {
            history_capacity: 8192,
            nack_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_millis(500),
            sync_retry: Duration::from_secs(3),
            snapshot_chunk_bytes: 16 * 1024,
            ..Default::default()
        }
    }
}

/// A message ready for the application
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub origin: ActorId,
    pub lane: Lane,
    /// Stream sequence (latest-wins sequence for poses)
    pub seq: u64,
    pub target: Target,
    pub message: Message,
    /// Replayed from a snapshot rather than received live
    pub replayed: bool,
}

impl Delivery {
    fn from_envelope(envelope: Envelope, replayed: bool) -> Self {
        Delivery {
            origin: envelope.origin,
            lane: envelope.lane,
            seq: envelope.seq,
            target: envelope.target,
            message: envelope.message,
            replayed,
        }
    }
}

/// Work queued for the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Delivery),
    /// A member asked for a snapshot
    SyncRequested { from: ActorId },
    /// Late-joiner sync finished; the replicated controls to restore
    Synced {
        from: ActorId,
        controls: ControlsSnapshot,
    },
}

/// Channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub received: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub held: u64,
    pub overflowed: u64,
    pub malformed: u64,
    pub retransmissions: u64,
    pub nacks_sent: u64,
    pub heartbeats_sent: u64,
    pub snapshots_sent: u64,
}

enum SyncState {
    Synced,
    Syncing {
        since: SessionTime,
        last_request: Option<SessionTime>,
        asked: Option<ActorId>,
        /// Reliable broadcast envelopes received before the snapshot
        held: Vec<Envelope>,
        /// Snapshot chunks received so far, and their sender
        partial: Option<(ActorId, Vec<Envelope>)>,
    },
}

/// Member to ask for a snapshot: the authority, or while we hold authority
/// ourselves, the lowest other connected member
fn sync_source(room: &Room, local: ActorId) -> Option<ActorId> {
    match room.authority() {
        Some(authority) if authority != local => Some(authority),
        _ => room
            .members()
            .filter(|m| m.is_connected() && m.actor() != local)
            .map(|m| m.actor())
            .next(),
    }
}

/// Send/receive over the transport with explicit targets and delivery classes
pub struct ReplicationChannel {
    transport: Box<dyn Transport>,
    config: ChannelConfig,
    session: SessionId,
    local: ActorId,
    outbound: HashMap<StreamKey, OutboundStream>,
    inbound: HashMap<StreamKey, InboundStream>,
    pose_seq: u64,
    latest: LatestWins,
    log: BufferedLog,
    departed: HashSet<ActorId>,
    sync: SyncState,
    ready: VecDeque<Inbound>,
    last_heartbeat: Option<SessionTime>,
    stats: ChannelStats,
}

impl ReplicationChannel {
    /// Create a channel. `needs_sync` is set for members joining a room
    /// that already has other members.
    pub fn new(
        transport: Box<dyn Transport>,
        config: ChannelConfig,
        needs_sync: bool,
        now: SessionTime,
    ) -> Self {
        let sync = if needs_sync {
            SyncState::Syncing {
                since: now,
                last_request: None,
                asked: None,
                held: Vec::new(),
                partial: None,
            }
        } else {
            SyncState::Synced
        };
        ReplicationChannel {
            session: transport.session(),
            local: transport.local_actor(),
            transport,
            config,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            pose_seq: 0,
            latest: LatestWins::new(),
            log: BufferedLog::new(),
            departed: HashSet::new(),
            sync,
            ready: VecDeque::new(),
            last_heartbeat: None,
            stats: ChannelStats::default(),
        }
    }

    #[inline]
    pub fn local(&self) -> ActorId {
        self.local
    }

    #[inline]
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn log(&self) -> &BufferedLog {
        &self.log
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self.sync, SyncState::Syncing { .. })
    }

    /// Next item for the runtime to dispatch
    pub fn next_inbound(&mut self) -> Option<Inbound> {
        self.ready.pop_front()
    }

    pub fn has_inbound(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Send `message` to `target`. `Authority` is resolved from the local
    /// roster. Returns the sequence the message was sent with.
    ///
    /// Reliable messages are recorded before the transport is called, so a
    /// `ConnectionError` here is recovered by retransmission once the link
    /// is back.
    pub fn send(&mut self, room: &Room, target: Target, message: Message) -> AgoraResult<u64> {
        let target = match target {
            Target::Authority => Target::Single(room.authority().ok_or(AgoraError::NotInSession)?),
            other => other,
        };
        self.send_resolved(target, message)
    }

    fn send_resolved(&mut self, target: Target, message: Message) -> AgoraResult<u64> {
        if message.is_unreliable() {
            return self.send_unreliable(target, message);
        }
        if target == Target::Single(self.local) {
            let envelope = Envelope::new(self.session, self.local, target, message);
            self.apply(envelope, false);
            return Ok(0);
        }

        let lane = message.lane();
        let key = match target {
            Target::Single(to) => StreamKey::direct(self.local, lane, to),
            _ => StreamKey::broadcast(self.local, lane),
        };
        let capacity = self.config.history_capacity;
        let stream = self
            .outbound
            .entry(key)
            .or_insert_with(|| OutboundStream::new(capacity));
        let envelope =
            Envelope::new(self.session, self.local, target, message).with_seq(stream.peek_next());
        let bytes = envelope.encode()?;
        let seq = stream.commit(bytes.clone());
        self.stats.sent += 1;

        if target.includes_sender() {
            self.apply(envelope, false);
        }
        self.transport.send(target, bytes)?;
        Ok(seq)
    }

    fn send_unreliable(&mut self, target: Target, message: Message) -> AgoraResult<u64> {
        let seq = if matches!(message, Message::Pose(_)) {
            self.pose_seq += 1;
            self.pose_seq
        } else {
            0
        };
        if target == Target::Single(self.local) {
            return Ok(seq);
        }
        let bytes = Envelope::new(self.session, self.local, target, message)
            .with_seq(seq)
            .encode()?;
        self.stats.sent += 1;
        self.transport.send(target, bytes)?;
        Ok(seq)
    }

    /// Process one datagram from the transport
    pub fn ingest(&mut self, from: ActorId, bytes: &[u8], now: SessionTime) {
        self.stats.received += 1;
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(from = %from, error = %e, "malformed envelope dropped");
                self.stats.malformed += 1;
                return;
            }
        };
        if envelope.session != self.session || envelope.origin != from {
            warn!(
                from = %from,
                origin = %envelope.origin,
                session = %envelope.session,
                "envelope with foreign session or origin dropped"
            );
            self.stats.malformed += 1;
            return;
        }
        if self.departed.contains(&from) {
            debug!(from = %from, "envelope from departed member dropped");
            return;
        }

        match envelope.message {
            Message::Pose(_) => {
                if self.latest.accept(from, Lane::Pose, envelope.seq) {
                    self.stats.delivered += 1;
                    self.ready
                        .push_back(Inbound::Message(Delivery::from_envelope(envelope, false)));
                } else {
                    self.stats.stale += 1;
                }
            }
            Message::Heartbeat { broadcast, direct } => {
                self.on_heartbeat(from, broadcast, direct, now)
            }
            Message::Nack {
                lane,
                direct,
                missing,
            } => self.on_nack(from, lane, direct, missing),
            Message::SyncRequest => self.ready.push_back(Inbound::SyncRequested { from }),
            message => self.on_reliable(Envelope { message, ..envelope }, now),
        }
    }

    fn on_reliable(&mut self, envelope: Envelope, now: SessionTime) {
        let key = if envelope.direct {
            if envelope.target != Target::Single(self.local) {
                debug!(origin = %envelope.origin, target = ?envelope.target, "misrouted direct envelope");
                self.stats.malformed += 1;
                return;
            }
            StreamKey::direct(envelope.origin, envelope.lane, self.local)
        } else {
            StreamKey::broadcast(envelope.origin, envelope.lane)
        };

        if !key.is_direct() {
            if let SyncState::Syncing { held, .. } = &mut self.sync {
                let origin = envelope.origin;
                if held.iter().filter(|e| e.origin == origin).count() >= self.config.max_pending {
                    // Recovered by NACK once the snapshot is applied
                    warn!(origin = %origin, "sync hold buffer full, envelope dropped");
                    self.stats.overflowed += 1;
                    return;
                }
                held.push(envelope);
                self.stats.held += 1;
                return;
            }
        }
        self.accept_reliable(key, envelope, now);
    }

    fn accept_reliable(&mut self, key: StreamKey, envelope: Envelope, now: SessionTime) {
        let max_pending = self.config.max_pending;
        let stream = self
            .inbound
            .entry(key)
            .or_insert_with(|| InboundStream::new(max_pending));
        match stream.accept(envelope) {
            Accept::Duplicate => self.stats.duplicates += 1,
            Accept::Deliver(envelopes) => {
                for envelope in envelopes {
                    self.deliver(envelope, now);
                }
            }
            Accept::Held => self.nack_gaps(key, None, now),
            Accept::Overflow => {
                warn!(origin = %key.origin, lane = ?key.lane, "hold buffer full, envelope dropped");
                self.stats.overflowed += 1;
            }
        }
    }

    fn deliver(&mut self, envelope: Envelope, now: SessionTime) {
        self.stats.delivered += 1;
        if matches!(envelope.message, Message::Snapshot(_)) {
            self.on_snapshot(envelope, now);
        } else {
            self.apply(envelope, false);
        }
    }

    /// Record buffered history and queue the delivery
    fn apply(&mut self, envelope: Envelope, replayed: bool) {
        if envelope.target == Target::Buffered {
            self.log.append(envelope.clone());
        }
        if let Message::StrokeClear { horizon } = &envelope.message {
            let removed = self.log.trim_cleared(horizon);
            debug!(origin = %envelope.origin, removed, "buffered log trimmed by clear");
        }
        self.ready
            .push_back(Inbound::Message(Delivery::from_envelope(envelope, replayed)));
    }

    /// NACK the gaps of one inbound stream, up to `upto` or its highest held
    /// sequence, respecting the NACK interval
    fn nack_gaps(&mut self, key: StreamKey, upto: Option<u64>, now: SessionTime) {
        let (interval, limit) = (self.config.nack_interval, self.config.max_nack_batch);
        let Some(stream) = self.inbound.get_mut(&key) else {
            return;
        };
        let Some(upto) = upto.or_else(|| stream.highest_pending()) else {
            return;
        };
        if upto <= stream.delivered() || !stream.nack_due(now, interval) {
            return;
        }
        let missing = stream.missing(upto, limit);
        if missing.is_empty() {
            return;
        }
        stream.mark_nacked(now);
        debug!(origin = %key.origin, lane = ?key.lane, count = missing.len(), "nack");
        self.stats.nacks_sent += 1;
        let nack = Message::Nack {
            lane: key.lane,
            direct: key.is_direct(),
            missing,
        };
        if let Err(e) = self.send_unreliable(Target::Single(key.origin), nack) {
            debug!(error = %e, "nack not sent");
        }
    }

    fn on_heartbeat(
        &mut self,
        from: ActorId,
        broadcast: Vec<(Lane, u64)>,
        direct: Vec<(ActorId, Lane, u64)>,
        now: SessionTime,
    ) {
        // Broadcast watermarks come from the snapshot while syncing
        if !self.is_syncing() {
            for (lane, seq) in broadcast {
                self.check_advertised(StreamKey::broadcast(from, lane), seq, now);
            }
        }
        for (receiver, lane, seq) in direct {
            if receiver == self.local {
                self.check_advertised(StreamKey::direct(from, lane, self.local), seq, now);
            }
        }
    }

    fn check_advertised(&mut self, key: StreamKey, seq: u64, now: SessionTime) {
        if key.lane.delivery_class() != DeliveryClass::ReliableOrdered || seq == 0 {
            return;
        }
        let max_pending = self.config.max_pending;
        let delivered = self
            .inbound
            .entry(key)
            .or_insert_with(|| InboundStream::new(max_pending))
            .delivered();
        if seq > delivered {
            self.nack_gaps(key, Some(seq), now);
        }
    }

    fn on_nack(&mut self, from: ActorId, lane: Lane, direct: bool, missing: Vec<u64>) {
        let key = if direct {
            StreamKey::direct(self.local, lane, from)
        } else {
            StreamKey::broadcast(self.local, lane)
        };
        let Some(stream) = self.outbound.get(&key) else {
            debug!(from = %from, ?lane, "nack for unknown stream");
            return;
        };
        let mut resend = Vec::with_capacity(missing.len());
        let mut evicted = 0usize;
        for seq in missing {
            match stream.get(seq) {
                Some(bytes) => resend.push(bytes.to_vec()),
                None => evicted += 1,
            }
        }
        if evicted > 0 {
            warn!(to = %from, ?lane, evicted, "nacked sequences no longer in history");
        }
        for bytes in resend {
            self.stats.retransmissions += 1;
            if let Err(e) = self.transport.send(Target::Single(from), bytes) {
                debug!(error = %e, "retransmission aborted");
                break;
            }
        }
    }

    fn on_snapshot(&mut self, envelope: Envelope, now: SessionTime) {
        let from = envelope.origin;
        let Message::Snapshot(snapshot) = envelope.message else {
            return;
        };
        let (log, held) = match &mut self.sync {
            SyncState::Synced => {
                debug!(from = %from, "snapshot ignored, already synced");
                return;
            }
            SyncState::Syncing { partial, held, .. } => {
                if partial.as_ref().map_or(false, |(sender, _)| *sender != from) {
                    // A different member answered; start over with its view
                    *partial = None;
                }
                let buffer = partial.get_or_insert_with(|| (from, Vec::new()));
                buffer.1.extend(snapshot.log);
                if !snapshot.complete {
                    return;
                }
                let log = partial.take().map(|(_, log)| log).unwrap_or_default();
                (log, std::mem::take(held))
            }
        };
        self.sync = SyncState::Synced;
        self.finish_sync(from, log, snapshot.cursors, snapshot.controls, held, now);
    }

    fn finish_sync(
        &mut self,
        from: ActorId,
        log: Vec<Envelope>,
        cursors: Vec<StreamCursor>,
        controls: ControlsSnapshot,
        held: Vec<Envelope>,
        now: SessionTime,
    ) {
        info!(
            from = %from,
            entries = log.len(),
            cursors = cursors.len(),
            held = held.len(),
            "late-joiner sync complete"
        );
        for entry in log {
            // Our own sends were applied when they were made
            if entry.origin == self.local {
                self.stats.duplicates += 1;
                continue;
            }
            self.apply(entry, true);
        }
        self.ready.push_back(Inbound::Synced { from, controls });

        let max_pending = self.config.max_pending;
        for cursor in cursors {
            if cursor.origin == self.local {
                continue;
            }
            let released = self
                .inbound
                .entry(StreamKey::broadcast(cursor.origin, cursor.lane))
                .or_insert_with(|| InboundStream::new(max_pending))
                .advance_to(cursor.seq);
            for envelope in released {
                self.deliver(envelope, now);
            }
        }
        for envelope in held {
            let key = StreamKey::broadcast(envelope.origin, envelope.lane);
            self.accept_reliable(key, envelope, now);
        }
    }

    fn request_sync(&mut self, room: &Room, now: SessionTime) {
        let source = sync_source(room, self.local);
        let alone = room.actors().all(|actor| actor == self.local);
        let SyncState::Syncing {
            last_request,
            asked,
            held,
            ..
        } = &mut self.sync
        else {
            return;
        };

        match source {
            Some(source) => {
                *last_request = Some(now);
                *asked = Some(source);
                debug!(to = %source, "requesting snapshot");
                if let Err(e) = self.send_unreliable(Target::Single(source), Message::SyncRequest) {
                    debug!(error = %e, "sync request not sent");
                }
            }
            None if alone => {
                // Everyone else left before answering: nothing to catch up on
                let held = std::mem::take(held);
                self.sync = SyncState::Synced;
                self.finish_sync(self.local, Vec::new(), Vec::new(), ControlsSnapshot::default(), held, now);
            }
            None => *last_request = Some(now),
        }
    }

    /// Send the buffered log, `controls` and our cursors to `to`
    pub fn send_snapshot(&mut self, to: ActorId, controls: ControlsSnapshot) -> AgoraResult<()> {
        if self.is_syncing() {
            debug!(to = %to, "not answering sync while syncing ourselves");
            return Ok(());
        }
        let cursors = self.cursors();
        let budget = self.config.snapshot_chunk_bytes;

        let mut chunks: Vec<Vec<Envelope>> = Vec::new();
        let mut current: Vec<Envelope> = Vec::new();
        let mut size = 0usize;
        let mut scratch = Vec::new();
        for entry in self.log.entries() {
            scratch.clear();
            entry.write_to(&mut scratch)?;
            let len = scratch.len() + 4;
            if !current.is_empty() && size + len > budget {
                chunks.push(std::mem::take(&mut current));
                size = 0;
            }
            size += len;
            current.push(entry.clone());
        }
        chunks.push(current);

        let last = chunks.len() - 1;
        info!(to = %to, entries = self.log.len(), chunks = chunks.len(), "sending snapshot");
        for (i, log) in chunks.into_iter().enumerate() {
            let complete = i == last;
            let snapshot = Snapshot {
                cursors: if complete { cursors.clone() } else { Vec::new() },
                log,
                controls: if complete {
                    controls.clone()
                } else {
                    ControlsSnapshot::default()
                },
                complete,
            };
            self.send_resolved(Target::Single(to), Message::Snapshot(snapshot))?;
        }
        self.stats.snapshots_sent += 1;
        Ok(())
    }

    /// Delivered watermark of every broadcast stream, own streams included
    pub fn cursors(&self) -> Vec<StreamCursor> {
        let mut cursors: Vec<StreamCursor> = self
            .inbound
            .iter()
            .filter(|(key, _)| !key.is_direct())
            .map(|(key, stream)| StreamCursor {
                origin: key.origin,
                lane: key.lane,
                seq: stream.delivered(),
            })
            .chain(
                self.outbound
                    .iter()
                    .filter(|(key, _)| !key.is_direct())
                    .map(|(key, stream)| StreamCursor {
                        origin: self.local,
                        lane: key.lane,
                        seq: stream.last_sent(),
                    }),
            )
            .collect();
        cursors.sort_by_key(|c| (c.origin, c.lane));
        cursors
    }

    /// Highest board sequence applied per owner, for a clear
    pub fn board_horizon(&self) -> Vec<(ActorId, u64)> {
        self.cursors()
            .into_iter()
            .filter(|c| c.lane == Lane::Board && c.seq > 0)
            .map(|c| (c.origin, c.seq))
            .collect()
    }

    /// Periodic work: heartbeat, re-NACK stalled gaps, sync retry
    pub fn service(&mut self, room: &Room, now: SessionTime) {
        let heartbeat_due = self
            .last_heartbeat
            .map_or(true, |last| now.since(last) >= self.config.heartbeat_interval);
        if heartbeat_due {
            self.last_heartbeat = Some(now);
            self.send_heartbeat();
        }

        let stalled: Vec<StreamKey> = self
            .inbound
            .iter()
            .filter(|(_, stream)| stream.pending_len() > 0)
            .map(|(key, _)| *key)
            .collect();
        for key in stalled {
            self.nack_gaps(key, None, now);
        }

        if let SyncState::Syncing {
            since,
            last_request,
            asked,
            ..
        } = &self.sync
        {
            let waited = now.since(last_request.unwrap_or(*since));
            let source_moved = asked.is_some() && *asked != sync_source(room, self.local);
            if source_moved || waited >= self.config.sync_retry {
                self.request_sync(room, now);
            }
        }
    }

    fn send_heartbeat(&mut self) {
        let mut broadcast: Vec<(Lane, u64)> = Vec::new();
        let mut direct: Vec<(ActorId, Lane, u64)> = Vec::new();
        for (key, stream) in &self.outbound {
            match key.receiver {
                Some(receiver) => direct.push((receiver, key.lane, stream.last_sent())),
                None => broadcast.push((key.lane, stream.last_sent())),
            }
        }
        if broadcast.is_empty() && direct.is_empty() {
            return;
        }
        broadcast.sort();
        direct.sort();
        self.stats.heartbeats_sent += 1;
        if let Err(e) = self.send_unreliable(Target::Others, Message::Heartbeat { broadcast, direct }) {
            debug!(error = %e, "heartbeat not sent");
        }
    }

    /// A member left: drop its held traffic and our direct streams to it.
    /// Delivered watermarks are kept so snapshots still cover its history.
    pub fn forget(&mut self, actor: ActorId) {
        let max_pending = self.config.max_pending;
        for (key, stream) in self.inbound.iter_mut() {
            if key.origin == actor {
                let mut fresh = InboundStream::new(max_pending);
                fresh.advance_to(stream.delivered());
                *stream = fresh;
            }
        }
        self.inbound
            .retain(|key, _| !(key.origin == actor && key.is_direct()));
        self.outbound.retain(|key, _| key.receiver != Some(actor));
        self.latest.forget(actor);
        self.departed.insert(actor);
    }
}
