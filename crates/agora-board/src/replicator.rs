//! Stroke replicator
//!
//! Local drawing goes through a "pen" that remembers the open local stroke
//! and its last replicated point; near-stationary pointer movement is
//! filtered there and never reaches the wire. The board itself only changes
//! when an event is delivered, the local member's own events included.

use agora_core::{ActorId, AgoraError, AgoraResult, StrokeId, StrokeKey, Target, Vec3};
use agora_replication::SessionContext;
use agora_wire::Message;
use tracing::debug;

use crate::Board;

/// Board configuration
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Points closer than this to the previous point are not replicated
    pub min_point_distance: f32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            min_point_distance: 0.005,
        }
    }
}

/// What happened to a stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeChange {
    Began,
    Extended,
    Ended,
    Cleared,
}

/// Observation event for the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeUpdated {
    pub key: StrokeKey,
    pub kind: StrokeChange,
}

/// Board counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardStats {
    pub points_sent: u64,
    pub points_suppressed: u64,
    pub unknown_dropped: u64,
    pub strokes_cleared: u64,
}

#[derive(Debug, Clone, Copy)]
struct Pen {
    stroke: StrokeId,
    last_point: Vec3,
}

/// Draws locally and mirrors the shared board
#[derive(Debug)]
pub struct StrokeReplicator {
    local: ActorId,
    config: BoardConfig,
    board: Board,
    next_id: StrokeId,
    pen: Option<Pen>,
    stats: BoardStats,
}

impl StrokeReplicator {
    pub fn new(local: ActorId, config: BoardConfig) -> Self {
        StrokeReplicator {
            local,
            config,
            board: Board::new(),
            next_id: StrokeId(1),
            pen: None,
            stats: BoardStats::default(),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn stats(&self) -> BoardStats {
        self.stats
    }

    /// Open stroke of the local pen, if any
    pub fn open_stroke(&self) -> Option<StrokeId> {
        self.pen.map(|pen| pen.stroke)
    }

    /// Start a stroke and return its id. An open local stroke is ended
    /// first; ids are never reused, even across clears.
    pub fn begin_stroke(
        &mut self,
        ctx: &mut SessionContext,
        color_index: u8,
        point: Vec3,
    ) -> AgoraResult<StrokeId> {
        if let Some(open) = self.open_stroke() {
            self.end_stroke(ctx, open)?;
        }
        let stroke = self.next_id;
        self.next_id = stroke.next();
        self.pen = Some(Pen {
            stroke,
            last_point: point,
        });
        ctx.send(
            Target::Buffered,
            Message::StrokeBegin {
                stroke,
                color_index,
                point,
            },
        )?;
        self.stats.points_sent += 1;
        Ok(stroke)
    }

    /// Append a point. Returns false when the point was suppressed or the
    /// stroke is not the open local stroke.
    pub fn continue_stroke(
        &mut self,
        ctx: &mut SessionContext,
        stroke: StrokeId,
        point: Vec3,
    ) -> AgoraResult<bool> {
        let Some(pen) = self.pen.as_mut().filter(|pen| pen.stroke == stroke) else {
            debug!(stroke = ?stroke, "continue on a stroke that is not open");
            return Ok(false);
        };
        if pen.last_point.distance(&point) < self.config.min_point_distance {
            self.stats.points_suppressed += 1;
            return Ok(false);
        }
        pen.last_point = point;
        ctx.send(Target::Buffered, Message::StrokeContinue { stroke, point })?;
        self.stats.points_sent += 1;
        Ok(true)
    }

    /// Close a local stroke. Returns false for a stroke that is not open.
    pub fn end_stroke(&mut self, ctx: &mut SessionContext, stroke: StrokeId) -> AgoraResult<bool> {
        if self.open_stroke() != Some(stroke) {
            debug!(stroke = ?stroke, "end on a stroke that is not open");
            return Ok(false);
        }
        self.pen = None;
        ctx.send(Target::Buffered, Message::StrokeEnd { stroke })?;
        Ok(true)
    }

    /// Clear every stroke this member has seen begin
    pub fn clear_board(&mut self, ctx: &mut SessionContext) -> AgoraResult<()> {
        let horizon = ctx.channel.board_horizon();
        self.pen = None;
        ctx.send(Target::All, Message::StrokeClear { horizon })?;
        Ok(())
    }

    /// Apply a delivered board message from `origin` carrying board
    /// sequence `seq`. Unknown or closed strokes are dropped.
    pub fn on_message(&mut self, origin: ActorId, seq: u64, message: &Message) -> Vec<StrokeUpdated> {
        let mut updates = Vec::new();
        match message {
            Message::StrokeBegin {
                stroke,
                color_index,
                point,
            } => {
                let key = StrokeKey::new(origin, *stroke);
                if self.board.begin(key, *color_index, *point, seq) {
                    updates.push(StrokeUpdated {
                        key,
                        kind: StrokeChange::Began,
                    });
                }
            }
            Message::StrokeContinue { stroke, point } => {
                let key = StrokeKey::new(origin, *stroke);
                match self.board.extend(key, *point) {
                    Ok(()) => updates.push(StrokeUpdated {
                        key,
                        kind: StrokeChange::Extended,
                    }),
                    Err(e) => self.drop_unknown(e),
                }
            }
            Message::StrokeEnd { stroke } => {
                let key = StrokeKey::new(origin, *stroke);
                match self.board.end(key) {
                    Ok(()) => updates.push(StrokeUpdated {
                        key,
                        kind: StrokeChange::Ended,
                    }),
                    Err(e) => self.drop_unknown(e),
                }
            }
            Message::StrokeClear { horizon } => {
                let removed = self.board.clear(horizon);
                debug!(by = %origin, removed = removed.len(), "board cleared");
                self.stats.strokes_cleared += removed.len() as u64;
                let local = self.local;
                if let Some(pen) = self.pen {
                    if removed.contains(&StrokeKey::new(local, pen.stroke)) {
                        // Our open stroke is gone: stop extending it
                        self.pen = None;
                    }
                }
                updates.extend(removed.into_iter().map(|key| StrokeUpdated {
                    key,
                    kind: StrokeChange::Cleared,
                }));
            }
            _ => {}
        }
        updates
    }

    fn drop_unknown(&mut self, error: AgoraError) {
        debug!(%error, "stroke event dropped");
        self.stats.unknown_dropped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Role, SessionTime};
    use agora_replication::{ChannelConfig, Inbound};
    use agora_session::JoinRequest;
    use agora_transport::{HubConfig, LoopbackHub, TransportEvent};
    use agora_wire::ControlsSnapshot;

    struct Member {
        ctx: SessionContext,
        board: StrokeReplicator,
        updates: Vec<StrokeUpdated>,
    }

    fn join(hub: &LoopbackHub, name: &str) -> Member {
        let (transport, outcome) = hub
            .join(JoinRequest::named("Classroom_1234", name, Role::Student))
            .unwrap();
        let ctx = SessionContext::from_join(outcome, Box::new(transport), ChannelConfig::default(), SessionTime::ZERO);
        Member {
            board: StrokeReplicator::new(ctx.local_actor(), BoardConfig::default()),
            ctx,
            updates: Vec::new(),
        }
    }

    fn pump(members: &mut [&mut Member]) {
        for _ in 0..10 {
            for member in members.iter_mut() {
                let now = member.ctx.now;
                for event in member.ctx.channel.transport().poll() {
                    match event {
                        TransportEvent::Message { from, bytes } => member.ctx.channel.ingest(from, &bytes, now),
                        TransportEvent::MemberJoined(info) => {
                            let actor = info.actor;
                            member.ctx.room.insert(info);
                            if member.ctx.is_authority() {
                                member.ctx.channel.send_snapshot(actor, ControlsSnapshot::default()).unwrap();
                            }
                        }
                        _ => {}
                    }
                }
                while let Some(item) = member.ctx.channel.next_inbound() {
                    if let Inbound::Message(d) = item {
                        let updates = member.board.on_message(d.origin, d.seq, &d.message);
                        member.updates.extend(updates);
                    }
                }
            }
        }
    }

    fn points(member: &Member, owner: u32, id: u64) -> Vec<Vec3> {
        member
            .board
            .board()
            .stroke(StrokeKey::new(ActorId(owner), StrokeId(id)))
            .map(|s| s.points.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_stroke_reaches_every_member() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut a = join(&hub, "a");
        let mut b = join(&hub, "b");
        pump(&mut [&mut a, &mut b]);

        let id = a.board.begin_stroke(&mut a.ctx, 0, Vec3::ZERO).unwrap();
        assert_eq!(id, StrokeId(1));
        assert!(a.board.continue_stroke(&mut a.ctx, id, Vec3::new(0.02, 0.0, 0.0)).unwrap());
        assert!(a.board.end_stroke(&mut a.ctx, id).unwrap());
        pump(&mut [&mut a, &mut b]);

        assert_eq!(points(&b, 1, 1), vec![Vec3::ZERO, Vec3::new(0.02, 0.0, 0.0)]);
        assert_eq!(points(&a, 1, 1), points(&b, 1, 1));
        let kinds: Vec<StrokeChange> = b.updates.iter().map(|u| u.kind).collect();
        assert_eq!(kinds, vec![StrokeChange::Began, StrokeChange::Extended, StrokeChange::Ended]);
    }

    #[test]
    fn test_near_points_suppressed() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut a = join(&hub, "a");
        let id = a.board.begin_stroke(&mut a.ctx, 2, Vec3::ZERO).unwrap();
        assert!(!a.board.continue_stroke(&mut a.ctx, id, Vec3::new(0.001, 0.0, 0.0)).unwrap());
        assert!(a.board.continue_stroke(&mut a.ctx, id, Vec3::new(0.01, 0.0, 0.0)).unwrap());
        assert_eq!(a.board.stats().points_suppressed, 1);
        pump(&mut [&mut a]);
        assert_eq!(points(&a, 1, 1).len(), 2);
    }

    #[test]
    fn test_continue_on_closed_stroke_is_ignored() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut a = join(&hub, "a");
        let id = a.board.begin_stroke(&mut a.ctx, 0, Vec3::ZERO).unwrap();
        a.board.end_stroke(&mut a.ctx, id).unwrap();
        assert!(!a.board.continue_stroke(&mut a.ctx, id, Vec3::new(1.0, 0.0, 0.0)).unwrap());
        assert!(!a.board.end_stroke(&mut a.ctx, StrokeId(9)).unwrap());
    }

    #[test]
    fn test_remote_event_for_unknown_stroke_dropped() {
        let mut board = StrokeReplicator::new(ActorId(1), BoardConfig::default());
        let updates = board.on_message(
            ActorId(2),
            4,
            &Message::StrokeContinue {
                stroke: StrokeId(3),
                point: Vec3::ZERO,
            },
        );
        assert!(updates.is_empty());
        assert_eq!(board.stats().unknown_dropped, 1);
    }

    #[test]
    fn test_ids_survive_clear() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut a = join(&hub, "a");
        let first = a.board.begin_stroke(&mut a.ctx, 0, Vec3::ZERO).unwrap();
        pump(&mut [&mut a]);
        a.board.clear_board(&mut a.ctx).unwrap();
        pump(&mut [&mut a]);
        assert!(a.board.board().is_empty());
        assert_eq!(a.board.open_stroke(), None);

        let second = a.board.begin_stroke(&mut a.ctx, 0, Vec3::ZERO).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_stroke_begun_during_clear_survives_everywhere() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut a = join(&hub, "a");
        let mut b = join(&hub, "b");
        pump(&mut [&mut a, &mut b]);
        a.board.begin_stroke(&mut a.ctx, 0, Vec3::ZERO).unwrap();
        pump(&mut [&mut a, &mut b]);

        // a clears before seeing b's new stroke
        b.board.begin_stroke(&mut b.ctx, 1, Vec3::ZERO).unwrap();
        a.board.clear_board(&mut a.ctx).unwrap();
        pump(&mut [&mut a, &mut b]);

        for member in [&a, &b] {
            let keys: Vec<StrokeKey> = member.board.board().strokes().iter().map(|s| s.key).collect();
            assert_eq!(keys, vec![StrokeKey::new(ActorId(2), StrokeId(1))]);
        }
    }

    #[test]
    fn test_late_joiner_sees_board_in_order() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut a = join(&hub, "a");
        let s1 = a.board.begin_stroke(&mut a.ctx, 0, Vec3::ZERO).unwrap();
        a.board.continue_stroke(&mut a.ctx, s1, Vec3::new(0.1, 0.0, 0.0)).unwrap();
        a.board.end_stroke(&mut a.ctx, s1).unwrap();
        let s2 = a.board.begin_stroke(&mut a.ctx, 1, Vec3::new(0.0, 0.5, 0.0)).unwrap();
        a.board.end_stroke(&mut a.ctx, s2).unwrap();
        pump(&mut [&mut a]);

        let mut c = join(&hub, "c");
        pump(&mut [&mut a, &mut c]);
        let order: Vec<StrokeId> = c.board.board().strokes().iter().map(|s| s.key.id).collect();
        assert_eq!(order, vec![s1, s2]);
        assert_eq!(points(&c, 1, 1), points(&a, 1, 1));
        assert_eq!(c.board.board().strokes(), a.board.board().strokes());
    }
}
