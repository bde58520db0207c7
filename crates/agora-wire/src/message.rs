//! Replication message definitions
//!
//! One closed enum covers every message kind exchanged by members. The
//! conceptual schema:
//!
//! | Kind | Lane | Default target |
//! |---|---|---|
//! | pose | Pose | Others |
//! | stroke.begin / continue / end | Board | Buffered |
//! | stroke.clear | Board | All |
//! | cmd.* | Command | All (request: Others, report: Authority) |
//! | heartbeat | Control | Others |
//! | nack / sync.request / snapshot | Control | Single |

use agora_core::{ActorId, AgoraError, AgoraResult, Lane, Quat, StrokeId, Target, Vec3};
use bytes::BufMut;

use crate::{Envelope, WireReader, WireWrite};

/// Message kind bytes
pub mod kind {
    pub const POSE: u8 = 0x10;

    pub const STROKE_BEGIN: u8 = 0x20;
    pub const STROKE_CONTINUE: u8 = 0x21;
    pub const STROKE_END: u8 = 0x22;
    pub const STROKE_CLEAR: u8 = 0x23;

    pub const CMD_MUTE_ONE: u8 = 0x30;
    pub const CMD_MUTE_ALL: u8 = 0x31;
    pub const CMD_KICK: u8 = 0x32;
    pub const CMD_ENVIRONMENT: u8 = 0x33;
    pub const CMD_MATERIAL_ACCESS: u8 = 0x34;
    pub const CMD_ENGAGEMENT_REQUEST: u8 = 0x35;
    pub const CMD_ENGAGEMENT_REPORT: u8 = 0x36;

    pub const HEARTBEAT: u8 = 0x40;
    pub const NACK: u8 = 0x41;
    pub const SYNC_REQUEST: u8 = 0x42;
    pub const SNAPSHOT: u8 = 0x43;
}

/// Position and rotation of one tracked body part
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Pose { position, rotation }
    }

    /// Interpolate toward `other`: lerp for position, slerp for rotation
    pub fn interpolate(&self, other: &Pose, t: f32) -> Pose {
        let t = t.clamp(0.0, 1.0);
        Pose {
            position: self.position.lerp(&other.position, t),
            rotation: self.rotation.slerp(&other.rotation, t),
        }
    }
}

/// One pose sample of a participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseUpdate {
    pub owner: ActorId,
    /// Strictly increasing per owner
    pub seq: u64,
    pub body: Pose,
    pub head: Pose,
}

/// Privileged and telemetry commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    MuteOne { target: ActorId, muted: bool },
    MuteAll { muted: bool },
    Kick { target: ActorId },
    ChangeEnvironment { name: String },
    SetMaterialAccess { granted: bool },
    RequestEngagement,
    ReportEngagement { is_focused: bool, score: f32 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::MuteOne { .. } => "cmd.muteOne",
            Command::MuteAll { .. } => "cmd.muteAll",
            Command::Kick { .. } => "cmd.kick",
            Command::ChangeEnvironment { .. } => "cmd.environment",
            Command::SetMaterialAccess { .. } => "cmd.materialAccess",
            Command::RequestEngagement => "cmd.engagementRequest",
            Command::ReportEngagement { .. } => "cmd.engagementReport",
        }
    }

    /// Only instructors may issue these
    pub fn requires_instructor(&self) -> bool {
        !matches!(self, Command::ReportEngagement { .. })
    }

    pub fn default_target(&self) -> Target {
        match self {
            Command::RequestEngagement => Target::Others,
            Command::ReportEngagement { .. } => Target::Authority,
            _ => Target::All,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Command::MuteOne { .. } => kind::CMD_MUTE_ONE,
            Command::MuteAll { .. } => kind::CMD_MUTE_ALL,
            Command::Kick { .. } => kind::CMD_KICK,
            Command::ChangeEnvironment { .. } => kind::CMD_ENVIRONMENT,
            Command::SetMaterialAccess { .. } => kind::CMD_MATERIAL_ACCESS,
            Command::RequestEngagement => kind::CMD_ENGAGEMENT_REQUEST,
            Command::ReportEngagement { .. } => kind::CMD_ENGAGEMENT_REPORT,
        }
    }

    fn write_body(&self, buf: &mut Vec<u8>) -> AgoraResult<()> {
        match self {
            Command::MuteOne { target, muted } => {
                buf.put_actor(*target);
                buf.put_bool(*muted);
            }
            Command::MuteAll { muted } => buf.put_bool(*muted),
            Command::Kick { target } => buf.put_actor(*target),
            Command::ChangeEnvironment { name } => buf.put_string(name)?,
            Command::SetMaterialAccess { granted } => buf.put_bool(*granted),
            Command::RequestEngagement => {}
            Command::ReportEngagement { is_focused, score } => {
                buf.put_bool(*is_focused);
                buf.put_f32_le(*score);
            }
        }
        Ok(())
    }
}

/// Highest sequence a member has applied from one origin's broadcast stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCursor {
    pub origin: ActorId,
    pub lane: Lane,
    pub seq: u64,
}

/// Replicated command state carried to late joiners
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlsSnapshot {
    pub mute_all: bool,
    pub muted: Vec<ActorId>,
    pub environment: Option<String>,
    pub material_access: bool,
}

/// Everything a late joiner needs to catch up.
///
/// Large histories are split over several snapshots on the same ordered
/// stream; only the last one is `complete` and carries cursors and controls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub cursors: Vec<StreamCursor>,
    /// Buffered history in original delivery order
    pub log: Vec<Envelope>,
    pub controls: ControlsSnapshot,
    pub complete: bool,
}

/// Every message kind exchanged between members
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Pose(PoseUpdate),
    StrokeBegin {
        stroke: StrokeId,
        color_index: u8,
        point: Vec3,
    },
    StrokeContinue {
        stroke: StrokeId,
        point: Vec3,
    },
    StrokeEnd {
        stroke: StrokeId,
    },
    /// Remove every stroke whose begin the clearer had seen: per owner, the
    /// highest board sequence applied at clear time
    StrokeClear {
        horizon: Vec<(ActorId, u64)>,
    },
    Command(Command),
    /// Highest sent sequence per broadcast lane, and per direct stream
    Heartbeat {
        broadcast: Vec<(Lane, u64)>,
        direct: Vec<(ActorId, Lane, u64)>,
    },
    /// Request retransmission of missing sequences
    Nack {
        lane: Lane,
        direct: bool,
        missing: Vec<u64>,
    },
    SyncRequest,
    Snapshot(Snapshot),
}

impl Message {
    pub fn kind(&self) -> u8 {
        match self {
            Message::Pose(_) => kind::POSE,
            Message::StrokeBegin { .. } => kind::STROKE_BEGIN,
            Message::StrokeContinue { .. } => kind::STROKE_CONTINUE,
            Message::StrokeEnd { .. } => kind::STROKE_END,
            Message::StrokeClear { .. } => kind::STROKE_CLEAR,
            Message::Command(cmd) => cmd.kind(),
            Message::Heartbeat { .. } => kind::HEARTBEAT,
            Message::Nack { .. } => kind::NACK,
            Message::SyncRequest => kind::SYNC_REQUEST,
            Message::Snapshot(_) => kind::SNAPSHOT,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Pose(_) => "pose",
            Message::StrokeBegin { .. } => "stroke.begin",
            Message::StrokeContinue { .. } => "stroke.continue",
            Message::StrokeEnd { .. } => "stroke.end",
            Message::StrokeClear { .. } => "stroke.clear",
            Message::Command(cmd) => cmd.name(),
            Message::Heartbeat { .. } => "heartbeat",
            Message::Nack { .. } => "nack",
            Message::SyncRequest => "sync.request",
            Message::Snapshot(_) => "snapshot",
        }
    }

    /// Lane the message travels on
    pub fn lane(&self) -> Lane {
        match self {
            Message::Pose(_) => Lane::Pose,
            Message::StrokeBegin { .. }
            | Message::StrokeContinue { .. }
            | Message::StrokeEnd { .. }
            | Message::StrokeClear { .. } => Lane::Board,
            Message::Command(_) => Lane::Command,
            Message::Heartbeat { .. }
            | Message::Nack { .. }
            | Message::SyncRequest
            | Message::Snapshot(_) => Lane::Control,
        }
    }

    /// Target used when the sender does not pick one. Control traffic that
    /// must go to a specific member has no default.
    pub fn default_target(&self) -> Option<Target> {
        match self {
            Message::Pose(_) => Some(Target::Others),
            Message::StrokeBegin { .. }
            | Message::StrokeContinue { .. }
            | Message::StrokeEnd { .. } => Some(Target::Buffered),
            Message::StrokeClear { .. } => Some(Target::All),
            Message::Command(cmd) => Some(cmd.default_target()),
            Message::Heartbeat { .. } => Some(Target::Others),
            Message::Nack { .. } | Message::SyncRequest | Message::Snapshot(_) => None,
        }
    }

    /// Is this sent without retransmission? Lost control traffic of this
    /// kind is regenerated by timers.
    pub fn is_unreliable(&self) -> bool {
        matches!(
            self,
            Message::Pose(_) | Message::Heartbeat { .. } | Message::Nack { .. } | Message::SyncRequest
        )
    }

    /// Stroke this message refers to, for board messages
    pub fn stroke_id(&self) -> Option<StrokeId> {
        match self {
            Message::StrokeBegin { stroke, .. }
            | Message::StrokeContinue { stroke, .. }
            | Message::StrokeEnd { stroke } => Some(*stroke),
            _ => None,
        }
    }

    /// Encode kind byte and body
    pub fn write_to(&self, buf: &mut Vec<u8>) -> AgoraResult<()> {
        buf.put_u8(self.kind());
        match self {
            Message::Pose(update) => {
                buf.put_actor(update.owner);
                buf.put_u64_le(update.seq);
                buf.put_vec3(&update.body.position);
                buf.put_quat(&update.body.rotation);
                buf.put_vec3(&update.head.position);
                buf.put_quat(&update.head.rotation);
            }
            Message::StrokeBegin {
                stroke,
                color_index,
                point,
            } => {
                buf.put_u64_le(stroke.0);
                buf.put_u8(*color_index);
                buf.put_vec3(point);
            }
            Message::StrokeContinue { stroke, point } => {
                buf.put_u64_le(stroke.0);
                buf.put_vec3(point);
            }
            Message::StrokeEnd { stroke } => buf.put_u64_le(stroke.0),
            Message::StrokeClear { horizon } => {
                buf.put_count(horizon.len());
                for (owner, seq) in horizon {
                    buf.put_actor(*owner);
                    buf.put_u64_le(*seq);
                }
            }
            Message::Command(cmd) => cmd.write_body(buf)?,
            Message::Heartbeat { broadcast, direct } => {
                buf.put_count(broadcast.len());
                for (lane, seq) in broadcast {
                    buf.put_u8(lane.to_byte());
                    buf.put_u64_le(*seq);
                }
                buf.put_count(direct.len());
                for (receiver, lane, seq) in direct {
                    buf.put_actor(*receiver);
                    buf.put_u8(lane.to_byte());
                    buf.put_u64_le(*seq);
                }
            }
            Message::Nack {
                lane,
                direct,
                missing,
            } => {
                buf.put_u8(lane.to_byte());
                buf.put_bool(*direct);
                buf.put_count(missing.len());
                for seq in missing {
                    buf.put_u64_le(*seq);
                }
            }
            Message::SyncRequest => {}
            Message::Snapshot(snapshot) => {
                buf.put_count(snapshot.cursors.len());
                for cursor in &snapshot.cursors {
                    buf.put_actor(cursor.origin);
                    buf.put_u8(cursor.lane.to_byte());
                    buf.put_u64_le(cursor.seq);
                }
                let controls = &snapshot.controls;
                buf.put_bool(controls.mute_all);
                buf.put_count(controls.muted.len());
                for actor in &controls.muted {
                    buf.put_actor(*actor);
                }
                match &controls.environment {
                    Some(name) => {
                        buf.put_bool(true);
                        buf.put_string(name)?;
                    }
                    None => buf.put_bool(false),
                }
                buf.put_bool(controls.material_access);
                buf.put_bool(snapshot.complete);
                buf.put_u32_le(snapshot.log.len() as u32);
                for entry in &snapshot.log {
                    let mut nested = Vec::new();
                    entry.write_to(&mut nested)?;
                    buf.put_u32_le(nested.len() as u32);
                    buf.put_slice(&nested);
                }
            }
        }
        Ok(())
    }

    /// Decode kind byte and body
    pub fn read_from(reader: &mut WireReader<'_>) -> AgoraResult<Message> {
        let kind_byte = reader.u8()?;
        let message = match kind_byte {
            kind::POSE => Message::Pose(PoseUpdate {
                owner: reader.actor()?,
                seq: reader.u64()?,
                body: Pose::new(reader.vec3()?, reader.quat()?),
                head: Pose::new(reader.vec3()?, reader.quat()?),
            }),
            kind::STROKE_BEGIN => Message::StrokeBegin {
                stroke: StrokeId(reader.u64()?),
                color_index: reader.u8()?,
                point: reader.vec3()?,
            },
            kind::STROKE_CONTINUE => Message::StrokeContinue {
                stroke: StrokeId(reader.u64()?),
                point: reader.vec3()?,
            },
            kind::STROKE_END => Message::StrokeEnd {
                stroke: StrokeId(reader.u64()?),
            },
            kind::STROKE_CLEAR => {
                let count = reader.count(12)?;
                let mut horizon = Vec::with_capacity(count);
                for _ in 0..count {
                    horizon.push((reader.actor()?, reader.u64()?));
                }
                Message::StrokeClear { horizon }
            }
            kind::CMD_MUTE_ONE => Message::Command(Command::MuteOne {
                target: reader.actor()?,
                muted: reader.bool()?,
            }),
            kind::CMD_MUTE_ALL => Message::Command(Command::MuteAll {
                muted: reader.bool()?,
            }),
            kind::CMD_KICK => Message::Command(Command::Kick {
                target: reader.actor()?,
            }),
            kind::CMD_ENVIRONMENT => Message::Command(Command::ChangeEnvironment {
                name: reader.string()?,
            }),
            kind::CMD_MATERIAL_ACCESS => Message::Command(Command::SetMaterialAccess {
                granted: reader.bool()?,
            }),
            kind::CMD_ENGAGEMENT_REQUEST => Message::Command(Command::RequestEngagement),
            kind::CMD_ENGAGEMENT_REPORT => Message::Command(Command::ReportEngagement {
                is_focused: reader.bool()?,
                score: reader.f32()?,
            }),
            kind::HEARTBEAT => {
                let count = reader.count(9)?;
                let mut broadcast = Vec::with_capacity(count);
                for _ in 0..count {
                    broadcast.push((read_lane(reader)?, reader.u64()?));
                }
                let count = reader.count(13)?;
                let mut direct = Vec::with_capacity(count);
                for _ in 0..count {
                    direct.push((reader.actor()?, read_lane(reader)?, reader.u64()?));
                }
                Message::Heartbeat { broadcast, direct }
            }
            kind::NACK => {
                let lane = read_lane(reader)?;
                let direct = reader.bool()?;
                let count = reader.count(8)?;
                let mut missing = Vec::with_capacity(count);
                for _ in 0..count {
                    missing.push(reader.u64()?);
                }
                Message::Nack {
                    lane,
                    direct,
                    missing,
                }
            }
            kind::SYNC_REQUEST => Message::SyncRequest,
            kind::SNAPSHOT => Message::Snapshot(read_snapshot(reader)?),
            other => return Err(AgoraError::UnknownMessageKind(other)),
        };
        Ok(message)
    }
}

fn read_lane(reader: &mut WireReader<'_>) -> AgoraResult<Lane> {
    let byte = reader.u8()?;
    Lane::from_byte(byte)
        .ok_or_else(|| AgoraError::InvalidWireFormat(format!("unknown lane {byte:#04x}")))
}

fn read_snapshot(reader: &mut WireReader<'_>) -> AgoraResult<Snapshot> {
    let count = reader.count(13)?;
    let mut cursors = Vec::with_capacity(count);
    for _ in 0..count {
        cursors.push(StreamCursor {
            origin: reader.actor()?,
            lane: read_lane(reader)?,
            seq: reader.u64()?,
        });
    }

    let mute_all = reader.bool()?;
    let count = reader.count(4)?;
    let mut muted = Vec::with_capacity(count);
    for _ in 0..count {
        muted.push(reader.actor()?);
    }
    let environment = if reader.bool()? {
        Some(reader.string()?)
    } else {
        None
    };
    let material_access = reader.bool()?;
    let complete = reader.bool()?;

    let entries = reader.u32()? as usize;
    if entries > reader.remaining() {
        return Err(AgoraError::InvalidWireFormat(format!(
            "snapshot log count {entries} exceeds payload"
        )));
    }
    let mut log = Vec::with_capacity(entries);
    for _ in 0..entries {
        let len = reader.u32()? as usize;
        let raw = reader.bytes(len)?;
        log.push(Envelope::decode(raw)?);
    }

    Ok(Snapshot {
        cursors,
        log,
        controls: ControlsSnapshot {
            mute_all,
            muted,
            environment,
            material_access,
        },
        complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        let mut buf = Vec::new();
        message.write_to(&mut buf).unwrap();
        let mut reader = WireReader::new(&buf);
        let decoded = Message::read_from(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0, "{} left trailing bytes", message.name());
        decoded
    }

    #[test]
    fn test_command_privileges() {
        assert!(Command::MuteAll { muted: true }.requires_instructor());
        assert!(Command::Kick { target: ActorId(3) }.requires_instructor());
        assert!(Command::RequestEngagement.requires_instructor());
        assert!(!Command::ReportEngagement {
            is_focused: true,
            score: 80.0
        }
        .requires_instructor());
    }

    #[test]
    fn test_command_routing_table() {
        assert_eq!(Command::MuteAll { muted: true }.default_target(), Target::All);
        assert_eq!(Command::RequestEngagement.default_target(), Target::Others);
        assert_eq!(
            Command::ReportEngagement {
                is_focused: false,
                score: 10.0
            }
            .default_target(),
            Target::Authority
        );
    }

    #[test]
    fn test_board_messages_are_buffered() {
        let begin = Message::StrokeBegin {
            stroke: StrokeId(7),
            color_index: 0,
            point: Vec3::ZERO,
        };
        assert_eq!(begin.lane(), Lane::Board);
        assert_eq!(begin.default_target(), Some(Target::Buffered));
        assert_eq!(
            Message::StrokeClear { horizon: vec![] }.default_target(),
            Some(Target::All)
        );
        assert_eq!(begin.stroke_id(), Some(StrokeId(7)));
    }

    #[test]
    fn test_environment_command_survives_codec() {
        let message = Message::Command(Command::ChangeEnvironment {
            name: "Lecture_Hall".into(),
        });
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_heartbeat_survives_codec() {
        let message = Message::Heartbeat {
            broadcast: vec![(Lane::Board, 12), (Lane::Command, 3)],
            direct: vec![(ActorId(4), Lane::Control, 2)],
        };
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut reader = WireReader::new(&[0xEE]);
        assert_eq!(
            Message::read_from(&mut reader),
            Err(AgoraError::UnknownMessageKind(0xEE))
        );
    }
}
