//! Authority command bus

use agora_core::{ActorId, AgoraError, AgoraResult, Role, Target};
use agora_replication::SessionContext;
use agora_session::Room;
use agora_wire::{Command, ControlsSnapshot, Message};
use tracing::{debug, info, warn};

use crate::SessionControls;

/// Effect of an accepted command on this client
#[derive(Debug, Clone, PartialEq)]
pub enum CommandEffect {
    MuteAllChanged(bool),
    MuteOneChanged { target: ActorId, muted: bool },
    Kicked { target: ActorId },
    EnvironmentChanged(String),
    MaterialAccessChanged(bool),
    EngagementRequested { requester: ActorId },
    EngagementReported {
        reporter: ActorId,
        is_focused: bool,
        score: f32,
    },
}

/// Command counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub issued: u64,
    pub applied: u64,
    pub rejected: u64,
    pub invalid: u64,
}

/// Validate `command` from `issuer` against `room`
pub fn authorize(room: &Room, issuer: ActorId, command: &Command) -> AgoraResult<()> {
    if command.requires_instructor() && room.role_of(issuer) != Some(Role::Instructor) {
        return Err(AgoraError::AuthorityViolation {
            issuer,
            command: command.name(),
        });
    }
    match command {
        Command::MuteOne { target, .. } | Command::Kick { target } if !room.contains(*target) => {
            Err(AgoraError::MemberNotFound(*target))
        }
        _ => Ok(()),
    }
}

/// Validates, routes and applies instructor commands
#[derive(Debug, Default)]
pub struct AuthorityCommandBus {
    controls: SessionControls,
    /// Instructor that asked for engagement most recently
    requester: Option<ActorId>,
    stats: CommandStats,
}

impl AuthorityCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn controls(&self) -> &SessionControls {
        &self.controls
    }

    pub fn stats(&self) -> CommandStats {
        self.stats
    }

    pub fn snapshot(&self) -> ControlsSnapshot {
        self.controls.snapshot()
    }

    /// Adopt the controls carried by a late-joiner snapshot
    pub fn restore(&mut self, snapshot: &ControlsSnapshot) {
        self.controls = SessionControls::from_snapshot(snapshot);
    }

    pub fn forget(&mut self, actor: ActorId) {
        self.controls.forget(actor);
        if self.requester == Some(actor) {
            self.requester = None;
        }
    }

    /// Issue a command as the local member. Rejected commands never leave
    /// this client. The command takes effect here when it is delivered back.
    pub fn issue(&mut self, ctx: &mut SessionContext, command: Command) -> AgoraResult<Target> {
        let issuer = ctx.local_actor();
        if let Err(e) = authorize(&ctx.room, issuer, &command) {
            warn!(issuer = %issuer, command = command.name(), error = %e, "command rejected");
            self.count_rejection(&e);
            return Err(e);
        }

        if let Command::ReportEngagement { is_focused, score } = command {
            self.report_engagement(ctx, is_focused, score)?;
            return Ok(Target::Authority);
        }

        let target = command.default_target();
        let kick = match command {
            Command::Kick { target } => Some(target),
            _ => None,
        };
        info!(issuer = %issuer, command = command.name(), "command issued");
        ctx.send(target, Message::Command(command))?;
        if let Some(kicked) = kick {
            ctx.channel.transport().kick(kicked)?;
        }
        self.stats.issued += 1;
        Ok(target)
    }

    /// Answer an engagement request. Reports go to the authority, and also
    /// straight to the requesting instructor when that is someone else.
    pub fn report_engagement(
        &mut self,
        ctx: &mut SessionContext,
        is_focused: bool,
        score: f32,
    ) -> AgoraResult<usize> {
        let report = Command::ReportEngagement { is_focused, score };
        let mut targets = vec![Target::Authority];
        if let Some(requester) = self.requester {
            let local = ctx.local_actor();
            if Some(requester) != ctx.authority() && requester != local && ctx.room.contains(requester) {
                targets.push(Target::Single(requester));
            }
        }
        for target in &targets {
            ctx.send(*target, Message::Command(report.clone()))?;
        }
        self.stats.issued += 1;
        Ok(targets.len())
    }

    /// Apply a delivered command from `origin`. Invalid commands are logged
    /// and dropped.
    pub fn receive(&mut self, room: &Room, origin: ActorId, command: &Command) -> Option<CommandEffect> {
        if let Err(e) = authorize(room, origin, command) {
            warn!(origin = %origin, command = command.name(), error = %e, "received command dropped");
            self.count_rejection(&e);
            return None;
        }
        self.stats.applied += 1;
        let effect = match command {
            Command::MuteAll { muted } => {
                self.controls.mute_all = *muted;
                CommandEffect::MuteAllChanged(*muted)
            }
            Command::MuteOne { target, muted } => {
                self.controls.set_muted(*target, *muted);
                CommandEffect::MuteOneChanged {
                    target: *target,
                    muted: *muted,
                }
            }
            Command::Kick { target } => CommandEffect::Kicked { target: *target },
            Command::ChangeEnvironment { name } => {
                self.controls.environment = Some(name.clone());
                CommandEffect::EnvironmentChanged(name.clone())
            }
            Command::SetMaterialAccess { granted } => {
                self.controls.material_access = *granted;
                CommandEffect::MaterialAccessChanged(*granted)
            }
            Command::RequestEngagement => {
                self.requester = Some(origin);
                CommandEffect::EngagementRequested { requester: origin }
            }
            Command::ReportEngagement { is_focused, score } => CommandEffect::EngagementReported {
                reporter: origin,
                is_focused: *is_focused,
                score: *score,
            },
        };
        debug!(origin = %origin, command = command.name(), "command applied");
        Some(effect)
    }

    fn count_rejection(&mut self, error: &AgoraError) {
        match error {
            AgoraError::AuthorityViolation { .. } => self.stats.rejected += 1,
            _ => self.stats.invalid += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{MemberInfo, SessionId, SessionTime};
    use agora_replication::{ChannelConfig, Inbound};
    use agora_session::JoinRequest;
    use agora_transport::{HubConfig, LoopbackHub, TransportEvent};

    fn classroom() -> Room {
        let mut room = Room::new(SessionId(1), "Classroom_1234", 20);
        room.insert(MemberInfo::new(ActorId(1), "ada", Role::Student));
        room.insert(MemberInfo::new(ActorId(2), "teacher", Role::Instructor));
        room.insert(MemberInfo::new(ActorId(3), "obs", Role::Observer));
        room
    }

    #[test]
    fn test_only_instructors_issue_privileged_commands() {
        let room = classroom();
        let mute = Command::MuteAll { muted: true };
        assert!(authorize(&room, ActorId(2), &mute).is_ok());
        for issuer in [ActorId(1), ActorId(3), ActorId(9)] {
            assert_eq!(
                authorize(&room, issuer, &mute),
                Err(AgoraError::AuthorityViolation {
                    issuer,
                    command: "cmd.muteAll"
                })
            );
        }
        // Anyone may self-report, authority holder or not
        let report = Command::ReportEngagement {
            is_focused: true,
            score: 80.0,
        };
        assert!(authorize(&room, ActorId(3), &report).is_ok());
    }

    #[test]
    fn test_kick_is_role_gated_not_authority_gated() {
        let room = classroom();
        // Actor 1 holds authority but is a student
        assert_eq!(room.authority(), Some(ActorId(1)));
        let kick = Command::Kick { target: ActorId(3) };
        assert!(authorize(&room, ActorId(1), &kick).is_err());
        assert!(authorize(&room, ActorId(2), &kick).is_ok());
    }

    #[test]
    fn test_commands_against_non_members_invalid() {
        let room = classroom();
        let mut bus = AuthorityCommandBus::new();
        let mute = Command::MuteOne {
            target: ActorId(7),
            muted: true,
        };
        assert_eq!(bus.receive(&room, ActorId(2), &mute), None);
        assert_eq!(bus.stats().invalid, 1);
        assert!(bus.controls().muted.is_empty());
    }

    #[test]
    fn test_receive_updates_controls() {
        let room = classroom();
        let mut bus = AuthorityCommandBus::new();
        let teacher = ActorId(2);
        bus.receive(&room, teacher, &Command::MuteAll { muted: true });
        bus.receive(&room, teacher, &Command::MuteOne { target: ActorId(3), muted: true });
        bus.receive(&room, teacher, &Command::ChangeEnvironment { name: "Lab".into() });
        assert_eq!(
            bus.receive(&room, ActorId(1), &Command::SetMaterialAccess { granted: true }),
            None
        );

        let controls = bus.controls();
        assert!(controls.mute_all);
        assert!(controls.is_individually_muted(ActorId(3)));
        assert_eq!(controls.environment.as_deref(), Some("Lab"));
        assert!(!controls.material_access);
        assert_eq!(bus.stats().rejected, 1);
    }

    fn join(hub: &LoopbackHub, name: &str, role: Role) -> SessionContext {
        let (transport, outcome) = hub
            .join(JoinRequest::named("Classroom_1234", name, role))
            .unwrap();
        SessionContext::from_join(outcome, Box::new(transport), ChannelConfig::default(), SessionTime::ZERO)
    }

    fn deliveries(ctx: &mut SessionContext) -> Vec<(ActorId, Target, Command)> {
        let now = ctx.now;
        for event in ctx.channel.transport().poll() {
            match event {
                TransportEvent::Message { from, bytes } => ctx.channel.ingest(from, &bytes, now),
                TransportEvent::MemberJoined(info) => {
                    let actor = info.actor;
                    ctx.room.insert(info);
                    if ctx.is_authority() {
                        ctx.channel.send_snapshot(actor, ControlsSnapshot::default()).unwrap();
                    }
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        while let Some(item) = ctx.channel.next_inbound() {
            if let Inbound::Message(delivery) = item {
                if let Message::Command(command) = delivery.message {
                    out.push((delivery.origin, delivery.target, command));
                }
            }
        }
        out
    }

    #[test]
    fn test_rejected_issue_is_never_sent() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut student = join(&hub, "ada", Role::Student);
        let mut teacher = join(&hub, "teacher", Role::Instructor);
        let mut bus = AuthorityCommandBus::new();

        let result = bus.issue(&mut student, Command::MuteAll { muted: true });
        assert!(matches!(result, Err(AgoraError::AuthorityViolation { .. })));
        assert!(deliveries(&mut student).is_empty());
        assert!(deliveries(&mut teacher).is_empty());
    }

    #[test]
    fn test_kick_removes_target() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut teacher = join(&hub, "teacher", Role::Instructor);
        let mut student = join(&hub, "ada", Role::Student);
        deliveries(&mut teacher);
        let mut bus = AuthorityCommandBus::new();

        let target = student.local_actor();
        assert_eq!(bus.issue(&mut teacher, Command::Kick { target }).unwrap(), Target::All);
        assert_eq!(hub.roster(teacher.session), vec![teacher.local_actor()]);
        // The kick command reaches the target before its removal notice
        let events = student.channel.transport().poll();
        assert!(matches!(events.first(), Some(TransportEvent::Message { .. })));
        assert!(matches!(
            events.last(),
            Some(TransportEvent::MemberLeft { actor, .. }) if *actor == target
        ));
    }

    #[test]
    fn test_report_goes_to_authority_and_requester() {
        let hub = LoopbackHub::new(HubConfig::default());
        let mut first = join(&hub, "ada", Role::Student);
        let mut teacher = join(&hub, "teacher", Role::Instructor);
        let mut student = join(&hub, "ben", Role::Student);
        deliveries(&mut first);
        deliveries(&mut teacher);

        let mut teacher_bus = AuthorityCommandBus::new();
        let mut student_bus = AuthorityCommandBus::new();
        teacher_bus.issue(&mut teacher, Command::RequestEngagement).unwrap();

        let received = deliveries(&mut student);
        assert_eq!(received.len(), 1);
        let (origin, _, command) = &received[0];
        let effect = student_bus.receive(&student.room, *origin, command);
        assert_eq!(effect, Some(CommandEffect::EngagementRequested { requester: teacher.local_actor() }));

        assert_eq!(student_bus.report_engagement(&mut student, false, 42.0).unwrap(), 2);
        let at_authority: Vec<_> = deliveries(&mut first)
            .into_iter()
            .filter(|(_, _, command)| matches!(command, Command::ReportEngagement { .. }))
            .collect();
        assert_eq!(at_authority.len(), 1);
        assert_eq!(at_authority[0].1, Target::Single(first.local_actor()));
        let at_teacher = deliveries(&mut teacher);
        assert_eq!(at_teacher.len(), 1);
        assert_eq!(at_teacher[0].1, Target::Single(teacher.local_actor()));
    }
}
