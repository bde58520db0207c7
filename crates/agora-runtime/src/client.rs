//! Client runtime loop

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use agora_authority::{AuthorityCommandBus, CommandEffect, SessionControls};
use agora_board::{Board, StrokeReplicator};
use agora_core::{
    ActorId, AgoraError, AgoraResult, LeaveReason, Role, SessionTime, StrokeId, Target, Vec3,
};
use agora_engagement::{EngagementAggregator, EngagementSummary, EngagementTracker};
use agora_pose::PoseReplicator;
use agora_replication::{ChannelStats, Delivery, Inbound, SessionContext};
use agora_session::{JoinOutcome, Room};
use agora_transport::{Transport, TransportEvent};
use agora_voice::{VoiceGate, VoiceOutput};
use agora_wire::{Command, Message, Pose};
use tracing::{debug, info, warn};

use crate::{ClientConfig, ClientEvent, RuntimeStats, Scheduler, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    PublishPose,
    ServiceChannel,
    /// Instructor asks the class for engagement samples
    PollEngagement,
    /// Self-report while unfocused
    ReportFocus,
    /// Has this member been unfocused past the flag threshold?
    CheckFlag(ActorId),
}

/// Lifecycle of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Active,
    Left,
    Kicked,
    Disconnected,
}

/// One member's runtime for one session
pub struct Client {
    config: ClientConfig,
    ctx: SessionContext,
    poses: PoseReplicator,
    board: StrokeReplicator,
    bus: AuthorityCommandBus,
    voice: VoiceGate,
    output: Box<dyn VoiceOutput>,
    tracker: EngagementTracker,
    aggregator: EngagementAggregator,
    summary: EngagementSummary,
    scheduler: Scheduler<Task>,
    flag_checks: HashMap<ActorId, TimerId>,
    flagged: BTreeSet<ActorId>,
    focus_report: Option<TimerId>,
    events: VecDeque<ClientEvent>,
    state: ClientState,
    stats: RuntimeStats,
}

impl Client {
    /// Start a client for a successful join. The session clock starts at
    /// zero.
    pub fn new(
        config: ClientConfig,
        outcome: JoinOutcome,
        transport: Box<dyn Transport>,
        mut output: Box<dyn VoiceOutput>,
    ) -> AgoraResult<Self> {
        config.validate()?;
        let now = SessionTime::ZERO;
        let ctx = SessionContext::from_join(outcome, transport, config.channel_config(), now);
        let local = ctx.local_actor();
        let engagement = config.engagement_config();

        let mut scheduler = Scheduler::new();
        scheduler.every(now, config.pose_config().publish_interval(), None, Task::PublishPose);
        let service = config.channel.nack_interval.min(config.channel.heartbeat_interval);
        scheduler.every(now, service, None, Task::ServiceChannel);
        if ctx.local.role == Role::Instructor {
            let poll = engagement.poll_interval;
            scheduler.every(now + poll, poll, None, Task::PollEngagement);
        }

        let voice = VoiceGate::new(local);
        voice.drive(output.as_mut());

        info!(
            session = %ctx.session,
            actor = %local,
            role = ?ctx.local.role,
            syncing = ctx.channel.is_syncing(),
            "client joined"
        );
        Ok(Client {
            poses: PoseReplicator::new(config.pose_config()),
            board: StrokeReplicator::new(local, config.board_config()),
            bus: AuthorityCommandBus::new(),
            voice,
            output,
            aggregator: EngagementAggregator::new(engagement.window),
            tracker: EngagementTracker::new(engagement, now),
            summary: EngagementSummary::default(),
            scheduler,
            flag_checks: HashMap::new(),
            flagged: BTreeSet::new(),
            focus_report: None,
            events: VecDeque::new(),
            state: ClientState::Active,
            stats: RuntimeStats::default(),
            config,
            ctx,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn room(&self) -> &Room {
        &self.ctx.room
    }

    #[inline]
    pub fn local_actor(&self) -> ActorId {
        self.ctx.local_actor()
    }

    pub fn authority(&self) -> Option<ActorId> {
        self.ctx.authority()
    }

    pub fn is_authority(&self) -> bool {
        self.ctx.is_authority()
    }

    pub fn now(&self) -> SessionTime {
        self.ctx.now
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ClientState::Active
    }

    pub fn is_syncing(&self) -> bool {
        self.ctx.channel.is_syncing()
    }

    pub fn board(&self) -> &Board {
        self.board.board()
    }

    pub fn poses(&self) -> &PoseReplicator {
        &self.poses
    }

    pub fn controls(&self) -> &SessionControls {
        self.bus.controls()
    }

    pub fn voice(&self) -> &VoiceGate {
        &self.voice
    }

    pub fn voice_output(&self) -> &dyn VoiceOutput {
        self.output.as_ref()
    }

    pub fn effective_muted(&self) -> bool {
        self.voice.effective_muted()
    }

    /// Local engagement score right now
    pub fn engagement_score(&self) -> f32 {
        self.tracker.score(self.ctx.now)
    }

    pub fn engagement_summary(&self) -> EngagementSummary {
        self.summary
    }

    pub fn aggregator(&self) -> &EngagementAggregator {
        &self.aggregator
    }

    /// Members unfocused longer than the configured flag threshold
    pub fn flagged_members(&self) -> Vec<ActorId> {
        self.aggregator
            .flagged_members(self.config.engagement.flag_threshold, self.ctx.now)
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.ctx.channel.stats()
    }

    pub fn stats(&self) -> RuntimeStats {
        let channel = self.ctx.channel.stats();
        let commands = self.bus.stats();
        RuntimeStats {
            messages_out: channel.sent,
            duplicates_dropped: channel.duplicates,
            retransmissions: channel.retransmissions,
            commands_rejected: commands.rejected + commands.invalid,
            ..self.stats
        }
    }

    /// Take every observation event raised so far
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain(..).collect()
    }

    fn ensure_active(&self) -> AgoraResult<()> {
        match self.state {
            ClientState::Active => Ok(()),
            _ => Err(AgoraError::Disconnected),
        }
    }

    /// Execute one tick of the runtime loop
    pub fn tick(&mut self, dt: Duration) -> AgoraResult<()> {
        self.ensure_active()?;
        self.stats.ticks += 1;

        // Stage 1: Advance clock
        self.ctx.now = self.ctx.now + dt;

        // Stage 2: Ingest transport events
        self.ingest();

        // Stage 3: Dispatch deliveries
        self.dispatch();
        if !self.is_active() {
            return Ok(());
        }

        // Stage 4: Fire due timers
        self.run_timers();
        self.dispatch();

        // Stage 5: Pose interpolation
        self.poses.advance(dt);
        for owner in self.poses.drop_stale(self.ctx.now) {
            self.events.push_back(ClientEvent::PoseExpired { owner });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entry points

    /// Capture the local transforms; the publish timer sends them
    pub fn publish_pose(&mut self, body: Pose, head: Pose) {
        self.poses.publish(body, head);
    }

    pub fn begin_stroke(&mut self, color_index: u8, point: Vec3) -> AgoraResult<StrokeId> {
        self.ensure_active()?;
        self.tracker.record_interaction(self.ctx.now);
        let result = self.board.begin_stroke(&mut self.ctx, color_index, point);
        self.dispatch();
        result
    }

    pub fn continue_stroke(&mut self, stroke: StrokeId, point: Vec3) -> AgoraResult<bool> {
        self.ensure_active()?;
        let result = self.board.continue_stroke(&mut self.ctx, stroke, point);
        self.dispatch();
        result
    }

    pub fn end_stroke(&mut self, stroke: StrokeId) -> AgoraResult<bool> {
        self.ensure_active()?;
        let result = self.board.end_stroke(&mut self.ctx, stroke);
        self.dispatch();
        result
    }

    pub fn clear_board(&mut self) -> AgoraResult<()> {
        self.ensure_active()?;
        self.tracker.record_interaction(self.ctx.now);
        let result = self.board.clear_board(&mut self.ctx);
        self.dispatch();
        result
    }

    /// Issue a command as the local member
    pub fn issue(&mut self, command: Command) -> AgoraResult<Target> {
        self.ensure_active()?;
        let result = self.bus.issue(&mut self.ctx, command);
        self.dispatch();
        result
    }

    /// Local microphone toggle. Returns the effective mute.
    pub fn set_local_mute(&mut self, muted: bool) -> bool {
        let change = self.voice.set_local_mute(muted);
        self.apply_mute(change);
        self.voice.effective_muted()
    }

    pub fn record_interaction(&mut self) {
        self.tracker.record_interaction(self.ctx.now);
    }

    /// Window focus changed. Students report the change right away and keep
    /// reporting while unfocused.
    pub fn set_focused(&mut self, focused: bool) -> AgoraResult<()> {
        self.ensure_active()?;
        let now = self.ctx.now;
        if !self.tracker.set_focused(focused, now) || self.ctx.local.role == Role::Instructor {
            return Ok(());
        }
        if focused {
            if let Some(id) = self.focus_report.take() {
                self.scheduler.cancel(id);
            }
        } else if self.focus_report.is_none() {
            let period = self.config.engagement.poll_interval;
            let owner = Some(self.ctx.local_actor());
            self.focus_report = Some(self.scheduler.every(now + period, period, owner, Task::ReportFocus));
        }
        self.report_engagement();
        self.dispatch();
        Ok(())
    }

    /// Leave the session
    pub fn leave(&mut self) -> AgoraResult<()> {
        self.ensure_active()?;
        self.ctx.channel.transport().leave()?;
        info!(actor = %self.ctx.local_actor(), "left session");
        self.shut_down(ClientState::Left);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stages

    fn ingest(&mut self) {
        let now = self.ctx.now;
        let events = self.ctx.channel.transport().poll();
        for event in events {
            if !self.is_active() {
                break;
            }
            match event {
                TransportEvent::Message { from, bytes } => {
                    self.stats.messages_in += 1;
                    self.ctx.channel.ingest(from, &bytes, now);
                }
                membership => {
                    // Deliveries received before a membership change apply first
                    self.dispatch();
                    self.on_membership(membership);
                }
            }
        }
    }

    fn on_membership(&mut self, event: TransportEvent) {
        let before = self.ctx.authority();
        let local = self.ctx.local_actor();
        match event {
            TransportEvent::MemberJoined(info) => {
                let actor = info.actor;
                if !self.ctx.room.insert(info.clone()) {
                    debug!(actor = %actor, "known member announced again");
                }
                info!(actor = %actor, role = ?info.role, "member joined");
                self.events.push_back(ClientEvent::MemberJoined(info));
                self.refresh_authority(before);
                if self.ctx.is_authority() {
                    self.send_snapshot(actor);
                }
            }
            TransportEvent::MemberLeft { actor, reason } if actor == local => match reason {
                LeaveReason::Kicked => self.on_kicked(),
                LeaveReason::Left => self.shut_down(ClientState::Left),
                LeaveReason::TimedOut => self.on_disconnected(),
            },
            TransportEvent::MemberLeft { actor, reason } => {
                self.on_member_left(actor, reason);
                self.refresh_authority(before);
            }
            TransportEvent::MemberSuspended(actor) => {
                if let Err(e) = self.ctx.room.suspend(actor, self.ctx.now) {
                    debug!(actor = %actor, error = %e, "suspend for unknown member");
                }
                self.events.push_back(ClientEvent::MemberSuspended(actor));
                self.refresh_authority(before);
            }
            TransportEvent::MemberResumed(actor) => {
                if let Err(e) = self.ctx.room.resume(actor) {
                    debug!(actor = %actor, error = %e, "resume for unknown member");
                }
                self.events.push_back(ClientEvent::MemberResumed(actor));
                self.refresh_authority(before);
            }
            TransportEvent::Disconnected => self.on_disconnected(),
            TransportEvent::Message { .. } => {}
        }
    }

    fn on_member_left(&mut self, actor: ActorId, reason: LeaveReason) {
        self.ctx.room.remove(actor);
        self.ctx.channel.forget(actor);
        self.poses.remove(actor);
        self.bus.forget(actor);
        self.aggregator.remove(actor);
        self.flag_checks.remove(&actor);
        self.flagged.remove(&actor);
        let cancelled = self.scheduler.cancel_owner(actor);
        info!(actor = %actor, reason = ?reason, cancelled, "member left");
        self.events.push_back(ClientEvent::MemberLeft { actor, reason });
        self.refresh_summary();
    }

    fn on_kicked(&mut self) {
        if !self.is_active() {
            return;
        }
        warn!(actor = %self.ctx.local_actor(), "removed from session by an instructor");
        if let Err(e) = self.ctx.channel.transport().leave() {
            debug!(error = %e, "leave after kick");
        }
        self.shut_down(ClientState::Kicked);
        self.events.push_back(ClientEvent::Kicked);
    }

    fn on_disconnected(&mut self) {
        if !self.is_active() {
            return;
        }
        warn!(actor = %self.ctx.local_actor(), "connection to session lost");
        self.shut_down(ClientState::Disconnected);
        self.events.push_back(ClientEvent::Disconnected);
    }

    fn shut_down(&mut self, state: ClientState) {
        self.state = state;
        self.scheduler = Scheduler::new();
        self.flag_checks.clear();
        self.focus_report = None;
    }

    fn refresh_authority(&mut self, before: Option<ActorId>) {
        let current = self.ctx.authority();
        if current != before {
            info!(previous = ?before, current = ?current, "authority changed");
            self.events.push_back(ClientEvent::AuthorityChanged {
                previous: before,
                current,
            });
        }
    }

    fn send_snapshot(&mut self, to: ActorId) {
        let controls = self.bus.snapshot();
        if let Err(e) = self.ctx.channel.send_snapshot(to, controls) {
            warn!(to = %to, error = %e, "snapshot not sent");
        }
    }

    fn dispatch(&mut self) {
        while self.is_active() {
            let Some(item) = self.ctx.channel.next_inbound() else {
                break;
            };
            match item {
                Inbound::Message(delivery) => self.on_delivery(delivery),
                Inbound::SyncRequested { from } => self.send_snapshot(from),
                Inbound::Synced { from, controls } => {
                    self.bus.restore(&controls);
                    let individual = controls.muted.contains(&self.ctx.local_actor());
                    let change = self.voice.restore(controls.mute_all, individual);
                    self.apply_mute(change);
                    info!(from = %from, strokes = self.board.board().len(), "caught up with session");
                    self.events.push_back(ClientEvent::Synced);
                }
            }
        }
    }

    fn on_delivery(&mut self, delivery: Delivery) {
        self.stats.deliveries += 1;
        let Delivery {
            origin,
            seq,
            message,
            ..
        } = delivery;
        match &message {
            Message::Pose(update) => {
                if self.poses.on_remote_update(origin, update, self.ctx.now) {
                    self.events.push_back(ClientEvent::PoseUpdated { owner: origin });
                }
            }
            Message::StrokeBegin { .. }
            | Message::StrokeContinue { .. }
            | Message::StrokeEnd { .. }
            | Message::StrokeClear { .. } => {
                for update in self.board.on_message(origin, seq, &message) {
                    self.events.push_back(ClientEvent::StrokeUpdated(update));
                }
            }
            Message::Command(command) => self.on_command(origin, command),
            Message::Heartbeat { .. }
            | Message::Nack { .. }
            | Message::SyncRequest
            | Message::Snapshot(_) => {
                debug!(origin = %origin, kind = message.name(), "control message reached dispatch");
            }
        }
    }

    fn on_command(&mut self, origin: ActorId, command: &Command) {
        let Some(effect) = self.bus.receive(&self.ctx.room, origin, command) else {
            return;
        };
        self.events.push_back(ClientEvent::CommandApplied {
            origin,
            effect: effect.clone(),
        });
        let local = self.ctx.local_actor();
        match effect {
            CommandEffect::MuteAllChanged(muted) => {
                let change = self.voice.on_authority_mute_all(muted);
                self.apply_mute(change);
            }
            CommandEffect::MuteOneChanged { target, muted } => {
                let change = self.voice.on_authority_mute_one(target, muted);
                self.apply_mute(change);
            }
            CommandEffect::Kicked { target } if target == local => self.on_kicked(),
            // Others are removed by the membership event that follows
            CommandEffect::Kicked { .. } => {}
            CommandEffect::EnvironmentChanged(_) | CommandEffect::MaterialAccessChanged(_) => {}
            CommandEffect::EngagementRequested { .. } => self.report_engagement(),
            CommandEffect::EngagementReported {
                reporter,
                is_focused,
                score,
            } => self.record_report(reporter, is_focused, score),
        }
    }

    fn apply_mute(&mut self, change: Option<bool>) {
        if let Some(effective_muted) = change {
            self.voice.drive(self.output.as_mut());
            self.events
                .push_back(ClientEvent::MuteStateChanged { effective_muted });
        }
    }

    fn report_engagement(&mut self) {
        let sample = self.tracker.sample(self.ctx.local_actor(), self.ctx.now);
        if let Err(e) = self
            .bus
            .report_engagement(&mut self.ctx, sample.is_focused, sample.score)
        {
            debug!(error = %e, "engagement report not sent");
        }
    }

    fn record_report(&mut self, reporter: ActorId, is_focused: bool, score: f32) {
        let now = self.ctx.now;
        self.aggregator.on_sample(reporter, is_focused, score, now);
        if is_focused {
            if let Some(id) = self.flag_checks.remove(&reporter) {
                self.scheduler.cancel(id);
            }
            self.flagged.remove(&reporter);
        } else if !self.flag_checks.contains_key(&reporter) && !self.flagged.contains(&reporter) {
            let since = self
                .aggregator
                .member(reporter)
                .and_then(|m| m.unfocused_since())
                .unwrap_or(now);
            let at = since + self.config.engagement.flag_threshold + self.config.tick_interval;
            let id = self.scheduler.once(at, Some(reporter), Task::CheckFlag(reporter));
            self.flag_checks.insert(reporter, id);
        }
        self.refresh_summary();
    }

    fn check_flag(&mut self, actor: ActorId) {
        self.flag_checks.remove(&actor);
        if !self.flagged_members().contains(&actor) {
            return;
        }
        let score = self
            .aggregator
            .member(actor)
            .and_then(|m| m.latest())
            .map_or(0.0, |s| s.score);
        info!(actor = %actor, score, "member flagged as unfocused");
        self.flagged.insert(actor);
        self.events.push_back(ClientEvent::MemberFlagged { actor, score });
    }

    fn refresh_summary(&mut self) {
        let summary = self.aggregator.summary();
        if summary != self.summary {
            self.summary = summary;
            self.events
                .push_back(ClientEvent::EngagementSummaryChanged(summary));
        }
    }

    fn run_timers(&mut self) {
        let now = self.ctx.now;
        for (_, task) in self.scheduler.due(now) {
            if !self.is_active() {
                break;
            }
            self.stats.timers_fired += 1;
            match task {
                Task::PublishPose => {
                    if let Err(e) = self.poses.flush(&mut self.ctx) {
                        debug!(error = %e, "pose publish failed");
                    }
                }
                Task::ServiceChannel => self.ctx.channel.service(&self.ctx.room, now),
                Task::PollEngagement => {
                    if let Err(e) = self.bus.issue(&mut self.ctx, Command::RequestEngagement) {
                        debug!(error = %e, "engagement poll not sent");
                    }
                }
                Task::ReportFocus => self.report_engagement(),
                Task::CheckFlag(actor) => self.check_flag(actor),
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.ctx.session)
            .field("actor", &self.ctx.local_actor())
            .field("state", &self.state)
            .field("now", &self.ctx.now)
            .finish()
    }
}
