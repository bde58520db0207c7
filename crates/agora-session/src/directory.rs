//! Session directory - the room provider's view of every active room
//!
//! Rooms are created on first join and destroyed when their roster empties.
//! Every roster change that moves authority emits `AuthorityChanged`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use agora_core::{
    ActorId, AgoraError, AgoraResult, LeaveReason, MemberInfo, Role, SessionId, SessionTime,
    Target,
};
use tracing::{debug, info};

use crate::{Member, Room, DEFAULT_CAPACITY};

/// Request to join (or create) a room
#[derive(Debug, Clone)]
pub struct JoinRequest {
    /// Named room, or `None` to quick-join the first room with a free seat
    pub room: Option<String>,
    pub capacity: usize,
    /// Create the named room when it does not exist
    pub create_if_missing: bool,
    pub display_name: String,
    pub role: Role,
}

impl JoinRequest {
    /// Join the named room, creating it if needed
    pub fn named(room: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        JoinRequest {
            room: Some(room.into()),
            capacity: DEFAULT_CAPACITY,
            create_if_missing: true,
            display_name: display_name.into(),
            role,
        }
    }

    /// Join the first room with a free seat, creating one if none has
    pub fn quick(display_name: impl Into<String>, role: Role) -> Self {
        JoinRequest {
            room: None,
            capacity: DEFAULT_CAPACITY,
            create_if_missing: true,
            display_name: display_name.into(),
            role,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Fail with `RoomNotFound` instead of creating
    pub fn join_only(mut self) -> Self {
        self.create_if_missing = false;
        self
    }
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub session: SessionId,
    pub room: String,
    pub capacity: usize,
    pub member: MemberInfo,
    /// Roster after the join, joiner included
    pub roster: Vec<Member>,
    pub created: bool,
}

/// Membership events, drained by the room provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    MemberJoined {
        session: SessionId,
        member: MemberInfo,
    },
    MemberLeft {
        session: SessionId,
        actor: ActorId,
        reason: LeaveReason,
    },
    MemberSuspended {
        session: SessionId,
        actor: ActorId,
    },
    MemberResumed {
        session: SessionId,
        actor: ActorId,
    },
    AuthorityChanged {
        session: SessionId,
        previous: Option<ActorId>,
        current: Option<ActorId>,
    },
    SessionClosed {
        session: SessionId,
    },
}

/// Registry of active rooms
#[derive(Debug, Default)]
pub struct SessionDirectory {
    rooms: BTreeMap<SessionId, Room>,
    by_name: HashMap<String, SessionId>,
    next_session: u64,
    events: Vec<DirectoryEvent>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room, creating it when allowed
    pub fn create_or_join(&mut self, request: JoinRequest) -> AgoraResult<JoinOutcome> {
        let (session, created) = match &request.room {
            Some(name) => match self.by_name.get(name) {
                Some(&session) => (session, false),
                None if request.create_if_missing => {
                    (self.create_room(Some(name.clone()), request.capacity), true)
                }
                None => return Err(AgoraError::RoomNotFound(name.clone())),
            },
            None => match self
                .rooms
                .values()
                .find(|room| room.accepts_joins())
                .map(Room::id)
            {
                Some(session) => (session, false),
                None if request.create_if_missing => {
                    (self.create_room(None, request.capacity), true)
                }
                None => return Err(AgoraError::RoomNotFound("<any>".into())),
            },
        };

        let room = self
            .rooms
            .get_mut(&session)
            .ok_or(AgoraError::SessionNotFound)?;
        let before = room.authority();
        let member = room.admit(request.display_name, request.role)?;
        let after = room.authority();
        let outcome = JoinOutcome {
            session,
            room: room.name().to_string(),
            capacity: room.capacity(),
            member: member.clone(),
            roster: room.members().cloned().collect(),
            created,
        };

        info!(
            session = %session,
            actor = %member.actor,
            room = %outcome.room,
            role = ?member.role,
            "member joined"
        );
        self.events.push(DirectoryEvent::MemberJoined { session, member });
        self.note_authority(session, before, after);
        Ok(outcome)
    }

    fn create_room(&mut self, name: Option<String>, capacity: usize) -> SessionId {
        self.next_session += 1;
        let session = SessionId(self.next_session);
        let name = name.unwrap_or_else(|| format!("Room_{}", session.0));
        debug!(session = %session, room = %name, capacity, "room created");
        self.by_name.insert(name.clone(), session);
        self.rooms.insert(session, Room::new(session, name, capacity));
        session
    }

    /// Voluntary departure
    pub fn leave(&mut self, session: SessionId, actor: ActorId) -> AgoraResult<()> {
        self.remove_member(session, actor, LeaveReason::Left)
    }

    /// Forced removal. Role checks happen before this is called.
    pub fn kick(&mut self, session: SessionId, actor: ActorId) -> AgoraResult<()> {
        self.remove_member(session, actor, LeaveReason::Kicked)
    }

    fn remove_member(
        &mut self,
        session: SessionId,
        actor: ActorId,
        reason: LeaveReason,
    ) -> AgoraResult<()> {
        let room = self
            .rooms
            .get_mut(&session)
            .ok_or(AgoraError::SessionNotFound)?;
        let before = room.authority();
        room.remove(actor).ok_or(AgoraError::MemberNotFound(actor))?;
        let after = room.authority();
        let now_empty = room.is_empty();

        info!(session = %session, actor = %actor, ?reason, "member left");
        self.events.push(DirectoryEvent::MemberLeft {
            session,
            actor,
            reason,
        });
        self.note_authority(session, before, after);

        if now_empty {
            if let Some(room) = self.rooms.remove(&session) {
                self.by_name.remove(room.name());
            }
            debug!(session = %session, "room closed");
            self.events.push(DirectoryEvent::SessionClosed { session });
        }
        Ok(())
    }

    /// Connection dropped, identity kept for the grace window
    pub fn suspend(&mut self, session: SessionId, actor: ActorId, now: SessionTime) -> AgoraResult<()> {
        let room = self
            .rooms
            .get_mut(&session)
            .ok_or(AgoraError::SessionNotFound)?;
        let before = room.authority();
        room.suspend(actor, now)?;
        let after = room.authority();
        debug!(session = %session, actor = %actor, "member suspended");
        self.events
            .push(DirectoryEvent::MemberSuspended { session, actor });
        self.note_authority(session, before, after);
        Ok(())
    }

    /// Reconnect of a previously seen actor
    pub fn resume(&mut self, session: SessionId, actor: ActorId) -> AgoraResult<()> {
        let room = self
            .rooms
            .get_mut(&session)
            .ok_or(AgoraError::SessionNotFound)?;
        let before = room.authority();
        room.resume(actor)?;
        let after = room.authority();
        debug!(session = %session, actor = %actor, "member resumed");
        self.events.push(DirectoryEvent::MemberResumed { session, actor });
        self.note_authority(session, before, after);
        Ok(())
    }

    /// Time out members suspended longer than `grace`
    pub fn expire(&mut self, now: SessionTime, grace: Duration) -> Vec<(SessionId, ActorId)> {
        let expired: Vec<(SessionId, ActorId)> = self
            .rooms
            .values()
            .flat_map(|room| {
                room.expired(now, grace)
                    .into_iter()
                    .map(move |actor| (room.id(), actor))
            })
            .collect();
        for &(session, actor) in &expired {
            if let Err(e) = self.remove_member(session, actor, LeaveReason::TimedOut) {
                debug!(session = %session, actor = %actor, error = %e, "expired member not removed");
            }
        }
        expired
    }

    /// Current authority holder of a session
    pub fn current_authority(&self, session: SessionId) -> AgoraResult<ActorId> {
        self.rooms
            .get(&session)
            .and_then(Room::authority)
            .ok_or(AgoraError::SessionNotFound)
    }

    /// Map a target to the receiving actors. The sender is only included
    /// when the target includes it.
    pub fn resolve(
        &self,
        session: SessionId,
        sender: ActorId,
        target: Target,
    ) -> AgoraResult<Vec<ActorId>> {
        let room = self.rooms.get(&session).ok_or(AgoraError::SessionNotFound)?;
        let recipients = match target {
            Target::All | Target::Buffered => room.actors().collect(),
            Target::Others => room.actors().filter(|&a| a != sender).collect(),
            Target::Single(actor) => {
                if !room.contains(actor) {
                    return Err(AgoraError::MemberNotFound(actor));
                }
                vec![actor]
            }
            Target::Authority => room.authority().into_iter().collect(),
        };
        Ok(recipients)
    }

    pub fn set_open(&mut self, session: SessionId, open: bool) -> AgoraResult<()> {
        self.rooms
            .get_mut(&session)
            .ok_or(AgoraError::SessionNotFound)?
            .set_open(open);
        Ok(())
    }

    pub fn room(&self, session: SessionId) -> Option<&Room> {
        self.rooms.get(&session)
    }

    pub fn room_by_name(&self, name: &str) -> Option<&Room> {
        self.by_name.get(name).and_then(|id| self.rooms.get(id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Take all pending events
    pub fn drain_events(&mut self) -> Vec<DirectoryEvent> {
        std::mem::take(&mut self.events)
    }

    fn note_authority(&mut self, session: SessionId, before: Option<ActorId>, after: Option<ActorId>) {
        if before != after {
            info!(session = %session, ?before, ?after, "authority changed");
            self.events.push(DirectoryEvent::AuthorityChanged {
                session,
                previous: before,
                current: after,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn join(dir: &mut SessionDirectory, name: &str, role: Role) -> JoinOutcome {
        dir.create_or_join(JoinRequest::named("Classroom_1234", name, role))
            .unwrap()
    }

    #[test]
    fn test_first_join_creates_room() {
        let mut dir = SessionDirectory::new();
        let outcome = join(&mut dir, "teacher", Role::Instructor);
        assert!(outcome.created);
        assert_eq!(outcome.member.actor, ActorId(1));
        assert_eq!(dir.current_authority(outcome.session).unwrap(), ActorId(1));

        let second = join(&mut dir, "ana", Role::Student);
        assert!(!second.created);
        assert_eq!(second.session, outcome.session);
        assert_eq!(second.roster.len(), 2);
    }

    #[test]
    fn test_room_not_found() {
        let mut dir = SessionDirectory::new();
        let result =
            dir.create_or_join(JoinRequest::named("Nowhere", "ana", Role::Student).join_only());
        assert_eq!(result.unwrap_err(), AgoraError::RoomNotFound("Nowhere".into()));
    }

    #[test]
    fn test_named_room_full() {
        let mut dir = SessionDirectory::new();
        let request = JoinRequest::named("Small", "a", Role::Student).with_capacity(1);
        dir.create_or_join(request.clone()).unwrap();
        assert!(matches!(
            dir.create_or_join(request),
            Err(AgoraError::RoomFull { .. })
        ));
    }

    #[test]
    fn test_quick_join_skips_full_rooms() {
        let mut dir = SessionDirectory::new();
        let first = dir
            .create_or_join(JoinRequest::quick("a", Role::Student).with_capacity(1))
            .unwrap();
        let second = dir
            .create_or_join(JoinRequest::quick("b", Role::Student).with_capacity(1))
            .unwrap();
        assert_ne!(first.session, second.session);
        assert!(second.created);
        assert_eq!(second.room, format!("Room_{}", second.session.0));
    }

    #[test]
    fn test_leave_promotes_next_lowest() {
        let mut dir = SessionDirectory::new();
        let session = join(&mut dir, "teacher", Role::Instructor).session;
        join(&mut dir, "ana", Role::Student);
        join(&mut dir, "ben", Role::Student);
        dir.drain_events();

        dir.kick(session, ActorId(1)).unwrap();
        assert_eq!(dir.current_authority(session).unwrap(), ActorId(2));
        let events = dir.drain_events();
        assert_eq!(
            events,
            vec![
                DirectoryEvent::MemberLeft {
                    session,
                    actor: ActorId(1),
                    reason: LeaveReason::Kicked
                },
                DirectoryEvent::AuthorityChanged {
                    session,
                    previous: Some(ActorId(1)),
                    current: Some(ActorId(2))
                },
            ]
        );
    }

    #[test]
    fn test_last_leave_closes_room() {
        let mut dir = SessionDirectory::new();
        let session = join(&mut dir, "teacher", Role::Instructor).session;
        dir.leave(session, ActorId(1)).unwrap();
        assert_eq!(dir.room_count(), 0);
        assert!(dir.room_by_name("Classroom_1234").is_none());
        assert!(dir
            .drain_events()
            .contains(&DirectoryEvent::SessionClosed { session }));
        assert_eq!(
            dir.current_authority(session),
            Err(AgoraError::SessionNotFound)
        );
    }

    #[test]
    fn test_suspend_resume_and_expire() {
        let mut dir = SessionDirectory::new();
        let session = join(&mut dir, "teacher", Role::Instructor).session;
        join(&mut dir, "ana", Role::Student);

        dir.suspend(session, ActorId(1), SessionTime::from_secs(1)).unwrap();
        assert_eq!(dir.current_authority(session).unwrap(), ActorId(2));
        dir.resume(session, ActorId(1)).unwrap();
        assert_eq!(dir.current_authority(session).unwrap(), ActorId(1));

        dir.suspend(session, ActorId(1), SessionTime::from_secs(2)).unwrap();
        let grace = Duration::from_secs(10);
        assert!(dir.expire(SessionTime::from_secs(5), grace).is_empty());
        assert_eq!(
            dir.expire(SessionTime::from_secs(20), grace),
            vec![(session, ActorId(1))]
        );
        assert!(!dir.room(session).unwrap().contains(ActorId(1)));
    }

    #[test]
    fn test_expire_every_member_closes_room() {
        let mut dir = SessionDirectory::new();
        let session = join(&mut dir, "teacher", Role::Instructor).session;
        join(&mut dir, "ana", Role::Student);
        dir.suspend(session, ActorId(1), SessionTime::from_secs(1)).unwrap();
        dir.suspend(session, ActorId(2), SessionTime::from_secs(1)).unwrap();

        let expired = dir.expire(SessionTime::from_secs(30), Duration::from_secs(10));
        assert_eq!(expired, vec![(session, ActorId(1)), (session, ActorId(2))]);
        assert!(dir.room(session).is_none());
        assert!(dir
            .drain_events()
            .contains(&DirectoryEvent::SessionClosed { session }));
    }

    #[test]
    fn test_resolve_targets() {
        let mut dir = SessionDirectory::new();
        let session = join(&mut dir, "teacher", Role::Instructor).session;
        join(&mut dir, "ana", Role::Student);
        join(&mut dir, "ben", Role::Student);

        let sender = ActorId(2);
        assert_eq!(dir.resolve(session, sender, Target::All).unwrap().len(), 3);
        assert_eq!(
            dir.resolve(session, sender, Target::Others).unwrap(),
            vec![ActorId(1), ActorId(3)]
        );
        assert_eq!(
            dir.resolve(session, sender, Target::Authority).unwrap(),
            vec![ActorId(1)]
        );
        assert!(dir
            .resolve(session, sender, Target::Single(ActorId(9)))
            .is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join,
        Leave(usize),
        Kick(usize),
        Suspend(usize),
        Resume(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Join),
            1 => (0usize..8).prop_map(Op::Leave),
            1 => (0usize..8).prop_map(Op::Kick),
            1 => (0usize..8).prop_map(Op::Suspend),
            1 => (0usize..8).prop_map(Op::Resume),
        ]
    }

    proptest! {
        #[test]
        fn prop_authority_is_unique_and_lowest(ops in proptest::collection::vec(op(), 1..60)) {
            let mut dir = SessionDirectory::new();
            let mut session = None;
            for op in ops {
                let members: Vec<ActorId> = session
                    .and_then(|s| dir.room(s))
                    .map(|r| r.actors().collect())
                    .unwrap_or_default();
                let pick = |i: usize| members.get(i % members.len().max(1)).copied();
                match op {
                    Op::Join => {
                        let outcome = dir
                            .create_or_join(JoinRequest::named("P", "m", Role::Student).with_capacity(16));
                        if let Ok(outcome) = outcome {
                            session = Some(outcome.session);
                        }
                    }
                    Op::Leave(i) => if let (Some(s), Some(a)) = (session, pick(i)) { let _ = dir.leave(s, a); },
                    Op::Kick(i) => if let (Some(s), Some(a)) = (session, pick(i)) { let _ = dir.kick(s, a); },
                    Op::Suspend(i) => if let (Some(s), Some(a)) = (session, pick(i)) { let _ = dir.suspend(s, a, SessionTime::ZERO); },
                    Op::Resume(i) => if let (Some(s), Some(a)) = (session, pick(i)) { let _ = dir.resume(s, a); },
                }

                if let Some(room) = session.and_then(|s| dir.room(s)) {
                    prop_assert!(!room.is_empty());
                    let holder = room.authority();
                    prop_assert!(holder.is_some());
                    let connected: Vec<ActorId> = room
                        .members()
                        .filter(|m| m.is_connected())
                        .map(|m| m.actor())
                        .collect();
                    let expected = connected
                        .first()
                        .copied()
                        .or_else(|| room.actors().next());
                    prop_assert_eq!(holder, expected);
                }
            }
        }
    }
}
