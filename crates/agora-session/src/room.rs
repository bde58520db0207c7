//! Room roster and authority election

use std::collections::BTreeMap;
use std::time::Duration;

use agora_core::{
    ActorId, AgoraError, AgoraResult, ConnectionState, MemberInfo, Role, SessionId, SessionTime,
};

/// Default room capacity when the caller does not pick one
pub const DEFAULT_CAPACITY: usize = 20;

/// A roster entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub info: MemberInfo,
    pub state: ConnectionState,
}

impl Member {
    pub fn new(info: MemberInfo) -> Self {
        Member {
            info,
            state: ConnectionState::Connected,
        }
    }

    #[inline]
    pub fn actor(&self) -> ActorId {
        self.info.actor
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

/// Authority holder moved from `previous` to `current`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityChange {
    pub previous: Option<ActorId>,
    pub current: Option<ActorId>,
}

/// Elect the authority holder from a roster.
///
/// Lowest connected actor; when every member is suspended, the lowest actor
/// overall, so a non-empty roster always has exactly one holder.
pub fn elect_authority<'a>(members: impl IntoIterator<Item = &'a Member>) -> Option<ActorId> {
    let mut lowest_any: Option<ActorId> = None;
    let mut lowest_connected: Option<ActorId> = None;
    for member in members {
        let actor = member.actor();
        if lowest_any.map_or(true, |current| actor < current) {
            lowest_any = Some(actor);
        }
        if member.is_connected() && lowest_connected.map_or(true, |current| actor < current) {
            lowest_connected = Some(actor);
        }
    }
    lowest_connected.or(lowest_any)
}

/// One classroom instance and its membership
#[derive(Debug, Clone)]
pub struct Room {
    id: SessionId,
    name: String,
    capacity: usize,
    is_open: bool,
    members: BTreeMap<ActorId, Member>,
    authority: Option<ActorId>,
    /// Next actor identity to hand out; identities are never reused
    next_actor: u32,
}

impl Room {
    pub fn new(id: SessionId, name: impl Into<String>, capacity: usize) -> Self {
        Room {
            id,
            name: name.into(),
            capacity: capacity.max(1),
            is_open: true,
            members: BTreeMap::new(),
            authority: None,
            next_actor: 1,
        }
    }

    /// Mirror of a roster announced by the room provider
    pub fn mirror(
        id: SessionId,
        name: impl Into<String>,
        capacity: usize,
        members: impl IntoIterator<Item = Member>,
    ) -> Self {
        let mut room = Room::new(id, name, capacity);
        for member in members {
            room.next_actor = room.next_actor.max(member.actor().0.saturating_add(1));
            room.members.insert(member.actor(), member);
        }
        room.refresh_authority();
        room
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn set_open(&mut self, open: bool) {
        self.is_open = open;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Suspended members keep their seat
    #[inline]
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    /// Can a new member join?
    pub fn accepts_joins(&self) -> bool {
        self.is_open && !self.is_full()
    }

    /// Current authority holder, `None` only when the room is empty
    #[inline]
    pub fn authority(&self) -> Option<ActorId> {
        self.authority
    }

    pub fn is_authority(&self, actor: ActorId) -> bool {
        self.authority == Some(actor)
    }

    pub fn member(&self, actor: ActorId) -> Option<&Member> {
        self.members.get(&actor)
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.members.contains_key(&actor)
    }

    pub fn role_of(&self, actor: ActorId) -> Option<Role> {
        self.members.get(&actor).map(|m| m.info.role)
    }

    /// Members in actor order
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.members.keys().copied()
    }

    pub fn connected_count(&self) -> usize {
        self.members.values().filter(|m| m.is_connected()).count()
    }

    /// Admit a new member under a freshly assigned actor identity
    pub fn admit(&mut self, display_name: impl Into<String>, role: Role) -> AgoraResult<MemberInfo> {
        if !self.accepts_joins() {
            return Err(AgoraError::RoomFull {
                room: self.name.clone(),
                capacity: self.capacity,
            });
        }
        let actor = ActorId(self.next_actor);
        self.next_actor = self.next_actor.saturating_add(1);
        let info = MemberInfo::new(actor, display_name, role);
        self.members.insert(actor, Member::new(info.clone()));
        self.refresh_authority();
        Ok(info)
    }

    /// Insert a member announced by the room provider. Returns false when
    /// the actor was already present, in which case it is marked connected.
    pub fn insert(&mut self, info: MemberInfo) -> bool {
        self.next_actor = self.next_actor.max(info.actor.0.saturating_add(1));
        let fresh = match self.members.get_mut(&info.actor) {
            Some(existing) => {
                existing.state = ConnectionState::Connected;
                false
            }
            None => {
                self.members.insert(info.actor, Member::new(info));
                true
            }
        };
        self.refresh_authority();
        fresh
    }

    /// Remove a member from the roster
    pub fn remove(&mut self, actor: ActorId) -> Option<Member> {
        let removed = self.members.remove(&actor);
        if removed.is_some() {
            self.refresh_authority();
        }
        removed
    }

    /// Connection dropped; the member keeps its identity and seat
    pub fn suspend(&mut self, actor: ActorId, now: SessionTime) -> AgoraResult<()> {
        let member = self
            .members
            .get_mut(&actor)
            .ok_or(AgoraError::MemberNotFound(actor))?;
        if member.is_connected() {
            member.state = ConnectionState::Suspended { since: now };
            self.refresh_authority();
        }
        Ok(())
    }

    /// A previously seen actor reconnected: same member, not a new one
    pub fn resume(&mut self, actor: ActorId) -> AgoraResult<()> {
        let member = self
            .members
            .get_mut(&actor)
            .ok_or(AgoraError::MemberNotFound(actor))?;
        member.state = ConnectionState::Connected;
        self.refresh_authority();
        Ok(())
    }

    /// Members suspended for longer than `grace`
    pub fn expired(&self, now: SessionTime, grace: Duration) -> Vec<ActorId> {
        self.members
            .values()
            .filter_map(|m| match m.state {
                ConnectionState::Suspended { since } if now.since(since) > grace => {
                    Some(m.actor())
                }
                _ => None,
            })
            .collect()
    }

    fn refresh_authority(&mut self) {
        self.authority = elect_authority(self.members.values());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classroom() -> Room {
        let mut room = Room::new(SessionId(1), "Classroom_1234", 4);
        room.admit("teacher", Role::Instructor).unwrap();
        room.admit("ana", Role::Student).unwrap();
        room.admit("ben", Role::Student).unwrap();
        room
    }

    #[test]
    fn test_actor_ids_count_from_one() {
        let room = classroom();
        let actors: Vec<_> = room.actors().collect();
        assert_eq!(actors, vec![ActorId(1), ActorId(2), ActorId(3)]);
        assert_eq!(room.authority(), Some(ActorId(1)));
    }

    #[test]
    fn test_actor_ids_never_reused() {
        let mut room = classroom();
        room.remove(ActorId(3));
        let info = room.admit("cara", Role::Student).unwrap();
        assert_eq!(info.actor, ActorId(4));
    }

    #[test]
    fn test_room_full() {
        let mut room = classroom();
        room.admit("dan", Role::Student).unwrap();
        assert!(matches!(
            room.admit("eve", Role::Student),
            Err(AgoraError::RoomFull { capacity: 4, .. })
        ));
    }

    #[test]
    fn test_closed_room_rejects_joins() {
        let mut room = classroom();
        room.set_open(false);
        assert!(room.admit("dan", Role::Student).is_err());
    }

    #[test]
    fn test_authority_failover_on_remove() {
        let mut room = classroom();
        room.remove(ActorId(1));
        assert_eq!(room.authority(), Some(ActorId(2)));
        room.remove(ActorId(2));
        room.remove(ActorId(3));
        assert_eq!(room.authority(), None);
    }

    #[test]
    fn test_suspended_member_loses_authority() {
        let mut room = classroom();
        room.suspend(ActorId(1), SessionTime::from_secs(5)).unwrap();
        assert_eq!(room.authority(), Some(ActorId(2)));

        room.resume(ActorId(1)).unwrap();
        assert_eq!(room.authority(), Some(ActorId(1)));
    }

    #[test]
    fn test_all_suspended_keeps_a_holder() {
        let mut room = classroom();
        for actor in [1, 2, 3] {
            room.suspend(ActorId(actor), SessionTime::ZERO).unwrap();
        }
        assert_eq!(room.authority(), Some(ActorId(1)));
    }

    #[test]
    fn test_expired_members() {
        let mut room = classroom();
        room.suspend(ActorId(2), SessionTime::from_secs(1)).unwrap();
        let grace = Duration::from_secs(10);
        assert!(room.expired(SessionTime::from_secs(5), grace).is_empty());
        assert_eq!(
            room.expired(SessionTime::from_secs(12), grace),
            vec![ActorId(2)]
        );
    }

    #[test]
    fn test_mirror_and_insert() {
        let members = vec![
            Member::new(MemberInfo::new(ActorId(2), "ana", Role::Student)),
            Member::new(MemberInfo::new(ActorId(5), "teacher", Role::Instructor)),
        ];
        let mut room = Room::mirror(SessionId(7), "Classroom_7", 8, members);
        assert_eq!(room.authority(), Some(ActorId(2)));
        assert!(room.insert(MemberInfo::new(ActorId(1), "late", Role::Observer)));
        assert_eq!(room.authority(), Some(ActorId(1)));
        assert!(!room.insert(MemberInfo::new(ActorId(1), "late", Role::Observer)));
        assert_eq!(room.role_of(ActorId(5)), Some(Role::Instructor));
    }
}
