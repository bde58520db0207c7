//! Timers against the session clock
//!
//! Replaces coroutine-style delays: every timer has its own id and can be
//! cancelled on its own, or together with every other timer owned by the
//! same member when that member leaves.

use std::collections::BTreeMap;
use std::time::Duration;

use agora_core::{ActorId, SessionTime};

/// Timer identifier, never reused by one scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone)]
struct Timer<T> {
    deadline: SessionTime,
    period: Option<Duration>,
    owner: Option<ActorId>,
    task: T,
}

/// One-shot and periodic timers carrying a task value
#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    next_id: u64,
    timers: BTreeMap<TimerId, Timer<T>>,
}

impl<T: Clone> Scheduler<T> {
    pub fn new() -> Self {
        Scheduler {
            next_id: 1,
            timers: BTreeMap::new(),
        }
    }

    /// Fire once at `at`
    pub fn once(&mut self, at: SessionTime, owner: Option<ActorId>, task: T) -> TimerId {
        self.insert(at, None, owner, task)
    }

    /// Fire at `first` and every `period` after that
    pub fn every(
        &mut self,
        first: SessionTime,
        period: Duration,
        owner: Option<ActorId>,
        task: T,
    ) -> TimerId {
        self.insert(first, Some(period), owner, task)
    }

    fn insert(
        &mut self,
        deadline: SessionTime,
        period: Option<Duration>,
        owner: Option<ActorId>,
        task: T,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.timers.insert(
            id,
            Timer {
                deadline,
                period,
                owner,
                task,
            },
        );
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Cancel every timer owned by `actor`
    pub fn cancel_owner(&mut self, actor: ActorId) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, timer| timer.owner != Some(actor));
        before - self.timers.len()
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Take the timers due at `now`, ordered by deadline then id. A periodic
    /// timer that fell several periods behind fires once and is rescheduled
    /// after `now`.
    pub fn due(&mut self, now: SessionTime) -> Vec<(TimerId, T)> {
        let mut fired: Vec<(SessionTime, TimerId, T)> = Vec::new();
        let mut finished = Vec::new();
        for (id, timer) in self.timers.iter_mut() {
            if timer.deadline > now {
                continue;
            }
            fired.push((timer.deadline, *id, timer.task.clone()));
            match timer.period {
                Some(period) if period.as_micros() > 0 => {
                    let step = period.as_micros() as u64;
                    let behind = now.since(timer.deadline).as_micros() as u64;
                    let steps = behind / step + 1;
                    timer.deadline = SessionTime(timer.deadline.0.saturating_add(step.saturating_mul(steps)));
                }
                _ => finished.push(*id),
            }
        }
        for id in finished {
            self.timers.remove(&id);
        }
        fired.sort_by_key(|(deadline, id, _)| (*deadline, *id));
        fired.into_iter().map(|(_, id, task)| (id, task)).collect()
    }
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
