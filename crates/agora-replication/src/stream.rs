//! Reliable-ordered streams
//!
//! An origin owns one broadcast stream per lane and one direct stream per
//! (lane, receiver). Sequence numbers start at 1; the receiver's delivered
//! watermark starts at 0.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use agora_core::{ActorId, Lane, SessionTime};
use agora_wire::Envelope;

/// Identity of one reliable stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    pub origin: ActorId,
    pub lane: Lane,
    /// Receiver of a direct stream, `None` for broadcast
    pub receiver: Option<ActorId>,
}

impl StreamKey {
    #[inline]
    pub fn broadcast(origin: ActorId, lane: Lane) -> Self {
        StreamKey {
            origin,
            lane,
            receiver: None,
        }
    }

    #[inline]
    pub fn direct(origin: ActorId, lane: Lane, receiver: ActorId) -> Self {
        StreamKey {
            origin,
            lane,
            receiver: Some(receiver),
        }
    }

    #[inline]
    pub fn is_direct(&self) -> bool {
        self.receiver.is_some()
    }
}

/// Sending half: sequence assignment and retransmit history
#[derive(Debug, Clone)]
pub struct OutboundStream {
    next_seq: u64,
    history: VecDeque<(u64, Vec<u8>)>,
    capacity: usize,
}

impl OutboundStream {
    pub fn new(capacity: usize) -> Self {
        OutboundStream {
            next_seq: 1,
            history: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Sequence the next message will carry
    #[inline]
    pub fn peek_next(&self) -> u64 {
        self.next_seq
    }

    /// Record an encoded envelope carrying `peek_next()`
    pub fn commit(&mut self, bytes: Vec<u8>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back((seq, bytes));
        seq
    }

    /// Highest sequence sent so far, 0 before the first send
    #[inline]
    pub fn last_sent(&self) -> u64 {
        self.next_seq - 1
    }

    /// Encoded envelope for a retransmission, if still in history
    pub fn get(&self, seq: u64) -> Option<&[u8]> {
        let oldest = self.history.front()?.0;
        if seq < oldest {
            return None;
        }
        self.history
            .get((seq - oldest) as usize)
            .filter(|(s, _)| *s == seq)
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn oldest_retained(&self) -> Option<u64> {
        self.history.front().map(|(seq, _)| *seq)
    }
}

/// Outcome of offering an envelope to an inbound stream
#[derive(Debug)]
pub enum Accept {
    /// Already delivered or already held
    Duplicate,
    /// In order: the envelope plus any held successors, in order
    Deliver(Vec<Envelope>),
    /// Ahead of a gap; held until the gap fills
    Held,
    /// Ahead of a gap and the hold buffer is full
    Overflow,
}

/// Receiving half: delivered watermark, held envelopes, NACK pacing
#[derive(Debug, Clone)]
pub struct InboundStream {
    delivered: u64,
    pending: BTreeMap<u64, Envelope>,
    last_nack: Option<SessionTime>,
    max_pending: usize,
}

impl InboundStream {
    pub fn new(max_pending: usize) -> Self {
        InboundStream {
            delivered: 0,
            pending: BTreeMap::new(),
            last_nack: None,
            max_pending,
        }
    }

    /// Highest sequence delivered in order
    #[inline]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn accept(&mut self, envelope: Envelope) -> Accept {
        let seq = envelope.seq;
        if seq <= self.delivered || self.pending.contains_key(&seq) {
            return Accept::Duplicate;
        }
        if seq == self.delivered + 1 {
            self.delivered = seq;
            let mut out = vec![envelope];
            out.extend(self.release_contiguous());
            return Accept::Deliver(out);
        }
        if self.pending.len() >= self.max_pending {
            return Accept::Overflow;
        }
        self.pending.insert(seq, envelope);
        Accept::Held
    }

    /// Raise the watermark to `seq` (late-joiner cursor). Held envelopes at
    /// or below it are discarded; contiguous successors are released.
    pub fn advance_to(&mut self, seq: u64) -> Vec<Envelope> {
        if seq <= self.delivered {
            return Vec::new();
        }
        self.delivered = seq;
        self.pending = self.pending.split_off(&(seq + 1));
        self.release_contiguous()
    }

    fn release_contiguous(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(next) = self.pending.remove(&(self.delivered + 1)) {
            self.delivered += 1;
            out.push(next);
        }
        out
    }

    /// Sequences missing below `upto` (inclusive), at most `limit`
    pub fn missing(&self, upto: u64, limit: usize) -> Vec<u64> {
        ((self.delivered + 1)..=upto)
            .filter(|seq| !self.pending.contains_key(seq))
            .take(limit)
            .collect()
    }

    /// Highest sequence held ahead of a gap
    pub fn highest_pending(&self) -> Option<u64> {
        self.pending.keys().next_back().copied()
    }

    /// Is a NACK allowed now?
    pub fn nack_due(&self, now: SessionTime, interval: Duration) -> bool {
        self.last_nack
            .map_or(true, |last| now.since(last) >= interval)
    }

    pub fn mark_nacked(&mut self, now: SessionTime) {
        self.last_nack = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{SessionId, StrokeId, Target};
    use agora_wire::Message;
    use proptest::prelude::*;

    fn envelope(seq: u64) -> Envelope {
        Envelope::new(
            SessionId(1),
            ActorId(2),
            Target::Buffered,
            Message::StrokeEnd {
                stroke: StrokeId(seq),
            },
        )
        .with_seq(seq)
    }

    fn delivered_seqs(accept: Accept) -> Vec<u64> {
        match accept {
            Accept::Deliver(envs) => envs.iter().map(|e| e.seq).collect(),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn test_outbound_history_is_bounded() {
        let mut stream = OutboundStream::new(2);
        assert_eq!(stream.last_sent(), 0);
        for i in 0..3u8 {
            stream.commit(vec![i]);
        }
        assert_eq!(stream.last_sent(), 3);
        assert_eq!(stream.get(1), None);
        assert_eq!(stream.get(2), Some(&[1u8][..]));
        assert_eq!(stream.get(3), Some(&[2u8][..]));
        assert_eq!(stream.get(4), None);
        assert_eq!(stream.oldest_retained(), Some(2));
    }

    #[test]
    fn test_in_order_delivery() {
        let mut stream = InboundStream::new(16);
        assert_eq!(delivered_seqs(stream.accept(envelope(1))), vec![1]);
        assert_eq!(delivered_seqs(stream.accept(envelope(2))), vec![2]);
        assert!(matches!(stream.accept(envelope(2)), Accept::Duplicate));
    }

    #[test]
    fn test_gap_is_held_then_released() {
        let mut stream = InboundStream::new(16);
        stream.accept(envelope(1));
        assert!(matches!(stream.accept(envelope(4)), Accept::Held));
        assert!(matches!(stream.accept(envelope(3)), Accept::Held));
        assert!(matches!(stream.accept(envelope(3)), Accept::Duplicate));
        assert_eq!(stream.missing(4, 10), vec![2]);
        assert_eq!(delivered_seqs(stream.accept(envelope(2))), vec![2, 3, 4]);
        assert_eq!(stream.delivered(), 4);
        assert_eq!(stream.pending_len(), 0);
    }

    #[test]
    fn test_overflow_when_hold_buffer_full() {
        let mut stream = InboundStream::new(1);
        assert!(matches!(stream.accept(envelope(3)), Accept::Held));
        assert!(matches!(stream.accept(envelope(4)), Accept::Overflow));
    }

    #[test]
    fn test_advance_to_cursor() {
        let mut stream = InboundStream::new(16);
        stream.accept(envelope(3));
        stream.accept(envelope(6));
        let released: Vec<u64> = stream.advance_to(5).iter().map(|e| e.seq).collect();
        assert_eq!(released, vec![6]);
        assert_eq!(stream.delivered(), 6);
        assert!(stream.advance_to(2).is_empty());
    }

    #[test]
    fn test_nack_pacing() {
        let mut stream = InboundStream::new(16);
        let interval = Duration::from_millis(100);
        assert!(stream.nack_due(SessionTime::ZERO, interval));
        stream.mark_nacked(SessionTime::from_millis(10));
        assert!(!stream.nack_due(SessionTime::from_millis(50), interval));
        assert!(stream.nack_due(SessionTime::from_millis(110), interval));
    }

    proptest! {
        #[test]
        fn prop_any_arrival_order_delivers_in_order(
            order in Just((1u64..=40).collect::<Vec<_>>()).prop_shuffle(),
            dupes in proptest::collection::vec(1u64..=40, 0..20),
        ) {
            let mut stream = InboundStream::new(64);
            let mut out = Vec::new();
            for seq in order.iter().chain(dupes.iter()) {
                if let Accept::Deliver(envs) = stream.accept(envelope(*seq)) {
                    out.extend(envs.into_iter().map(|e| e.seq));
                }
            }
            prop_assert_eq!(out, (1u64..=40).collect::<Vec<_>>());
        }
    }
}
