//! The send buffer and retransmission queue.
//!
//! Application bytes are queued here until they are segmentized against the
//! peer's advertised window and the current congestion window. Once a
//! segment is sent it moves to the retransmission queue, where it stays
//! until the peer's cumulative ACK passes its end, or it is resent on an
//! RTO or fast-retransmit signal.

use std::collections::VecDeque;

use crate::seq::mod_le;

/// One segment's worth of bytes sitting on the retransmission queue.
#[derive(Debug, Clone)]
pub struct InFlightSegment {
    pub seq: u32,
    pub data: Vec<u8>,
    /// Set when an RTO or fast retransmit has flagged this segment to be
    /// resent on the next call to [`SendBuffer::take_retransmits`].
    pub needs_retransmit: bool,
}

impl InFlightSegment {
    pub fn end(&self) -> u32 {
        self.seq.wrapping_add(self.data.len() as u32)
    }
}

/// Application bytes awaiting segmentation, plus everything already sent
/// and awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct SendBuffer {
    /// `SND.UNA`: the oldest unacknowledged sequence number.
    una: u32,
    /// `SND.NXT`: the next sequence number to assign to a new segment.
    nxt: u32,
    pending: VecDeque<u8>,
    in_flight: VecDeque<InFlightSegment>,
}

impl SendBuffer {
    pub fn new(iss: u32) -> Self {
        Self {
            una: iss,
            nxt: iss,
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
        }
    }

    pub fn una(&self) -> u32 {
        self.una
    }

    pub fn nxt(&self) -> u32 {
        self.nxt
    }

    /// Queues application bytes for later segmentation.
    pub fn enqueue(&mut self, data: &[u8]) {
        self.pending.extend(data.iter().copied());
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_bytes(&self) -> usize {
        self.in_flight.iter().map(|s| s.data.len()).sum()
    }

    /// Carves the next segment out of `pending`, bounded by `mss` and by
    /// how much room is left under `send_window` (the peer's advertised
    /// window minus bytes already in flight, clamped by the congestion
    /// window). Returns `None` when there is nothing sendable.
    pub fn segmentize(&mut self, mss: usize, send_window: usize) -> Option<InFlightSegment> {
        if self.pending.is_empty() || send_window == 0 {
            return None;
        }
        let len = self.pending.len().min(mss).min(send_window);
        if len == 0 {
            return None;
        }
        let data: Vec<u8> = self.pending.drain(..len).collect();
        let seq = self.nxt;
        self.nxt = self.nxt.wrapping_add(len as u32);
        let segment = InFlightSegment {
            seq,
            data,
            needs_retransmit: false,
        };
        self.in_flight.push_back(segment.clone());
        Some(segment)
    }

    /// Advances `SND.UNA` to `ack`, dropping fully-acknowledged segments and
    /// trimming a partially-acknowledged one. Returns the number of newly
    /// acknowledged bytes, or `None` if `ack` does not advance `SND.UNA`
    /// (an old or duplicate ACK).
    pub fn on_ack(&mut self, ack: u32) -> Option<usize> {
        if !mod_le(self.una, ack) || ack == self.una {
            return None;
        }
        let newly_acked = ack.wrapping_sub(self.una) as usize;
        self.una = ack;

        while let Some(front) = self.in_flight.front_mut() {
            if mod_le(front.end(), ack) {
                self.in_flight.pop_front();
            } else if mod_le(front.seq, ack) {
                let keep_from = ack.wrapping_sub(front.seq) as usize;
                front.data.drain(..keep_from);
                front.seq = ack;
                break;
            } else {
                break;
            }
        }
        Some(newly_acked)
    }

    /// Flags every currently in-flight segment for retransmission, as an
    /// RTO expiry does.
    pub fn mark_all_for_retransmit(&mut self) {
        for segment in self.in_flight.iter_mut() {
            segment.needs_retransmit = true;
        }
    }

    /// Flags only the oldest in-flight segment, as triple-duplicate-ACK
    /// fast retransmit does.
    pub fn mark_oldest_for_retransmit(&mut self) {
        if let Some(front) = self.in_flight.front_mut() {
            front.needs_retransmit = true;
        }
    }

    /// Drains and returns every segment flagged for retransmission.
    pub fn take_retransmits(&mut self) -> Vec<InFlightSegment> {
        let mut out = Vec::new();
        for segment in self.in_flight.iter_mut() {
            if segment.needs_retransmit {
                segment.needs_retransmit = false;
                out.push(segment.clone());
            }
        }
        out
    }

    pub fn has_unacked_data(&self) -> bool {
        !self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentizes_respecting_mss_and_window() {
        let mut buf = SendBuffer::new(1000);
        buf.enqueue(b"0123456789");
        let seg = buf.segmentize(4, 100).unwrap();
        assert_eq!(seg.seq, 1000);
        assert_eq!(seg.data, b"0123");
        assert_eq!(buf.nxt(), 1004);
        assert_eq!(buf.pending_len(), 6);
    }

    #[test]
    fn ack_drops_fully_acked_segments_and_trims_partial() {
        let mut buf = SendBuffer::new(0);
        buf.enqueue(b"abcdefgh");
        buf.segmentize(4, 100); // seq 0..4
        buf.segmentize(4, 100); // seq 4..8
        assert_eq!(buf.on_ack(4), Some(4));
        assert_eq!(buf.in_flight_bytes(), 4);
        assert_eq!(buf.on_ack(6), Some(2));
        assert_eq!(buf.in_flight_bytes(), 2);
    }

    #[test]
    fn duplicate_ack_makes_no_progress() {
        let mut buf = SendBuffer::new(0);
        buf.enqueue(b"ab");
        buf.segmentize(4, 100);
        buf.on_ack(2);
        assert_eq!(buf.on_ack(2), None);
    }

    #[test]
    fn retransmit_flags_drain_once() {
        let mut buf = SendBuffer::new(0);
        buf.enqueue(b"ab");
        buf.segmentize(4, 100);
        buf.mark_all_for_retransmit();
        let resent = buf.take_retransmits();
        assert_eq!(resent.len(), 1);
        assert!(buf.take_retransmits().is_empty());
    }
}
