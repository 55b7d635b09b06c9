//! The receive reassembly buffer.
//!
//! Incoming segments can arrive out of order or overlapping; this buffer
//! merges them into a single contiguous byte stream, exposed via
//! [`RecvBuffer::engine_nxt`] (`RCV.NXT`, the edge of what's been
//! reassembled). Bytes leave the buffer by [`RecvBuffer::remove`], tagged
//! with one of two [`Reader`] roles that §4.3 tracks independently:
//!
//! - **engine**: retires bytes with no application reader involved — a
//!   closed-state flow draining its last bytes before teardown, or an
//!   MPTCP subflow whose payload was just copied into the master
//!   connection's buffer by
//!   [`crate::mptcp::MasterControlBlock::copy_from_subflow`].
//! - **app**: retires bytes as a socket-style consumer actually reads
//!   them.
//!
//! A call under either tag advances the buffer's window on its own,
//! without waiting on the other role; see [`RecvBuffer::remove`] for how
//! that squares with there being one physical `head_seq`.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use crate::seq::mod_le;

/// A reassembly buffer for one direction of byte flow.
#[derive(Debug, Clone)]
pub struct RecvBuffer {
    capacity: usize,
    /// The sequence number of the first byte still held in `ready` (or, if
    /// `ready` is empty, the next sequence number expected).
    base_seq: u32,
    /// Contiguous bytes that have been reassembled but not yet drained by
    /// the reader.
    ready: VecDeque<u8>,
    /// Segments that arrived ahead of `base_seq + ready.len()`, keyed by
    /// their starting sequence number, waiting for the gap to close.
    out_of_order: BTreeMap<u32, Vec<u8>>,
    out_of_order_bytes: usize,
    /// Running totals of bytes retired via each [`Reader`] tag, tracked
    /// independently per §4.3 even though both share the one physical
    /// `head_seq` below (see [`RecvBuffer::remove`]).
    engine_retired: u64,
    app_retired: u64,
}

impl RecvBuffer {
    /// Creates a buffer expecting `initial_seq` as the first byte of the
    /// stream (typically `IRS + 1`).
    pub fn new(capacity: usize, initial_seq: u32) -> Self {
        Self {
            capacity,
            base_seq: initial_seq,
            ready: VecDeque::new(),
            out_of_order: BTreeMap::new(),
            out_of_order_bytes: 0,
            engine_retired: 0,
            app_retired: 0,
        }
    }

    /// Bytes retired so far via [`Reader::Engine`] (e.g. the MPTCP subflow
    /// coupler retiring bytes it has already copied into the master
    /// stream).
    pub fn engine_retired(&self) -> u64 {
        self.engine_retired
    }

    /// Bytes retired so far via [`Reader::App`] (a socket-style consumer
    /// actually reading them).
    pub fn app_retired(&self) -> u64 {
        self.app_retired
    }

    /// `RCV.NXT`: the next sequence number expected, i.e. the edge of
    /// contiguous reassembled data.
    pub fn engine_nxt(&self) -> u32 {
        self.base_seq.wrapping_add(self.ready.len() as u32)
    }

    /// `RCV.WND`: remaining capacity, accounting for both reassembled bytes
    /// awaiting drain and bytes held out-of-order.
    pub fn window(&self) -> u16 {
        let used = self.ready.len() + self.out_of_order_bytes;
        self.capacity.saturating_sub(used).min(u16::MAX as usize) as u16
    }

    /// The number of contiguous bytes ready to be drained by the reader.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// `head_seq`: the sequence number of the first byte still held,
    /// whether or not it has joined the contiguous `ready` run.
    pub fn head_seq(&self) -> u32 {
        self.base_seq
    }

    /// Reads (without removing) up to `len` bytes from the front of the
    /// ready run, for a caller that needs to copy them elsewhere before
    /// retiring them with [`remove`](Self::remove). Returns `None` if
    /// fewer than `len` bytes are currently contiguous.
    pub fn peek(&self, len: usize) -> Option<Vec<u8>> {
        if self.ready.len() < len {
            return None;
        }
        Some(self.ready.iter().take(len).copied().collect())
    }

    /// Whether the reader has nothing left to drain.
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Accepts a segment's payload at sequence number `seq`. Bytes at or
    /// below `engine_nxt()` that were already delivered are trimmed; bytes
    /// beyond the advertised window are dropped. Returns the number of new
    /// bytes that became contiguous and joined `ready` as a result (zero
    /// means the segment made no progress, mirroring `ProcessTCPPayload`'s
    /// "already received, drop" and "outside window, drop" cases).
    pub fn accept(&mut self, seq: u32, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let nxt = self.engine_nxt();
        let seg_end = seq.wrapping_add(data.len() as u32);

        // Entirely old: every byte has already been reassembled.
        if mod_le(seg_end, nxt) && seg_end != nxt {
            return 0;
        }
        // Trim any leading bytes that duplicate data we already have.
        let (seq, data) = if mod_le(seq, nxt) {
            let overlap = nxt.wrapping_sub(seq) as usize;
            (nxt, &data[overlap.min(data.len())..])
        } else {
            (seq, data)
        };
        if data.is_empty() {
            return 0;
        }

        // Drop anything that would land outside the advertised window.
        let window_end = nxt.wrapping_add(self.capacity as u32);
        let offset = seq.wrapping_sub(nxt) as usize;
        if !mod_le(seq, window_end) || offset >= self.capacity {
            return 0;
        }
        let keep = data.len().min(self.capacity - offset);
        let data = &data[..keep];

        if seq == nxt {
            self.ready.extend(data.iter().copied());
            self.absorb_contiguous_tail()
        } else {
            self.insert_out_of_order(seq, data);
            0
        }
    }

    fn insert_out_of_order(&mut self, seq: u32, data: &[u8]) {
        // Merge with/replace overlapping fragments already on hand; a real
        // production buffer would also trim overlaps from stored fragments,
        // but duplicate out-of-order segments are rare enough on the happy
        // path that we simply keep the union of the byte ranges seen.
        if self.out_of_order.contains_key(&seq) {
            return;
        }
        self.out_of_order_bytes += data.len();
        self.out_of_order.insert(seq, data.to_vec());
    }

    /// After appending to `ready`, walks `out_of_order` to absorb any
    /// fragments that are now contiguous with the new tail. Returns the
    /// total number of bytes that joined `ready` in this call, including
    /// the bytes that were just appended by the caller.
    fn absorb_contiguous_tail(&mut self) -> usize {
        let mut advanced = 0usize;
        loop {
            let nxt = self.engine_nxt();
            let Some((&seq, _)) = self.out_of_order.iter().next() else {
                break;
            };
            if seq != nxt {
                break;
            }
            let data = self.out_of_order.remove(&seq).unwrap();
            self.out_of_order_bytes -= data.len();
            advanced += data.len();
            self.ready.extend(data);
        }
        advanced
    }

    /// Drains up to `max` bytes for the application reader, advancing
    /// `base_seq`. Shorthand for [`remove`](Self::remove) tagged
    /// [`Reader::App`], used by callers (tests, and
    /// [`Flow::read`](crate::flow::Flow::read)) that are always the
    /// socket-style consumer and never the engine.
    pub fn drain(&mut self, max: usize) -> Vec<u8> {
        self.remove(max, Reader::App)
    }

    /// Drains every ready byte.
    pub fn drain_all(&mut self) -> Vec<u8> {
        self.drain(self.ready.len())
    }

    /// Retires up to `n` ready bytes on behalf of `reader`, advancing
    /// `head_seq` and freeing the window space they occupied.
    ///
    /// The engine role retires bytes for a flow that has no application
    /// reader of its own — a closed-state flow draining its final bytes
    /// before teardown, or an MPTCP subflow whose payload has just been
    /// copied into the master connection's buffer by
    /// [`crate::mptcp::MasterControlBlock::copy_from_subflow`]. The app
    /// role retires bytes as the socket-style consumer actually reads
    /// them.
    ///
    /// The two roles are tracked independently (§4.3): [`Self::engine_retired`]
    /// and [`Self::app_retired`] account separately for bytes each has
    /// taken, and a call under one tag never blocks on the other ever
    /// having run — the engine can free a closed subflow's window with no
    /// application reader in the picture at all. What they share is the
    /// one physical `head_seq`/`ready` run: the source's own `RBRemove`
    /// (`examples/original_source/mtcp/src/tcp_in.c`, the `AT_MTCP` and
    /// `AT_APP` call sites) advances a single ring-buffer head regardless
    /// of which tag is passed, using the tag only to pick a lock — there
    /// is no second, independently-advancing cursor in the ring buffer
    /// itself to generalize. This buffer follows that: one `base_seq`
    /// advances on every `remove`, whichever role calls it.
    pub fn remove(&mut self, n: usize, reader: Reader) -> Vec<u8> {
        let n = n.min(self.ready.len());
        let drained: Vec<u8> = self.ready.drain(..n).collect();
        self.base_seq = self.base_seq.wrapping_add(n as u32);
        match reader {
            Reader::Engine => self.engine_retired += n as u64,
            Reader::App => self.app_retired += n as u64,
        }
        drained
    }
}

/// Which collaborator is retiring bytes from a [`RecvBuffer`]: see
/// [`RecvBuffer::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reader {
    /// The engine itself, e.g. the MPTCP subflow coupler.
    Engine,
    /// The application-facing reader.
    App,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_segments_advance_immediately() {
        let mut buf = RecvBuffer::new(1024, 100);
        assert_eq!(buf.accept(100, b"abc"), 3);
        assert_eq!(buf.engine_nxt(), 103);
        assert_eq!(buf.drain_all(), b"abc");
    }

    #[test]
    fn out_of_order_segment_waits_for_gap() {
        let mut buf = RecvBuffer::new(1024, 100);
        assert_eq!(buf.accept(105, b"fghij"), 0);
        assert_eq!(buf.engine_nxt(), 100);
        assert_eq!(buf.accept(100, b"abcde"), 10);
        assert_eq!(buf.engine_nxt(), 110);
        assert_eq!(buf.drain_all(), b"abcdefghij");
    }

    #[test]
    fn duplicate_segment_makes_no_progress() {
        let mut buf = RecvBuffer::new(1024, 100);
        buf.accept(100, b"abc");
        assert_eq!(buf.accept(100, b"abc"), 0);
        assert_eq!(buf.engine_nxt(), 103);
    }

    #[test]
    fn partially_overlapping_segment_only_advances_new_bytes() {
        let mut buf = RecvBuffer::new(1024, 100);
        buf.accept(100, b"abc");
        assert_eq!(buf.accept(101, b"bcdef"), 3);
        assert_eq!(buf.drain_all(), b"abcdef");
    }

    #[test]
    fn segment_beyond_window_is_dropped() {
        let mut buf = RecvBuffer::new(4, 100);
        assert_eq!(buf.accept(110, b"z"), 0);
        assert_eq!(buf.window(), 4);
    }

    #[test]
    fn window_shrinks_as_data_accumulates_and_grows_on_drain() {
        let mut buf = RecvBuffer::new(10, 0);
        buf.accept(0, b"abcd");
        assert_eq!(buf.window(), 6);
        buf.drain(2);
        assert_eq!(buf.window(), 8);
    }

    #[test]
    fn engine_and_app_removals_are_tracked_independently() {
        let mut buf = RecvBuffer::new(1024, 100);
        buf.accept(100, b"abcdef");
        assert_eq!(buf.remove(2, Reader::Engine), b"ab");
        assert_eq!(buf.engine_retired(), 2);
        assert_eq!(buf.app_retired(), 0);
        assert_eq!(buf.remove(3, Reader::App), b"cde");
        assert_eq!(buf.engine_retired(), 2);
        assert_eq!(buf.app_retired(), 3);
        // The buffer has a single physical head: either role's removal
        // frees the window on its own, with no dependency on the other.
        assert_eq!(buf.window(), 1024 - 1);
    }
}
