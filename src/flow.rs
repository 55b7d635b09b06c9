//! The per-flow TCP state machine: one [`Flow`] per 4-tuple, driving a
//! single subflow through the RFC 9293 state diagram, independent of
//! whether it is a standalone connection or one subflow of an MPTCP
//! session (MPTCP bookkeeping lives a layer up, in
//! [`crate::mptcp::MasterControlBlock`]).

use std::time::{Duration, Instant};

use crate::congestion::CongestionControl;
use crate::error::FlowError;
use crate::header::{Control, MptcpOption, TcpHeader, TcpHeaderBuilder};
use crate::ipv4_addr::Ipv4Address;
use crate::message::Message;
use crate::recv_buffer::RecvBuffer;
use crate::rtt::RttEstimator;
use crate::sack::SackTable;
use crate::seq::{mod_bounded, mod_le, mod_leq, Le, Leq};
use crate::send_buffer::SendBuffer;
use crate::state::State;

/// The default receive/send buffer size used when a caller doesn't specify
/// one.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// A local/remote `(address, port)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Socket {
    pub address: Ipv4Address,
    pub port: u16,
}

/// The 4-tuple that identifies a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId {
    pub local: Socket,
    pub remote: Socket,
}

impl FlowId {
    pub fn reverse(self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }
}

/// Something a [`Flow`] wants the engine to do as a result of processing a
/// segment or a poll tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// The handshake finished; the flow is ready for application data.
    Established,
    /// New contiguous bytes are available in the receive buffer.
    DataAvailable,
    /// The peer sent a FIN; no more bytes will ever arrive.
    PeerClosed,
    /// The connection reset, locally or remotely.
    Reset,
    /// The flow has reached CLOSED and can be removed from the flow table.
    ClosedAndRemovable,
    /// A segment the engine should acknowledge right away rather than
    /// folding it into the next round's aggregated ACK: a late or
    /// out-of-window segment (RFC 9293 §3.10.7.4), a window probe, a FIN
    /// not yet at the receive edge, or a PAWS failure.
    ScheduleImmediateAck,
    /// A segment the engine may coalesce with other pending ACKs before
    /// the next poll-loop flush.
    ScheduleAggregatedAck,
    /// This flow negotiated MPTCP and just reassembled a DSS-mapped
    /// byte range; the caller should hand it to
    /// [`crate::mptcp::MasterControlBlock::copy_from_subflow`].
    MptcpDataMapped {
        dsn: u32,
        sub_seq: u32,
        len: u16,
        data_fin: bool,
    },
}

/// A single outgoing segment the caller is responsible for handing to the
/// IP layer.
#[derive(Debug, Clone)]
pub struct OutgoingSegment {
    pub header: TcpHeader,
    pub text: Message,
}

#[derive(Debug, Clone, Copy)]
struct RetransmitTimer {
    deadline: Instant,
}

/// A single TCP subflow's complete state.
pub struct Flow {
    pub id: FlowId,
    pub state: State,
    mtu: usize,
    mss: u32,
    /// `mss` minus timestamp-option overhead once both sides are known to
    /// exchange timestamps (§4.2); bounds how much payload a single
    /// segment may carry. Equal to `mss` until then.
    eff_mss: u32,

    snd_wnd: u16,
    snd_wl1: u32,
    snd_wl2: u32,
    iss: u32,

    irs: u32,
    rcv_wnd_advertised: u16,

    send: SendBuffer,
    recv: RecvBuffer,
    rtt: RttEstimator,
    congestion: CongestionControl,
    sack: SackTable,

    retransmit_timer: Option<RetransmitTimer>,
    time_wait_deadline: Option<Instant>,
    fin_seq: Option<u32>,

    /// PAWS: the most recent peer `TSval` seen in-window, or `None` until
    /// the peer has sent a timestamp at all.
    ts_recent: Option<u32>,

    /// Whether this flow may emit the Timestamps option (config) and
    /// whether the peer has been observed to send one of its own. Only
    /// once both hold does §4.5's RTT estimator get samples: the source
    /// derives `mrtt` from `cur_ts - ts_ecr`, so a side that never sees a
    /// peer timestamp has no sampling path at all (`saw_timestamp` gates
    /// it in the original).
    timestamps_enabled: bool,
    peer_supports_timestamps: bool,
    /// Gates whether SACK-Permitted is offered and SACK blocks are
    /// attached to outgoing segments (config).
    sack_enabled: bool,
    /// The instant this flow was created, the epoch its outgoing `TSval`s
    /// are measured from.
    created_at: Instant,
    /// Refreshed on every inbound segment; compared against the
    /// configured idle timeout in [`Flow::poll`].
    last_activity: Instant,

    /// Set the first time a FIN is observed exactly at the receive edge;
    /// folds the one sequence number a FIN consumes into [`Flow::rcv_nxt`]
    /// without needing the reassembly buffer to know about control flags.
    fin_received: bool,

    /// Set the first time an in-window RST moves an ESTABLISHED/CLOSE_WAIT
    /// flow into CLOSE_WAIT (§4.6), so a second RST doesn't re-raise the
    /// close event.
    reset_queued: bool,

    /// Set once this flow has negotiated MPTCP at the handshake; carried so
    /// the caller knows to route reassembled bytes through the coupler
    /// instead of treating this as a standalone stream.
    pub is_mptcp: bool,

    /// The token of the [`crate::mptcp::MasterControlBlock`] this flow is a
    /// subflow of, if any. A token rather than a reference, since the
    /// directory (not the flow) owns the MCB; see the module docs on
    /// `mptcp.rs`.
    pub mcb_token: Option<u32>,

    /// An MPTCP suboption the engine wants attached to this flow's next
    /// handshake segment (SYN, SYN-ACK) or to the next bare ACK built for a
    /// `Schedule*Ack` event. SYN/SYN-ACK building only peeks this (so it
    /// survives retransmission); a bare ACK consumes it via
    /// [`Flow::take_pending_mptcp_option`].
    pending_mptcp_option: Option<MptcpOption>,
}

const MSL: Duration = Duration::from_secs(30);

/// Bytes an aligned Timestamps option costs a segment once both sides use
/// it (RFC 7323 §3.2: kind+len+TSval+TSecr padded with two NOPs to a
/// 4-byte boundary), subtracted from `mss` to get `eff_mss` (§4.2).
const TIMESTAMP_OPTION_OVERHEAD: u32 = 12;

impl Flow {
    /// Creates a flow for an active OPEN: sends the initial SYN.
    pub fn open(id: FlowId, iss: u32, mtu: usize, timestamps_enabled: bool, sack_enabled: bool) -> Self {
        let mss = mtu.saturating_sub(40).max(536) as u32;
        let now = Instant::now();
        Self {
            id,
            state: State::SynSent,
            mtu,
            mss,
            eff_mss: mss,
            snd_wnd: 0,
            snd_wl1: 0,
            snd_wl2: 0,
            iss,
            irs: 0,
            rcv_wnd_advertised: DEFAULT_BUFFER_SIZE.min(u16::MAX as usize) as u16,
            send: SendBuffer::new(iss.wrapping_add(1)),
            recv: RecvBuffer::new(DEFAULT_BUFFER_SIZE, 0),
            rtt: RttEstimator::new(),
            congestion: CongestionControl::new(mss),
            sack: SackTable::new(),
            retransmit_timer: None,
            time_wait_deadline: None,
            fin_seq: None,
            ts_recent: None,
            timestamps_enabled,
            peer_supports_timestamps: false,
            sack_enabled,
            created_at: now,
            last_activity: now,
            fin_received: false,
            reset_queued: false,
            is_mptcp: false,
            mcb_token: None,
            pending_mptcp_option: None,
        }
    }

    /// Creates a flow for a passive OPEN, having just received a SYN and
    /// decided to answer it (moves straight to SYN-RECEIVED).
    pub fn accept(id: FlowId, iss: u32, peer_syn: &TcpHeader, mtu: usize, timestamps_enabled: bool, sack_enabled: bool) -> Self {
        let mss = peer_syn
            .options
            .mss
            .unwrap_or(536)
            .min(mtu.saturating_sub(40) as u16) as u32;
        let irs = peer_syn.seq;
        let peer_supports_timestamps = timestamps_enabled && peer_syn.options.timestamps.is_some();
        let ts_recent = if peer_supports_timestamps {
            peer_syn.options.timestamps.map(|(tsval, _)| tsval)
        } else {
            None
        };
        let eff_mss = if peer_supports_timestamps {
            mss.saturating_sub(TIMESTAMP_OPTION_OVERHEAD).max(1)
        } else {
            mss
        };
        let now = Instant::now();
        Self {
            id,
            state: State::SynReceived,
            mtu,
            mss,
            eff_mss,
            snd_wnd: peer_syn.wnd,
            snd_wl1: irs,
            snd_wl2: iss,
            iss,
            irs,
            rcv_wnd_advertised: DEFAULT_BUFFER_SIZE.min(u16::MAX as usize) as u16,
            send: SendBuffer::new(iss.wrapping_add(1)),
            recv: RecvBuffer::new(DEFAULT_BUFFER_SIZE, irs.wrapping_add(1)),
            rtt: RttEstimator::new(),
            congestion: CongestionControl::new(mss),
            sack: SackTable::new(),
            retransmit_timer: None,
            time_wait_deadline: None,
            fin_seq: None,
            ts_recent,
            timestamps_enabled,
            peer_supports_timestamps,
            sack_enabled,
            created_at: now,
            last_activity: now,
            fin_received: false,
            reset_queued: false,
            is_mptcp: false,
            mcb_token: None,
            pending_mptcp_option: None,
        }
    }

    pub fn snd_una(&self) -> u32 {
        self.send.una()
    }

    pub fn snd_nxt(&self) -> u32 {
        self.send.nxt()
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.recv.engine_nxt().wrapping_add(self.fin_received as u32)
    }

    /// Queues application bytes for eventual transmission. Valid only once
    /// the flow can send, i.e. ESTABLISHED or CLOSE-WAIT.
    pub fn send(&mut self, data: &[u8]) -> Result<(), FlowError> {
        if !self.state.is_data_transfer() {
            return Err(FlowError::WrongState);
        }
        self.send.enqueue(data);
        Ok(())
    }

    /// Requests a graceful close: once pending data drains, a FIN is sent.
    pub fn close(&mut self) -> Result<(), FlowError> {
        match self.state {
            State::Established => {
                self.state = State::FinWait1;
                Ok(())
            }
            State::CloseWait => {
                self.state = State::LastAck;
                Ok(())
            }
            _ => Err(FlowError::WrongState),
        }
    }

    /// Reads (and drains) reassembled application bytes.
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        self.recv.drain(max)
    }

    pub fn readable_len(&self) -> usize {
        self.recv.ready_len()
    }

    /// Gives mutable access to the reassembly buffer, for the MPTCP subflow
    /// coupler to drain bytes into the master connection's buffer instead
    /// of an application reading them directly.
    pub fn recv_buffer_mut(&mut self) -> &mut RecvBuffer {
        &mut self.recv
    }

    /// Queues an MPTCP suboption to ride on the next handshake segment (SYN
    /// or SYN-ACK) this flow builds, or on the next bare ACK built for a
    /// `Schedule*Ack` event.
    pub fn set_pending_mptcp_option(&mut self, option: MptcpOption) {
        self.pending_mptcp_option = Some(option);
    }

    /// Takes the pending MPTCP suboption, if any, for a caller building a
    /// one-off bare ACK (the handshake-completing ACK, or a join's ACK).
    pub fn take_pending_mptcp_option(&mut self) -> Option<MptcpOption> {
        self.pending_mptcp_option.take()
    }

    /// The current send window, in bytes, bounded by both the peer's
    /// advertised window and the congestion window.
    fn effective_send_window(&self) -> usize {
        let in_flight = self.send.in_flight_bytes() as u32;
        let allowed = self.congestion.send_window(self.snd_wnd as u32);
        allowed.saturating_sub(in_flight) as usize
    }

    /// This flow's own `TSval`: milliseconds since the flow was created,
    /// the clock `mrtt = cur_ts - ts_ecr` is measured against.
    fn tsval(&self) -> u32 {
        self.created_at.elapsed().as_millis() as u32
    }

    /// Whether both ends have been observed to support timestamps, i.e.
    /// whether this flow should attach one to its own outgoing segments.
    fn wants_timestamps(&self) -> bool {
        self.timestamps_enabled && self.peer_supports_timestamps
    }

    /// Recomputes `eff_mss` from `mss` and whatever is currently known
    /// about timestamp support, once per negotiation (§4.2).
    fn recompute_eff_mss(&mut self) {
        self.eff_mss = if self.wants_timestamps() {
            self.mss.saturating_sub(TIMESTAMP_OPTION_OVERHEAD).max(1)
        } else {
            self.mss
        };
    }

    /// Attaches whatever non-handshake wire options this flow currently
    /// wants on an outgoing segment: a Timestamps echo once both sides
    /// support it, and any pending SACK blocks (§4.2).
    fn attach_wire_options(&self, mut builder: TcpHeaderBuilder) -> TcpHeaderBuilder {
        if self.wants_timestamps() {
            builder = builder.timestamps(self.tsval(), self.ts_recent.unwrap_or(0));
        }
        if self.sack_enabled && !self.sack.is_empty() {
            builder = builder.sack_blocks(self.sack.blocks().to_vec());
        }
        builder
    }

    /// Builds every segment this flow currently wants transmitted: data
    /// segments carved from the send buffer, retransmissions, and control
    /// segments (SYN, FIN, bare ACK) as the state machine requires them.
    /// `src`/`dst` are this flow's own addresses, needed to compute the
    /// checksum.
    pub fn segments_to_send(&mut self, src: Ipv4Address, dst: Ipv4Address) -> Vec<OutgoingSegment> {
        let mut out = Vec::new();

        match self.state {
            State::SynSent => {
                let text = Message::new(Vec::new());
                let mut builder = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, self.iss, self.rcv_wnd_advertised)
                    .syn()
                    .mss(self.mss as u16)
                    .window_scale(0);
                if self.sack_enabled {
                    builder = builder.sack_permitted();
                }
                if self.timestamps_enabled {
                    // Peer support isn't known yet; offer our own and echo
                    // nothing until its SYN-ACK tells us whether it has one.
                    builder = builder.timestamps(self.tsval(), 0);
                }
                if let Some(option) = self.pending_mptcp_option.clone() {
                    builder = builder.mptcp(option);
                }
                let header = builder.build(&text, src, dst);
                out.push(OutgoingSegment { header, text });
                return out;
            }
            State::SynReceived => {
                let text = Message::new(Vec::new());
                let mut builder = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, self.iss, self.rcv_wnd_advertised)
                    .syn()
                    .ack(self.irs.wrapping_add(1))
                    .mss(self.mss as u16)
                    .window_scale(0);
                if self.sack_enabled {
                    builder = builder.sack_permitted();
                }
                builder = self.attach_wire_options(builder);
                if let Some(option) = self.pending_mptcp_option.clone() {
                    builder = builder.mptcp(option);
                }
                let header = builder.build(&text, src, dst);
                out.push(OutgoingSegment { header, text });
                return out;
            }
            _ => {}
        }

        if !self.state.is_synchronized() {
            return out;
        }

        // Retransmissions take priority over fresh data.
        for segment in self.send.take_retransmits() {
            let text = Message::new(segment.data.clone());
            let builder = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, segment.seq, self.rcv_wnd_advertised)
                .ack(self.rcv_nxt())
                .psh();
            let header = self.attach_wire_options(builder).build(&text, src, dst);
            out.push(OutgoingSegment { header, text });
        }

        // Fresh data, as the window allows.
        loop {
            let window = self.effective_send_window();
            let Some(segment) = self.send.segmentize(self.eff_mss as usize, window) else {
                break;
            };
            let text = Message::new(segment.data.clone());
            let builder = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, segment.seq, self.rcv_wnd_advertised)
                .ack(self.rcv_nxt())
                .psh();
            let header = self.attach_wire_options(builder).build(&text, src, dst);
            out.push(OutgoingSegment { header, text });
        }

        if self.retransmit_timer.is_none() && self.send.has_unacked_data() {
            self.arm_retransmit_timer();
        }

        // Send our own FIN exactly once, when we have transitioned into a
        // FIN-bearing state and every prior byte has been sent.
        if matches!(self.state, State::FinWait1 | State::LastAck) && self.fin_seq.is_none() {
            let seq = self.send.nxt();
            self.fin_seq = Some(seq);
            let text = Message::new(Vec::new());
            let builder = TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq, self.rcv_wnd_advertised)
                .ack(self.rcv_nxt())
                .fin();
            let header = self.attach_wire_options(builder).build(&text, src, dst);
            out.push(OutgoingSegment { header, text });
        }

        out
    }

    fn arm_retransmit_timer(&mut self) {
        self.retransmit_timer = Some(RetransmitTimer {
            deadline: Instant::now() + self.rtt.retransmission_timeout(),
        });
    }

    /// Advances time for this flow by `elapsed`, expiring the
    /// retransmission timer or the TIME-WAIT 2MSL wait as appropriate.
    pub fn poll(&mut self, now: Instant, idle_timeout: Duration) -> Vec<FlowEvent> {
        let mut events = Vec::new();

        if !matches!(self.state, State::Closed | State::TimeWait)
            && now.saturating_duration_since(self.last_activity) >= idle_timeout
        {
            self.state = State::Closed;
            events.push(FlowEvent::Reset);
            events.push(FlowEvent::ClosedAndRemovable);
            return events;
        }

        if let Some(timer) = self.retransmit_timer {
            if now >= timer.deadline {
                self.retransmit_timer = None;
                if self.send.has_unacked_data() {
                    let peer_wnd = self.snd_wnd as u32;
                    let should_abort = self.congestion.on_retransmission_timeout(peer_wnd);
                    self.send.mark_all_for_retransmit();
                    if should_abort {
                        self.state = State::Closed;
                        events.push(FlowEvent::Reset);
                        events.push(FlowEvent::ClosedAndRemovable);
                        return events;
                    }
                    self.arm_retransmit_timer();
                }
            }
        }

        if let Some(deadline) = self.time_wait_deadline {
            if now >= deadline {
                self.state = State::Closed;
                events.push(FlowEvent::ClosedAndRemovable);
            }
        }

        events
    }

    /// Processes an inbound segment, mutating state and returning whatever
    /// events the caller (engine or MPTCP coupler) should react to.
    ///
    /// Sequence validation follows the revised window/PAWS check described
    /// in RFC 9293 §3.10.7.4: a segment is acceptable if it overlaps the
    /// receive window at all, even if it is not exactly at `RCV.NXT`; an
    /// old duplicate outside the window (but not a pure zero-length probe)
    /// draws an ACK and is otherwise discarded without disturbing state.
    pub fn receive_segment(&mut self, header: &TcpHeader, text: Message) -> Vec<FlowEvent> {
        let mut events = Vec::new();
        self.last_activity = Instant::now();

        if header.ctl.rst() {
            return self.process_rst(header);
        }

        match self.state {
            State::SynSent => {
                self.process_syn_sent(header, &mut events);
                return events;
            }
            _ => {}
        }

        // RFC 9293 §3.10.7.4 runs PAWS ahead of window acceptability once
        // the handshake has progressed past SYN-RECEIVED.
        if self.timestamps_enabled
            && !matches!(self.state, State::Closed | State::Listen | State::SynSent | State::SynReceived)
        {
            if let Some((tsval, _)) = header.options.timestamps {
                self.peer_supports_timestamps = true;
                if let Some(ts_recent) = self.ts_recent {
                    if mod_le(tsval, ts_recent) && tsval != ts_recent {
                        events.push(FlowEvent::ScheduleImmediateAck);
                        return events;
                    }
                }
                self.ts_recent = Some(tsval);
            }
        }

        if self.state == State::TimeWait {
            self.time_wait_deadline = Some(Instant::now() + 2 * MSL);
            events.push(FlowEvent::ScheduleImmediateAck);
            return events;
        }

        if !self.is_seq_acceptable(header, text.len()) {
            events.push(FlowEvent::ScheduleImmediateAck);
            return events;
        }

        if self.state == State::Established && text.is_empty() && !header.ctl.fin() && header.seq.wrapping_add(1) == self.rcv_nxt() {
            // A zero-length segment exactly one byte behind RCV.NXT is a
            // window probe: acknowledge it without otherwise acting on it.
            events.push(FlowEvent::ScheduleAggregatedAck);
        }

        if header.ctl.syn() {
            if self.state == State::SynReceived && header.seq == self.irs && !header.ctl.ack() {
                // A lost SYN-ACK: the peer resent its SYN. Re-drive by
                // scheduling the retransmission of our SYN-ACK rather than
                // tearing the flow down.
                events.push(FlowEvent::ScheduleImmediateAck);
                return events;
            }
            // A SYN here otherwise indicates the peer restarted; RFC 9293
            // has us reset and tear down.
            self.state = State::Closed;
            events.push(FlowEvent::Reset);
            events.push(FlowEvent::ClosedAndRemovable);
            return events;
        }

        if !header.ctl.ack() {
            return events;
        }

        match self.state {
            State::SynReceived => {
                if header.ack == self.send.nxt() {
                    self.state = State::Established;
                    events.push(FlowEvent::Established);
                } else {
                    self.state = State::Closed;
                    events.push(FlowEvent::Reset);
                    events.push(FlowEvent::ClosedAndRemovable);
                    return events;
                }
            }
            _ => {}
        }

        self.process_ack(header, &mut events);
        if text.len() > 0 {
            self.process_text(header, text, &mut events);
        }
        if header.ctl.fin() {
            self.process_fin(header, &mut events);
        }

        events
    }

    fn is_seq_acceptable(&self, header: &TcpHeader, text_len: usize) -> bool {
        if !self.state.is_synchronized() {
            return true;
        }
        let rcv_nxt = self.rcv_nxt();
        let rcv_wnd = self.recv.window() as u32;
        let seg_len = text_len as u32
            + header.ctl.syn() as u32
            + header.ctl.fin() as u32;
        if seg_len == 0 {
            if rcv_wnd == 0 {
                return header.seq == rcv_nxt;
            }
            return mod_bounded(rcv_nxt.wrapping_sub(1), Le, header.seq, Le, rcv_nxt.wrapping_add(rcv_wnd));
        }
        if rcv_wnd == 0 {
            return false;
        }
        let seg_end = header.seq.wrapping_add(seg_len - 1);
        mod_bounded(rcv_nxt.wrapping_sub(1), Le, header.seq, Le, rcv_nxt.wrapping_add(rcv_wnd))
            || mod_bounded(rcv_nxt.wrapping_sub(1), Le, seg_end, Le, rcv_nxt.wrapping_add(rcv_wnd))
    }

    fn process_syn_sent(&mut self, header: &TcpHeader, events: &mut Vec<FlowEvent>) {
        if header.ctl.ack() && !mod_leq(self.iss.wrapping_add(1), header.ack.wrapping_add(0)) {
            // ack doesn't acknowledge our SYN; RFC 9293 has us drop unless RST.
            return;
        }
        if !header.ctl.syn() {
            return;
        }
        self.irs = header.seq;
        self.recv = RecvBuffer::new(DEFAULT_BUFFER_SIZE, self.irs.wrapping_add(1));
        if let Some(mss) = header.options.mss {
            self.mss = (mss as u32).min(self.mtu.saturating_sub(40) as u32);
            self.congestion = CongestionControl::new(self.mss);
        }
        if self.timestamps_enabled {
            if let Some((tsval, _)) = header.options.timestamps {
                self.peer_supports_timestamps = true;
                self.ts_recent = Some(tsval);
            }
        }
        self.recompute_eff_mss();
        self.snd_wnd = header.wnd;
        self.snd_wl1 = self.irs;
        self.snd_wl2 = header.ack;
        if header.ctl.ack() {
            if let Some(acked) = self.send.on_ack(header.ack) {
                self.congestion.on_new_ack(acked as u32, self.eff_mss, true);
            }
            if let Some((_, tsecr)) = header.options.timestamps {
                if self.wants_timestamps() {
                    let mrtt = self.tsval().wrapping_sub(tsecr) as i64;
                    self.rtt.sample(mrtt, self.send.una(), self.send.nxt());
                }
            }
            self.state = State::Established;
            events.push(FlowEvent::Established);
            // segments_to_send won't emit a bare ACK on its own (nothing is
            // queued yet); the handshake still needs its third segment.
            events.push(FlowEvent::ScheduleImmediateAck);
        } else {
            self.state = State::SynReceived;
        }
    }

    fn process_rst(&mut self, header: &TcpHeader) -> Vec<FlowEvent> {
        let mut events = Vec::new();
        let in_window = match self.state {
            State::SynSent => header.ack == self.send.nxt(),
            _ => mod_bounded(self.rcv_nxt().wrapping_sub(1), Leq, header.seq, Leq, self.rcv_nxt().wrapping_add(self.recv.window() as u32)),
        };
        if !in_window {
            return events;
        }
        match self.state {
            // RFC 9293 has an RST+ACK here enter CLOSE_WAIT rather than
            // tear the flow down outright; the caller is notified with an
            // error, not an orderly close.
            State::SynSent => {
                self.state = State::CloseWait;
                events.push(FlowEvent::Reset);
            }
            // Only a reset that actually acknowledges our SYN is ours to
            // act on; anything else here is dropped in place.
            State::SynReceived => {
                if header.ack == self.send.nxt() {
                    self.state = State::Closed;
                    events.push(FlowEvent::Reset);
                    events.push(FlowEvent::ClosedAndRemovable);
                }
            }
            // Don't discard buffered-but-unread bytes: let CLOSE_WAIT
            // drain them the way an orderly FIN would, and only raise the
            // close event once per flow.
            State::Established | State::CloseWait => {
                if !self.reset_queued && !self.fin_received {
                    self.reset_queued = true;
                    self.state = State::CloseWait;
                    events.push(FlowEvent::PeerClosed);
                }
            }
            State::FinWait1
            | State::FinWait2
            | State::LastAck
            | State::Closing
            | State::TimeWait => {
                self.state = State::Closed;
                events.push(FlowEvent::Reset);
                events.push(FlowEvent::ClosedAndRemovable);
            }
            State::Listen | State::Closed => {}
        }
        events
    }

    fn process_ack(&mut self, header: &TcpHeader, events: &mut Vec<FlowEvent>) {
        let ack = header.ack;
        let una = self.send.una();
        let nxt = self.send.nxt();

        if mod_le(ack, una) {
            // Old ACK: duplicate-ACK bookkeeping only applies with no new data.
            if ack == una && header.wnd as u32 == self.snd_wnd as u32 {
                if self.congestion.on_duplicate_ack(self.snd_wnd as u32) {
                    self.send.mark_oldest_for_retransmit();
                }
            }
            return;
        }
        if mod_le(nxt, ack) && ack != nxt {
            // ACKs something not yet sent: invalid, ignore.
            return;
        }

        let exits_recovery = mod_le(nxt, ack);
        if let Some(acked) = self.send.on_ack(ack) {
            self.congestion.on_new_ack(acked as u32, self.eff_mss, exits_recovery);
            self.sack.retire_below(ack);
            self.retransmit_timer = None;
            if self.send.has_unacked_data() {
                self.arm_retransmit_timer();
            }
            if self.wants_timestamps() {
                if let Some((_, tsecr)) = header.options.timestamps {
                    let mrtt = self.tsval().wrapping_sub(tsecr) as i64;
                    self.rtt.sample(mrtt, self.send.una(), self.send.nxt());
                }
            }
        }

        if mod_le(self.snd_wl1, header.seq)
            || (self.snd_wl1 == header.seq && mod_leq(self.snd_wl2, ack))
        {
            self.snd_wnd = header.wnd;
            self.snd_wl1 = header.seq;
            self.snd_wl2 = ack;
        }

        if self.state == State::FinWait1 {
            if let Some(fin_seq) = self.fin_seq {
                if mod_leq(fin_seq.wrapping_add(1), ack) {
                    self.state = State::FinWait2;
                }
            }
        } else if self.state == State::Closing {
            if let Some(fin_seq) = self.fin_seq {
                if mod_leq(fin_seq.wrapping_add(1), ack) {
                    self.enter_time_wait();
                }
            }
        } else if self.state == State::LastAck {
            if let Some(fin_seq) = self.fin_seq {
                if mod_leq(fin_seq.wrapping_add(1), ack) {
                    self.state = State::Closed;
                    events.push(FlowEvent::ClosedAndRemovable);
                }
            }
        }
    }

    fn process_text(&mut self, header: &TcpHeader, text: Message, events: &mut Vec<FlowEvent>) {
        let bytes = text.to_vec();
        let before = self.recv.engine_nxt();
        let advanced = self.recv.accept(header.seq, &bytes);
        if let Some((left, right)) = non_contiguous_range(header.seq, bytes.len() as u32, before) {
            self.sack.insert(left, right);
        }
        if advanced == 0 {
            events.push(FlowEvent::ScheduleImmediateAck);
            return;
        }
        events.push(FlowEvent::DataAvailable);

        if self.is_mptcp {
            if let Some(MptcpOption::Dss {
                mapping: Some(mapping),
                data_fin,
                ..
            }) = &header.options.mptcp
            {
                events.push(FlowEvent::MptcpDataMapped {
                    dsn: mapping.data_seq,
                    sub_seq: mapping.subflow_seq,
                    len: mapping.data_level_len,
                    data_fin: *data_fin,
                });
                events.push(FlowEvent::ScheduleAggregatedAck);
                return;
            }
        }
        events.push(FlowEvent::ScheduleAggregatedAck);
    }

    fn process_fin(&mut self, header: &TcpHeader, events: &mut Vec<FlowEvent>) {
        if header.seq != self.recv.engine_nxt() {
            // Not yet at the receive edge: the gap ahead of it must close
            // via a later segment before this FIN can be folded in.
            events.push(FlowEvent::ScheduleImmediateAck);
            return;
        }
        if !self.fin_received {
            self.fin_received = true;
        }
        events.push(FlowEvent::PeerClosed);
        events.push(FlowEvent::ScheduleAggregatedAck);
        match self.state {
            State::Established => self.state = State::CloseWait,
            State::FinWait1 => self.enter_closing_or_time_wait(),
            State::FinWait2 => self.enter_time_wait(),
            _ => {}
        }
    }

    fn enter_closing_or_time_wait(&mut self) {
        if let Some(fin_seq) = self.fin_seq {
            if mod_leq(fin_seq.wrapping_add(1), self.send.una()) {
                self.enter_time_wait();
                return;
            }
        }
        self.state = State::Closing;
    }

    fn enter_time_wait(&mut self) {
        self.state = State::TimeWait;
        self.time_wait_deadline = Some(Instant::now() + 2 * MSL);
    }
}

/// Identifies the byte range of `text` (length `len`, starting at `seq`)
/// that lies beyond `engine_nxt`, i.e. the part that was stored
/// out-of-order and is worth reporting in a SACK block.
fn non_contiguous_range(seq: u32, len: u32, engine_nxt: u32) -> Option<(u32, u32)> {
    if len == 0 {
        return None;
    }
    let end = seq.wrapping_add(len);
    if mod_le(seq, engine_nxt) {
        return None;
    }
    Some((seq, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket(port: u16) -> Socket {
        Socket {
            address: Ipv4Address::LOCALHOST,
            port,
        }
    }

    fn flow_id() -> FlowId {
        FlowId {
            local: socket(1000),
            remote: socket(2000),
        }
    }

    #[test]
    fn three_way_handshake_reaches_established() {
        let mut client = Flow::open(flow_id(), 1000, 1500, true, true);
        let segs = client.segments_to_send(Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        assert_eq!(segs.len(), 1);
        assert!(segs[0].header.ctl.syn());

        let mut server = Flow::accept(flow_id().reverse(), 5000, &segs[0].header, 1500, true, true);
        let server_segs = server.segments_to_send(Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        assert!(server_segs[0].header.ctl.syn() && server_segs[0].header.ctl.ack());

        let events = client.receive_segment(&server_segs[0].header, Message::new(Vec::new()));
        assert!(events.contains(&FlowEvent::Established));

        let client_ack = client.segments_to_send(Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        // No data queued, and the handshake's own ACK still needs to reach the server.
        let ack_header = TcpHeaderBuilder::new(1000, 2000, client.snd_nxt(), 4096)
            .ack(client.rcv_nxt())
            .build(&Message::new(Vec::new()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        let _ = client_ack;
        let events = server.receive_segment(&ack_header, Message::new(Vec::new()));
        assert!(events.contains(&FlowEvent::Established));
        assert_eq!(server.state, State::Established);
    }

    #[test]
    fn data_segment_becomes_readable() {
        let mut server = Flow::accept(
            flow_id(),
            5000,
            &TcpHeaderBuilder::new(2000, 1000, 999, 4096)
                .syn()
                .build(&Message::new(Vec::new()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST),
            1500,
            true,
            true,
        );
        server.state = State::Established;
        let header = TcpHeaderBuilder::new(2000, 1000, 1000, 4096)
            .ack(server.snd_nxt())
            .build(&Message::new(b"hi".to_vec()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        let events = server.receive_segment(&header, Message::new(b"hi".to_vec()));
        assert!(events.contains(&FlowEvent::DataAvailable));
        assert_eq!(server.read(16), b"hi");
    }

    #[test]
    fn rst_in_established_moves_to_close_wait_without_discarding_buffer() {
        let mut server = Flow::accept(
            flow_id(),
            5000,
            &TcpHeaderBuilder::new(2000, 1000, 999, 4096)
                .syn()
                .build(&Message::new(Vec::new()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST),
            1500,
            true,
            true,
        );
        server.state = State::Established;
        let header = TcpHeaderBuilder::new(2000, 1000, 1000, 4096)
            .ack(server.snd_nxt())
            .build(&Message::new(b"hi".to_vec()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        server.receive_segment(&header, Message::new(b"hi".to_vec()));

        let mut rst_header = TcpHeaderBuilder::new(2000, 1000, 1002, 4096)
            .ack(server.snd_nxt())
            .build(&Message::new(Vec::new()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        rst_header.ctl = Control::new(false, false, false, true, false, false);
        let events = server.receive_segment(&rst_header, Message::new(Vec::new()));
        assert!(events.contains(&FlowEvent::PeerClosed));
        assert!(!events.contains(&FlowEvent::Reset));
        assert_eq!(server.state, State::CloseWait);
        // The buffered bytes from before the RST are still readable.
        assert_eq!(server.read(16), b"hi");

        // A second RST in CLOSE_WAIT doesn't re-raise the close event.
        let events = server.receive_segment(&rst_header, Message::new(Vec::new()));
        assert!(events.is_empty());
    }

    #[test]
    fn rst_ack_in_syn_sent_moves_to_close_wait_with_error_event() {
        let mut client = Flow::open(flow_id(), 1000, 1500, true, true);
        let mut header = TcpHeaderBuilder::new(2000, 1000, 5000, 4096)
            .ack(client.snd_nxt())
            .build(&Message::new(Vec::new()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        header.ctl = Control::new(false, true, false, true, false, false);
        let events = client.receive_segment(&header, Message::new(Vec::new()));
        assert!(events.contains(&FlowEvent::Reset));
        assert!(!events.contains(&FlowEvent::ClosedAndRemovable));
        assert_eq!(client.state, State::CloseWait);
    }

    #[test]
    fn rst_in_fin_wait_1_tears_down_the_flow() {
        let mut server = Flow::accept(
            flow_id(),
            5000,
            &TcpHeaderBuilder::new(2000, 1000, 999, 4096)
                .syn()
                .build(&Message::new(Vec::new()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST),
            1500,
            true,
            true,
        );
        server.state = State::FinWait1;
        let mut header = TcpHeaderBuilder::new(2000, 1000, 1000, 4096)
            .ack(server.snd_nxt())
            .build(&Message::new(Vec::new()), Ipv4Address::LOCALHOST, Ipv4Address::LOCALHOST);
        header.ctl = Control::new(false, false, false, true, false, false);
        let events = server.receive_segment(&header, Message::new(Vec::new()));
        assert!(events.contains(&FlowEvent::Reset));
        assert!(events.contains(&FlowEvent::ClosedAndRemovable));
        assert_eq!(server.state, State::Closed);
    }
}
