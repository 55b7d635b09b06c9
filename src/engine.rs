//! The flow table, listener directory, and poll-driven engine loop (C8),
//! plus the external interfaces of §6.
//!
//! `Engine` is the single entry point a packet I/O layer and an
//! application event loop both talk to: [`Engine::submit_segment`] is the
//! inbound callback, [`Engine::poll`] drives timers and drains the
//! application-facing event stream, and [`Engine::take_outgoing`] drains
//! whatever the core wants written back to the wire. It owns exactly the
//! state §5 says may be global to a worker: the flow table and the MPTCP
//! directory.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{EngineError, MptcpError, TableError};
use crate::flow::{Flow, FlowEvent, FlowId, Socket};
use crate::header::{MpJoin, MptcpOption, TcpHeader, TcpHeaderBuilder};
use crate::ipv4_addr::Ipv4Address;
use crate::message::Message;
use crate::mptcp::{self, MasterControlBlock, MptcpDirectory, Role};

/// A completed wire segment ready to hand to the packet I/O layer.
#[derive(Debug, Clone)]
pub struct WireSegment {
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub header: TcpHeader,
    pub text: Message,
}

/// Application-facing events, raised on a flow or on a listener's socket
/// (§6). Delivery is at-least-once with coalescing: the engine never
/// queues the same `(flow, kind)` pair twice between two drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEvent {
    Readable(FlowId),
    Writable(FlowId),
    Error(FlowId),
    Close(FlowId),
    Accept(Socket),
}

/// A listener bound to a local port, optionally restricted to one
/// interface address (§4.8's match rule).
struct Listener {
    bound_address: Option<Ipv4Address>,
    backlog: VecDeque<FlowId>,
}

/// Bookkeeping for a flow's in-progress MPTCP handshake that hasn't
/// produced an MCB yet (stashed between the LISTEN/SYN-SENT option and the
/// ACK that completes it).
#[derive(Default, Clone, Copy)]
struct PendingMptcpHandshake {
    my_key: Option<u64>,
    peer_key: Option<u64>,
    my_random: Option<u32>,
    peer_random: Option<u32>,
    is_join: bool,
}

/// One worker's complete engine state: the flow table, listener directory,
/// and MPTCP directory, plus the queues §5 describes (outgoing segments,
/// application events).
pub struct Engine {
    config: Config,
    mtu: usize,
    flows: FxHashMap<FlowId, Flow>,
    listeners: FxHashMap<u16, Listener>,
    mptcp: MptcpDirectory,
    pending_handshakes: FxHashMap<FlowId, PendingMptcpHandshake>,
    outgoing: Vec<WireSegment>,
    events: HashSet<EngineEvent>,
    destroy_list: Vec<FlowId>,
}

const DEFAULT_MTU: usize = 1500;

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            mtu: DEFAULT_MTU,
            flows: FxHashMap::default(),
            listeners: FxHashMap::default(),
            mptcp: MptcpDirectory::new(),
            pending_handshakes: FxHashMap::default(),
            outgoing: Vec::new(),
            events: HashSet::new(),
            destroy_list: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id)
    }

    pub fn flow_mut(&mut self, id: FlowId) -> Option<&mut Flow> {
        self.flows.get_mut(&id)
    }

    /// Registers a listener. `bound_address: None` matches any of
    /// [`Config::interfaces`]; `Some(addr)` matches only that address.
    pub fn listen(&mut self, local_port: u16, bound_address: Option<Ipv4Address>) {
        self.listeners.insert(
            local_port,
            Listener {
                bound_address,
                backlog: VecDeque::new(),
            },
        );
    }

    /// Pops the next completed passive-open flow off a listener's accept
    /// queue.
    pub fn accept(&mut self, local_port: u16) -> Option<FlowId> {
        self.listeners.get_mut(&local_port)?.backlog.pop_front()
    }

    /// Opens an active connection. `mptcp` requests an MP_CAPABLE SYN.
    pub fn connect(&mut self, local: Socket, remote: Socket, mptcp: bool) -> Result<FlowId, TableError> {
        let id = FlowId { local, remote };
        if self.flows.contains_key(&id) {
            return Err(TableError::ExistingFlow);
        }
        let iss = generate_iss();
        let mut flow = Flow::open(id, iss, self.mtu, self.config.timestamps_enabled, self.config.sack_enabled);
        if mptcp {
            let my_key = mptcp::generate_key();
            flow.is_mptcp = true;
            flow.set_pending_mptcp_option(MptcpOption::Capable {
                sender_key: my_key,
                receiver_key: None,
            });
            self.pending_handshakes.insert(
                id,
                PendingMptcpHandshake {
                    my_key: Some(my_key),
                    ..Default::default()
                },
            );
        }
        self.flows.insert(id, flow);
        Ok(id)
    }

    /// `MP_JOIN initiator` (§4.7): opens an additional subflow against an
    /// existing MCB from the configured secondary source address, toward
    /// the same remote the master subflow is already talking to. Called
    /// once per MCB, latched by [`MasterControlBlock::mark_join_initiated`].
    fn connect_join(&mut self, token: u32, now: Instant) -> Result<(), EngineError> {
        let remote = {
            let mcb = self.mptcp.lookup(token)?;
            let Some(master_id) = mcb.subflows.first() else {
                return Ok(());
            };
            master_id.remote
        };
        let local = Socket {
            address: self.config.secondary_source_address,
            port: ephemeral_port(),
        };
        let id = FlowId { local, remote };
        if self.flows.contains_key(&id) {
            return Ok(());
        }

        let my_random = mptcp::generate_random();
        let iss = generate_iss();
        let mut flow = Flow::open(id, iss, self.mtu, self.config.timestamps_enabled, self.config.sack_enabled);
        flow.is_mptcp = true;
        flow.mcb_token = Some(token);
        flow.set_pending_mptcp_option(MptcpOption::Join(MpJoin::Syn {
            backup: false,
            address_id: 0,
            token,
            random: my_random,
        }));
        self.pending_handshakes.insert(
            id,
            PendingMptcpHandshake {
                my_random: Some(my_random),
                is_join: true,
                ..Default::default()
            },
        );
        self.flows.insert(id, flow);
        self.flush_flow(id, now);
        Ok(())
    }

    /// Intercepts a join-initiated flow's inbound SYN-ACK before the
    /// generic state machine consumes it: verifies the truncated HMAC and,
    /// if it checks out, queues the ACK's full HMAC as this flow's next
    /// one-shot pending option. A failed verification is treated as an
    /// authentication failure and tears the flow down rather than letting
    /// it reach ESTABLISHED.
    fn handle_synsent_mptcp_option(&mut self, id: FlowId, header: &TcpHeader) -> Result<(), EngineError> {
        let Some(MptcpOption::Join(MpJoin::SynAck { truncated_hmac, random: peer_random, .. })) = header.options.mptcp.clone() else {
            return Ok(());
        };
        let Some(pending) = self.pending_handshakes.get(&id).copied() else {
            return Ok(());
        };
        if !pending.is_join {
            return Ok(());
        }
        let Some(my_random) = pending.my_random else {
            return Ok(());
        };
        let Some(token) = self.flows.get(&id).and_then(|f| f.mcb_token) else {
            return Ok(());
        };
        let (my_key, peer_key) = {
            let mcb = self.mptcp.lookup(token)?;
            (mcb.my_key, mcb.peer_key)
        };
        let verified = mptcp::verify_join_synack_hmac(truncated_hmac, my_key, peer_key, my_random, peer_random);
        if !verified {
            if let Some(flow) = self.flows.get_mut(&id) {
                flow.state = crate::state::State::Closed;
            }
            self.destroy_list.push(id);
            return Err(MptcpError::JoinAuthenticationFailed.into());
        }
        let full_hmac = mptcp::join_ack_hmac(my_key, peer_key, my_random, peer_random);
        if let Some(flow) = self.flows.get_mut(&id) {
            flow.set_pending_mptcp_option(MptcpOption::Join(MpJoin::Ack { hmac: full_hmac }));
        }
        if let Some(pending) = self.pending_handshakes.get_mut(&id) {
            pending.peer_random = Some(peer_random);
        }
        Ok(())
    }

    /// Drains every wire segment the core wants sent since the last drain.
    pub fn take_outgoing(&mut self) -> Vec<WireSegment> {
        std::mem::take(&mut self.outgoing)
    }

    /// Drains every application-facing event raised since the last drain.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain().collect()
    }

    fn match_listener(&self, local: Socket) -> bool {
        let Some(listener) = self.listeners.get(&local.port) else {
            return false;
        };
        match listener.bound_address {
            Some(addr) => addr == local.address,
            None => self.config.interfaces.contains(&local.address) || self.config.interfaces.is_empty(),
        }
    }

    /// The inbound entry point (§6): `(ifidx, now, ip_header, ip_len)`
    /// collapses here to the already-demultiplexed source/destination
    /// addresses and the raw TCP segment bytes. `checksum_verified`
    /// suppresses the software checksum check (C1) when the datapath
    /// already validated it in hardware.
    pub fn submit_segment(
        &mut self,
        _ifidx: usize,
        now: Instant,
        src: Ipv4Address,
        dst: Ipv4Address,
        bytes: &[u8],
        checksum_verified: bool,
    ) -> Result<(), EngineError> {
        let header = TcpHeader::from_bytes(bytes.iter().copied(), src, dst, checksum_verified)?;
        let header_len = header.header_len();
        let payload = bytes.get(header_len..).unwrap_or(&[]).to_vec();
        let text = Message::new(payload);

        let id = FlowId {
            local: Socket { address: dst, port: header.dst_port },
            remote: Socket { address: src, port: header.src_port },
        };

        if !self.flows.contains_key(&id) {
            return self.handle_unmatched_segment(id, &header, now);
        }

        self.drive_flow(id, &header, text, now)
    }

    fn send_standalone_rst(&mut self, id: FlowId, header: &TcpHeader) {
        let (seq, ack) = if header.ctl.ack() {
            (header.ack, 0)
        } else {
            (0, header.seq.wrapping_add(header_seq_consumed(header)))
        };
        let mut builder = TcpHeaderBuilder::new(id.local.port, id.remote.port, seq, 0).rst();
        if !header.ctl.ack() {
            builder = builder.ack(ack);
        }
        let text = Message::new(Vec::new());
        let header = builder.build(&text, id.local.address, id.remote.address);
        self.outgoing.push(WireSegment {
            src: id.local.address,
            dst: id.remote.address,
            header,
            text,
        });
    }

    /// `CreateNewFlowHTEntry` (§4.8): a segment with no matching flow is
    /// either a passive-open SYN against a listener, an RST we drop, or
    /// anything else, which draws a standalone RST.
    fn handle_unmatched_segment(&mut self, id: FlowId, header: &TcpHeader, now: Instant) -> Result<(), EngineError> {
        if header.ctl.rst() {
            return Ok(());
        }
        if !(header.ctl.syn() && !header.ctl.ack()) {
            self.send_standalone_rst(id, header);
            return Err(TableError::NoRoute.into());
        }
        if !self.match_listener(id.local) {
            self.send_standalone_rst(id, header);
            return Err(TableError::NoListener.into());
        }

        let iss = generate_iss();
        let mut flow = Flow::accept(id, iss, header, self.mtu, self.config.timestamps_enabled, self.config.sack_enabled);

        if let Some(option) = header.options.mptcp.clone() {
            self.handle_listen_mptcp_option(&mut flow, option)?;
        }

        trace!(local = %id.local.port, remote = %id.remote.port, "passive flow created in SYN-RECEIVED");
        self.flows.insert(id, flow);
        self.flush_flow(id, now);
        Ok(())
    }

    fn handle_listen_mptcp_option(&mut self, flow: &mut Flow, option: MptcpOption) -> Result<(), EngineError> {
        match option {
            MptcpOption::Capable { sender_key, .. } if sender_key != 0 => {
                let my_key = mptcp::generate_key();
                let mcb = MasterControlBlock::new(my_key, sender_key, Role::Passive);
                let token = self.mptcp.insert(mcb)?;
                flow.is_mptcp = true;
                flow.mcb_token = Some(token);
                flow.set_pending_mptcp_option(MptcpOption::Capable {
                    sender_key: my_key,
                    receiver_key: None,
                });
                self.pending_handshakes.insert(
                    flow.id,
                    PendingMptcpHandshake {
                        my_key: Some(my_key),
                        peer_key: Some(sender_key),
                        ..Default::default()
                    },
                );
            }
            MptcpOption::Join(MpJoin::Syn { token, random, .. }) => {
                if self.mptcp.get(token).is_none() {
                    return Err(MptcpError::UnknownToken.into());
                }
                flow.is_mptcp = true;
                flow.mcb_token = Some(token);
                let my_random = mptcp::generate_random();
                self.pending_handshakes.insert(
                    flow.id,
                    PendingMptcpHandshake {
                        peer_random: Some(random),
                        my_random: Some(my_random),
                        is_join: true,
                        ..Default::default()
                    },
                );
                let mcb = self.mptcp.get(token).expect("checked above");
                let truncated = mptcp::join_synack_hmac(mcb.my_key, mcb.peer_key, my_random, random);
                flow.set_pending_mptcp_option(MptcpOption::Join(MpJoin::SynAck {
                    backup: false,
                    address_id: 0,
                    truncated_hmac: truncated,
                    random: my_random,
                }));
            }
            _ => {}
        }
        Ok(())
    }

    /// Drives one existing flow through a received segment, translating
    /// [`FlowEvent`]s into outgoing segments, application events, and
    /// (deferred) destruction.
    fn drive_flow(&mut self, id: FlowId, header: &TcpHeader, text: Message, now: Instant) -> Result<(), EngineError> {
        if self.flows.get(&id).map(|f| f.state == crate::state::State::SynSent).unwrap_or(false) {
            self.handle_synsent_mptcp_option(id, header)?;
        }

        let events = {
            let flow = self.flows.get_mut(&id).expect("checked by caller");
            flow.receive_segment(header, text)
        };

        let mut needs_ack = false;
        for event in events {
            match event {
                FlowEvent::Established => {
                    self.on_established(id, now)?;
                }
                FlowEvent::DataAvailable => {
                    self.events.insert(EngineEvent::Readable(id));
                }
                FlowEvent::PeerClosed => {
                    self.events.insert(EngineEvent::Close(id));
                }
                FlowEvent::Reset => {
                    self.events.insert(EngineEvent::Error(id));
                }
                FlowEvent::ClosedAndRemovable => {
                    self.destroy_list.push(id);
                }
                FlowEvent::ScheduleImmediateAck | FlowEvent::ScheduleAggregatedAck => {
                    needs_ack = true;
                }
                FlowEvent::MptcpDataMapped { dsn, sub_seq, len, data_fin } => {
                    self.copy_into_master(id, dsn, sub_seq, len, data_fin);
                }
            }
        }

        self.flush_flow(id, now);
        if needs_ack {
            self.send_bare_ack(id);
        }
        self.reap_destroyed();
        Ok(())
    }

    /// Runs the bookkeeping §4.6/§4.7 attach to a flow's first transition
    /// into ESTABLISHED: finalizing an MCB, queuing the flow onto its
    /// listener's accept queue, registering the subflow (master or join),
    /// and, for a freshly completed master, latching the MP_JOIN initiator.
    fn on_established(&mut self, id: FlowId, now: Instant) -> Result<(), EngineError> {
        let pending = self.pending_handshakes.remove(&id);
        let mut is_master = false;
        if let Some(pending) = pending {
            if pending.is_join {
                self.finish_join_subflow(id, pending)?;
            } else if let (Some(my_key), Some(peer_key)) = (pending.my_key, pending.peer_key) {
                // Passive side: MP_CAPABLE ACK already matched against the
                // MCB created at LISTEN time; nothing further to do besides
                // leaving the token attached (handle_listen_mptcp_option did
                // the MCB creation already). Active side reaches here too,
                // for the SYN-SENT -> ESTABLISHED path; it must create its
                // own MCB now since none exists yet.
                if self.flows.get(&id).and_then(|f| f.mcb_token).is_none() {
                    let mcb = MasterControlBlock::new(my_key, peer_key, Role::Active);
                    let token = self.mptcp.insert(mcb)?;
                    if let Some(flow) = self.flows.get_mut(&id) {
                        flow.mcb_token = Some(token);
                    }
                }
                is_master = true;
            }
        }

        if is_master {
            if let Some(token) = self.flows.get(&id).and_then(|f| f.mcb_token) {
                if let Some(mcb) = self.mptcp.get_mut(token) {
                    mcb.add_subflow(id)?;
                }
                self.maybe_initiate_join(token, now)?;
            }
        }

        // A freshly ESTABLISHED passive-open flow belongs on its
        // listener's accept queue.
        if let Some(listener) = self.listeners.get_mut(&id.local.port) {
            listener.backlog.push_back(id);
            self.events.insert(EngineEvent::Accept(Socket { address: id.local.address, port: id.local.port }));
        }
        Ok(())
    }

    /// Latches and fires the MP_JOIN initiator (§4.7) the first time a
    /// master connection reaches ESTABLISHED.
    fn maybe_initiate_join(&mut self, token: u32, now: Instant) -> Result<(), EngineError> {
        let should_initiate = self
            .mptcp
            .get_mut(token)
            .map(|mcb| mcb.mark_join_initiated())
            .unwrap_or(false);
        if should_initiate {
            self.connect_join(token, now)?;
        }
        Ok(())
    }

    fn finish_join_subflow(&mut self, id: FlowId, pending: PendingMptcpHandshake) -> Result<(), EngineError> {
        let Some(token) = self.flows.get(&id).and_then(|f| f.mcb_token) else {
            return Ok(());
        };
        let Some(mcb) = self.mptcp.get_mut(token) else {
            return Err(MptcpError::UnknownToken.into());
        };
        mcb.add_subflow(id)?;
        let _ = pending;
        Ok(())
    }

    fn copy_into_master(&mut self, id: FlowId, dsn: u32, sub_seq: u32, len: u16, data_fin: bool) {
        let Some(token) = self.flows.get(&id).and_then(|f| f.mcb_token) else {
            warn!(?id, "DSS mapping on a flow with no attached master control block");
            return;
        };
        let Some(flow) = self.flows.get_mut(&id) else { return };
        let subflow_recv = flow.recv_buffer_mut();
        let Some(mcb) = self.mptcp.get_mut(token) else { return };
        let advanced = mcb.copy_from_subflow(subflow_recv, dsn, sub_seq, len, data_fin);
        if advanced > 0 {
            debug!(token, advanced, "copied subflow bytes into master stream");
        }
    }

    /// Builds whatever segments the flow's own state wants sent (data,
    /// retransmits, FIN), attaching a pending MPTCP handshake option if
    /// one is queued.
    fn flush_flow(&mut self, id: FlowId, _now: Instant) {
        let Some(flow) = self.flows.get_mut(&id) else { return };
        let segments = flow.segments_to_send(id.local.address, id.remote.address);
        for segment in segments {
            self.outgoing.push(WireSegment {
                src: id.local.address,
                dst: id.remote.address,
                header: segment.header,
                text: segment.text,
            });
        }
    }

    /// Builds the bare ACK a `Schedule*Ack` event asked for: current
    /// `SND.NXT`/`RCV.NXT`, no payload, consuming any one-shot pending
    /// MPTCP option (the handshake-completing MP_CAPABLE ACK, or a join's
    /// HMAC ACK).
    fn send_bare_ack(&mut self, id: FlowId) {
        let Some(flow) = self.flows.get_mut(&id) else { return };
        let mut builder = TcpHeaderBuilder::new(id.local.port, id.remote.port, flow.snd_nxt(), 65535)
            .ack(flow.rcv_nxt());
        if let Some(option) = flow.take_pending_mptcp_option() {
            builder = builder.mptcp(option);
        }
        let text = Message::new(Vec::new());
        let header = builder.build(&text, id.local.address, id.remote.address);
        self.outgoing.push(WireSegment {
            src: id.local.address,
            dst: id.remote.address,
            header,
            text,
        });
    }

    /// Advances every flow's timers by one tick, draining whatever events
    /// that produces. This is the cooperative poll loop's second half
    /// (§5): called once per iteration after a batch of segments has been
    /// submitted.
    pub fn poll(&mut self, now: Instant) {
        let ids: Vec<FlowId> = self.flows.keys().copied().collect();
        for id in ids {
            let events = {
                let Some(flow) = self.flows.get_mut(&id) else { continue };
                flow.poll(now, self.config.idle_timeout())
            };
            for event in events {
                match event {
                    FlowEvent::Reset => {
                        self.events.insert(EngineEvent::Error(id));
                    }
                    FlowEvent::ClosedAndRemovable => {
                        self.destroy_list.push(id);
                    }
                    _ => {}
                }
            }
            self.flush_flow(id, now);
        }
        self.reap_destroyed();
    }

    /// Removes every flow queued for destruction since the last drain.
    /// §5: a destroy queued mid-handler is never acted on until the
    /// handler (or poll iteration) returns, which is exactly what
    /// deferring to this single post-pass guarantees.
    fn reap_destroyed(&mut self) {
        for id in self.destroy_list.drain(..) {
            if let Some(flow) = self.flows.remove(&id) {
                if let Some(token) = flow.mcb_token {
                    if let Some(mcb) = self.mptcp.get_mut(token) {
                        mcb.subflows.retain(|s| *s != id);
                        if mcb.subflows.is_empty() {
                            self.mptcp.remove(token);
                        }
                    }
                }
            }
            self.pending_handshakes.remove(&id);
        }
    }
}

/// The number of sequence numbers a bare control segment (no payload)
/// consumes, for building the ACK field of a standalone RST response.
fn header_seq_consumed(header: &TcpHeader) -> u32 {
    header.ctl.syn() as u32 + header.ctl.fin() as u32
}

fn generate_iss() -> u32 {
    rand::random()
}

/// A source port for a locally-initiated subflow, drawn from the dynamic
/// range (RFC 6335 §6).
fn ephemeral_port() -> u16 {
    49152 + (rand::random::<u16>() % (65535 - 49152))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::TcpHeaderBuilder;

    fn config() -> Config {
        Config {
            interfaces: vec![Ipv4Address::LOCALHOST],
            worker_count: 1,
            sack_enabled: true,
            timestamps_enabled: true,
            idle_timeout_secs: 600,
            secondary_source_address: Ipv4Address::LOCALHOST,
        }
    }

    #[test]
    fn passive_handshake_reaches_accept_queue() {
        let mut engine = Engine::new(config());
        engine.listen(80, None);

        let client = Socket { address: Ipv4Address::LOCALHOST, port: 4000 };
        let server = Socket { address: Ipv4Address::LOCALHOST, port: 80 };

        let syn = TcpHeaderBuilder::new(client.port, server.port, 0x1000, 4096)
            .syn()
            .build(&Message::new(Vec::new()), client.address, server.address);
        let bytes = syn.serialize();
        engine
            .submit_segment(0, Instant::now(), client.address, server.address, &bytes, false)
            .unwrap();

        let outgoing = engine.take_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert!(outgoing[0].header.ctl.syn() && outgoing[0].header.ctl.ack());

        let id = FlowId { local: server, remote: client };
        let synack = &outgoing[0].header;
        let ack = TcpHeaderBuilder::new(client.port, server.port, 0x1001, 4096)
            .ack(synack.seq.wrapping_add(1))
            .build(&Message::new(Vec::new()), client.address, server.address);
        let bytes = ack.serialize();
        engine
            .submit_segment(0, Instant::now(), client.address, server.address, &bytes, false)
            .unwrap();

        assert!(engine.flow(id).is_some());
        assert_eq!(engine.flow(id).unwrap().state, crate::state::State::Established);
        assert_eq!(engine.accept(80), Some(id));
        assert!(engine.take_events().contains(&EngineEvent::Accept(server)));
    }

    #[test]
    fn unmatched_segment_to_unbound_port_draws_a_standalone_rst() {
        let mut engine = Engine::new(config());
        let client = Socket { address: Ipv4Address::LOCALHOST, port: 4000 };
        let server = Socket { address: Ipv4Address::LOCALHOST, port: 81 };
        let syn = TcpHeaderBuilder::new(client.port, server.port, 0x2000, 4096)
            .syn()
            .build(&Message::new(Vec::new()), client.address, server.address);
        let bytes = syn.serialize();
        let result = engine.submit_segment(0, Instant::now(), client.address, server.address, &bytes, false);
        assert!(result.is_err());
        let outgoing = engine.take_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert!(outgoing[0].header.ctl.rst());
    }

    #[test]
    fn active_mptcp_connect_queues_mp_capable_syn() {
        let mut engine = Engine::new(config());
        let local = Socket { address: Ipv4Address::LOCALHOST, port: 5000 };
        let remote = Socket { address: Ipv4Address::new([10, 0, 0, 2]), port: 80 };
        let id = engine.connect(local, remote, true).unwrap();
        engine.flush_flow(id, Instant::now());
        let outgoing = engine.take_outgoing();
        assert_eq!(outgoing.len(), 1);
        assert!(matches!(outgoing[0].header.options.mptcp, Some(MptcpOption::Capable { .. })));
    }
}
