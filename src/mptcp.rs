//! The MPTCP Master Control Block (MCB) and subflow coupler (C7).
//!
//! An MCB turns one or more TCP subflows into a single ordered byte stream.
//! It owns a virtual "master" flow that carries the data-level sequence
//! space (the numbers DSS options talk about) and is never itself driven by
//! a 4-tuple's segments directly — only by [`MasterControlBlock::copy_from_subflow`]
//! reaching in from whichever subflow just reassembled a DSS-mapped range.
//!
//! Per-subflow back-pointers are deliberately *not* `&MasterControlBlock`:
//! a [`crate::flow::Flow`] stores only the 32-bit token (see
//! `Flow::mcb_token`), and the engine's [`MptcpDirectory`] is the sole owner
//! of every MCB, looked up by token on each access. This avoids a cyclic
//! subflow↔master reference inside a single-threaded arena.

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::error::MptcpError;
use crate::flow::FlowId;
use crate::recv_buffer::{Reader, RecvBuffer};
use crate::send_buffer::SendBuffer;
use crate::seq::{mod_le, mod_leq};

/// The most subflows a single MCB may accumulate, per §3.
pub const MAX_SUBFLOWS: usize = 10;

/// Which side of the original MP_CAPABLE handshake this host played,
/// needed to derive the connection's token the way §9/S2 resolve it: the
/// token is always `Token(key)` of whichever side *accepted* the
/// connection, since that is the side a future MP_JOIN's directory lookup
/// must land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This host answered the passive OPEN (ran the LISTEN handler).
    Passive,
    /// This host initiated the connection.
    Active,
}

/// Computes `SHA-1(be64(key))`, the basis for both the token and the IDSN.
fn key_digest(key: u64) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(key.to_be_bytes());
    hasher.finalize().into()
}

/// `Token(key)`: the first four bytes of `SHA-1(be64(key))`, big-endian.
pub fn token_of(key: u64) -> u32 {
    let digest = key_digest(key);
    u32::from_be_bytes(digest[0..4].try_into().unwrap())
}

/// `IDSN(key)`: the last four bytes of `SHA-1(be64(key))`, big-endian.
pub fn idsn_of(key: u64) -> u32 {
    let digest = key_digest(key);
    u32::from_be_bytes(digest[16..20].try_into().unwrap())
}

/// Generates a fresh 64-bit connection key. Called once per MCB, on
/// MP_CAPABLE completion.
pub fn generate_key() -> u64 {
    rand::random()
}

/// Generates a fresh 32-bit MP_JOIN nonce.
pub fn generate_random() -> u32 {
    rand::random()
}

fn hmac_sha1(key_first: u64, key_second: u64, msg_first: u32, msg_second: u32) -> [u8; 20] {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&key_first.to_be_bytes());
    key.extend_from_slice(&key_second.to_be_bytes());
    let mut msg = Vec::with_capacity(8);
    msg.extend_from_slice(&msg_first.to_be_bytes());
    msg.extend_from_slice(&msg_second.to_be_bytes());

    let mut mac = Hmac::<Sha1>::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(&msg);
    mac.finalize().into_bytes().into()
}

/// Computes the SYN-ACK's truncated (8-byte) HMAC, as the responder does:
/// `HMAC-SHA1(key_responder ‖ key_initiator, rand_responder ‖ rand_initiator)`,
/// keeping only the high 64 bits.
pub fn join_synack_hmac(
    key_responder: u64,
    key_initiator: u64,
    rand_responder: u32,
    rand_initiator: u32,
) -> [u8; 8] {
    let full = hmac_sha1(key_responder, key_initiator, rand_responder, rand_initiator);
    full[0..8].try_into().unwrap()
}

/// Computes the ACK's full (20-byte) HMAC, as the initiator does:
/// `HMAC-SHA1(key_initiator ‖ key_responder, rand_initiator ‖ rand_responder)`.
pub fn join_ack_hmac(
    key_initiator: u64,
    key_responder: u64,
    rand_initiator: u32,
    rand_responder: u32,
) -> [u8; 20] {
    hmac_sha1(key_initiator, key_responder, rand_initiator, rand_responder)
}

/// Verifies a SYN-ACK's truncated HMAC, the way the active side resolves
/// the open question in §9: this host is the initiator, so it recomputes
/// the responder's formula and compares.
pub fn verify_join_synack_hmac(
    received: [u8; 8],
    key_responder: u64,
    key_initiator: u64,
    rand_responder: u32,
    rand_initiator: u32,
) -> bool {
    join_synack_hmac(key_responder, key_initiator, rand_responder, rand_initiator) == received
}

/// Verifies an ACK's full HMAC, the way the passive side (which just sent
/// the SYN-ACK) checks the join's third packet.
pub fn verify_join_ack_hmac(
    received: [u8; 20],
    key_initiator: u64,
    key_responder: u64,
    rand_initiator: u32,
    rand_responder: u32,
) -> bool {
    join_ack_hmac(key_initiator, key_responder, rand_initiator, rand_responder) == received
}

const MASTER_BUFFER_SIZE: usize = 256 * 1024;

/// The per-association state that aggregates subflows into one byte
/// stream, keyed in the engine's [`MptcpDirectory`] by `token`.
pub struct MasterControlBlock {
    pub token: u32,
    pub my_key: u64,
    pub peer_key: u64,
    pub my_idsn: u32,
    pub peer_idsn: u32,

    /// The data-level reassembly buffer: the single ordered stream every
    /// subflow's DSS-mapped payload is copied into.
    master_recv: RecvBuffer,
    /// The data-level send buffer, retired by cumulative DATA_ACKs the way
    /// a subflow's send buffer is retired by subflow ACKs.
    master_send: SendBuffer,
    seen_data_fin: bool,

    pub subflows: Vec<FlowId>,
    /// Set once the engine has enqueued the MP_JOIN connect for the
    /// second subflow, so it is never enqueued twice (§4.7).
    join_initiated: bool,
}

impl MasterControlBlock {
    /// Creates the MCB once MP_CAPABLE has completed, deriving `token` per
    /// [`Role`] (see the module docs and `DESIGN.md` for why the token is
    /// always the *passive* side's key, regardless of which host is
    /// building this MCB).
    pub fn new(my_key: u64, peer_key: u64, role: Role) -> Self {
        let my_idsn = idsn_of(my_key);
        let peer_idsn = idsn_of(peer_key);
        let passive_key = match role {
            Role::Passive => my_key,
            Role::Active => peer_key,
        };
        let token = token_of(passive_key);
        // The master stream starts wherever IDSN says it does; for the
        // side that generated my_key, the data stream it sends starts at
        // my_idsn+1 and the stream it receives starts at peer_idsn+1.
        Self {
            token,
            my_key,
            peer_key,
            my_idsn,
            peer_idsn,
            master_recv: RecvBuffer::new(MASTER_BUFFER_SIZE, peer_idsn.wrapping_add(1)),
            master_send: SendBuffer::new(my_idsn.wrapping_add(1)),
            seen_data_fin: false,
            subflows: Vec::new(),
            join_initiated: false,
        }
    }

    /// The data-level `RCV.NXT`, including the one-sequence-number bias a
    /// DATA_FIN contributes exactly once (invariant 7 in §3).
    pub fn data_rcv_nxt(&self) -> u32 {
        self.master_recv
            .engine_nxt()
            .wrapping_add(self.seen_data_fin as u32)
    }

    pub fn data_snd_una(&self) -> u32 {
        self.master_send.una()
    }

    pub fn data_snd_nxt(&self) -> u32 {
        self.master_send.nxt()
    }

    pub fn has_data_fin(&self) -> bool {
        self.seen_data_fin
    }

    /// Reads (and drains) application bytes from the master stream.
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        self.master_recv.remove(max, Reader::App)
    }

    pub fn readable_len(&self) -> usize {
        self.master_recv.ready_len()
    }

    /// Queues application bytes for the data-level send buffer; subflow
    /// segmentation of this buffer is an engine-level concern (§4.7
    /// doesn't require scheduling more than one subflow carries data in
    /// this spec's scope, so callers keep a reference to which subflow
    /// sends).
    pub fn enqueue_send(&mut self, data: &[u8]) {
        self.master_send.enqueue(data);
    }

    /// Applies a cumulative DATA_ACK the way a subflow's own ACK retires
    /// its send buffer (§4.7).
    pub fn on_data_ack(&mut self, data_ack: u32) -> Option<usize> {
        self.master_send.on_ack(data_ack)
    }

    /// `CopyFromSubflowToMpcb`: copies a DSS-mapped byte range out of a
    /// subflow's own reassembly buffer into the master stream, then
    /// retires those bytes from the subflow (engine reader role) so the
    /// subflow's advertised window reopens.
    ///
    /// Must only be called once the subflow's own `RecvBuffer::accept` has
    /// already folded `[sub_seq, sub_seq+len)` into its contiguous run —
    /// i.e. right after a [`crate::flow::FlowEvent::MptcpDataMapped`].
    /// Silently makes no progress (rather than erroring) on a stale or
    /// out-of-window mapping, matching `ProcessTCPPayload`'s drop-styled
    /// handling of equivalent subflow-level cases.
    pub fn copy_from_subflow(
        &mut self,
        subflow_recv: &mut RecvBuffer,
        dsn: u32,
        sub_seq: u32,
        len: u16,
        data_fin: bool,
    ) -> usize {
        let len = len as usize;
        if len == 0 {
            if data_fin && !self.seen_data_fin {
                self.seen_data_fin = true;
            }
            return 0;
        }
        let seg_end = dsn.wrapping_add(len as u32);
        let rcv_nxt = self.data_rcv_nxt();
        if mod_leq(seg_end, rcv_nxt) {
            return 0;
        }
        let window_end = rcv_nxt.wrapping_add(self.master_recv.window() as u32);
        if !mod_le(dsn, window_end) {
            return 0;
        }
        let Some(bytes) = subflow_recv.peek(len) else {
            return 0;
        };
        if sub_seq != subflow_recv.head_seq() {
            // The mapping doesn't describe the bytes currently at the
            // front of the subflow buffer; nothing to copy yet.
            return 0;
        }
        let advanced = self.master_recv.accept(dsn, &bytes);
        if data_fin && !self.seen_data_fin {
            self.seen_data_fin = true;
        }
        subflow_recv.remove(len, Reader::Engine);
        advanced
    }

    /// Adds a subflow to the association, enforcing the `MAX_SUBFLOWS` cap.
    pub fn add_subflow(&mut self, id: FlowId) -> Result<(), MptcpError> {
        if self.subflows.len() >= MAX_SUBFLOWS {
            return Err(MptcpError::TooManySubflows);
        }
        self.subflows.push(id);
        Ok(())
    }

    /// Returns `true` the first time it's called for this MCB, and `false`
    /// on every call after — the latch that stops the engine from
    /// enqueueing more than one MP_JOIN connect (§4.7).
    pub fn mark_join_initiated(&mut self) -> bool {
        if self.join_initiated {
            return false;
        }
        self.join_initiated = true;
        true
    }

    pub fn is_join_initiated(&self) -> bool {
        self.join_initiated
    }
}

/// The per-worker token → MCB directory (§3, §9): never process-wide, owned
/// by whichever engine context is driving this worker's flows.
#[derive(Default)]
pub struct MptcpDirectory {
    table: HashMap<u32, MasterControlBlock>,
}

impl MptcpDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly created MCB. A token collision is a hard error;
    /// §4.7 specifies no recovery path for it.
    pub fn insert(&mut self, mcb: MasterControlBlock) -> Result<u32, MptcpError> {
        let token = mcb.token;
        if self.table.contains_key(&token) {
            return Err(MptcpError::TokenCollision);
        }
        self.table.insert(token, mcb);
        Ok(token)
    }

    pub fn get(&self, token: u32) -> Option<&MasterControlBlock> {
        self.table.get(&token)
    }

    pub fn get_mut(&mut self, token: u32) -> Option<&mut MasterControlBlock> {
        self.table.get_mut(&token)
    }

    pub fn remove(&mut self, token: u32) -> Option<MasterControlBlock> {
        self.table.remove(&token)
    }

    pub fn lookup(&self, token: u32) -> Result<&MasterControlBlock, MptcpError> {
        self.table.get(&token).ok_or(MptcpError::UnknownToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_and_idsn_use_opposite_halves_of_the_same_digest() {
        let key = 0x0102030405060708u64;
        let digest = key_digest(key);
        assert_eq!(token_of(key), u32::from_be_bytes(digest[0..4].try_into().unwrap()));
        assert_eq!(idsn_of(key), u32::from_be_bytes(digest[16..20].try_into().unwrap()));
    }

    #[test]
    fn join_hmac_round_trips_through_verification() {
        let key_r = 0x1112131415161718u64;
        let key_i = 0x0102030405060708u64;
        let rand_r = 0xdeadbeefu32;
        let rand_i = 0xaabbccddu32;

        let truncated = join_synack_hmac(key_r, key_i, rand_r, rand_i);
        assert!(verify_join_synack_hmac(truncated, key_r, key_i, rand_r, rand_i));
        assert!(!verify_join_synack_hmac(truncated, key_r, key_i, rand_r, rand_i.wrapping_add(1)));

        let full = join_ack_hmac(key_i, key_r, rand_i, rand_r);
        assert!(verify_join_ack_hmac(full, key_i, key_r, rand_i, rand_r));
        assert!(!verify_join_ack_hmac(full, key_i, key_r, rand_i, rand_r.wrapping_add(1)));
    }

    #[test]
    fn token_matches_the_passive_sides_key_regardless_of_who_builds_the_mcb() {
        let key_client = 0x0102030405060708u64;
        let key_server = 0x1112131415161718u64;

        let client_mcb = MasterControlBlock::new(key_client, key_server, Role::Active);
        let server_mcb = MasterControlBlock::new(key_server, key_client, Role::Passive);

        assert_eq!(client_mcb.token, token_of(key_server));
        assert_eq!(server_mcb.token, token_of(key_server));
        assert_eq!(client_mcb.token, server_mcb.token);
    }

    #[test]
    fn copy_from_subflow_advances_master_and_retires_subflow_bytes() {
        let mut mcb = MasterControlBlock::new(1, 2, Role::Passive);
        let start = mcb.data_rcv_nxt();

        let mut sub_recv = RecvBuffer::new(4096, 500);
        sub_recv.accept(500, b"hello");

        let advanced = mcb.copy_from_subflow(&mut sub_recv, start, 500, 5, false);
        assert_eq!(advanced, 5);
        assert_eq!(mcb.data_rcv_nxt(), start.wrapping_add(5));
        assert_eq!(sub_recv.ready_len(), 0);
    }

    #[test]
    fn data_fin_biases_rcv_nxt_exactly_once() {
        let mut mcb = MasterControlBlock::new(1, 2, Role::Passive);
        let start = mcb.data_rcv_nxt();
        let mut sub_recv = RecvBuffer::new(4096, 500);
        sub_recv.accept(500, b"ab");

        mcb.copy_from_subflow(&mut sub_recv, start, 500, 2, true);
        assert_eq!(mcb.data_rcv_nxt(), start.wrapping_add(3));

        // A further DSS-carrying segment with data_fin repeated must not
        // bias rcv_nxt a second time.
        let mut sub_recv2 = RecvBuffer::new(4096, 502);
        sub_recv2.accept(502, b"cd");
        mcb.copy_from_subflow(&mut sub_recv2, start.wrapping_add(2), 502, 2, true);
        assert_eq!(mcb.data_rcv_nxt(), start.wrapping_add(5));
    }

    #[test]
    fn subflow_cap_is_enforced() {
        let mut mcb = MasterControlBlock::new(1, 2, Role::Passive);
        for i in 0..MAX_SUBFLOWS {
            let id = FlowId {
                local: crate::flow::Socket {
                    address: crate::ipv4_addr::Ipv4Address::LOCALHOST,
                    port: 1000 + i as u16,
                },
                remote: crate::flow::Socket {
                    address: crate::ipv4_addr::Ipv4Address::LOCALHOST,
                    port: 2000,
                },
            };
            mcb.add_subflow(id).unwrap();
        }
        let overflow = FlowId {
            local: crate::flow::Socket {
                address: crate::ipv4_addr::Ipv4Address::LOCALHOST,
                port: 9999,
            },
            remote: crate::flow::Socket {
                address: crate::ipv4_addr::Ipv4Address::LOCALHOST,
                port: 2000,
            },
        };
        assert!(matches!(mcb.add_subflow(overflow), Err(MptcpError::TooManySubflows)));
    }
}
