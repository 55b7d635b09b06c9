//! The error taxonomy surfaced by the engine.
//!
//! Errors are split by the stage of processing that produced them: malformed
//! bytes never reach a flow's state machine, and an established flow never
//! produces a parse error. This mirrors how the engine itself is laid out
//! (codec, then per-flow processing, then the MPTCP coupler).

use thiserror::Error as ThisError;

/// Failure to decode a TCP segment header or its options.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum HeaderParseError {
    #[error("the segment is shorter than a bare TCP header")]
    HeaderTooShort,
    #[error("the data offset field claims a header shorter than the minimum 20 bytes")]
    InvalidDataOffset,
    #[error("the data offset field claims more bytes than the segment contains")]
    OptionsOverrun,
    #[error("an option's length field would read past the end of the options area")]
    OptionTooLong,
    #[error("an option's length field is shorter than the minimum for its kind")]
    OptionTooShort,
    #[error("the header checksum {expected:#06x} does not match the calculated checksum {actual:#06x}")]
    InvalidChecksum { actual: u16, expected: u16 },
}

/// Failure while decoding the kind-30 MPTCP option or one of its subtypes.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum MptcpOptionError {
    #[error("the MP_CAPABLE option has an unsupported version")]
    UnsupportedVersion,
    #[error("the MPTCP suboption length does not match its subtype's expected length")]
    BadSubOptionLength,
    #[error("an unrecognized MPTCP suboption subtype {0}")]
    UnknownSubtype(u8),
}

/// Errors produced while a flow is being driven through the state machine.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    #[error("the flow is not in a state that accepts this operation")]
    WrongState,
    #[error("the send buffer has no room for more application bytes")]
    SendBufferFull,
    #[error("the peer's reassembly buffer is full; cannot forward reassembled bytes")]
    ReceiveBufferFull,
    #[error("the flow has already been torn down")]
    Closed,
}

/// Errors produced by the Master Control Block / subflow coupler.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum MptcpError {
    #[error("no master control block is registered for this token")]
    UnknownToken,
    #[error("the MP_JOIN HMAC did not verify against the stored keys")]
    JoinAuthenticationFailed,
    #[error("a subflow attempted to join a master connection more than once")]
    DuplicateJoin,
    #[error("the master connection has reached its configured subflow limit")]
    TooManySubflows,
    #[error("a master control block already exists for this token")]
    TokenCollision,
}

/// Errors produced by the flow table and listener directory.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("a flow already exists for this 4-tuple")]
    ExistingFlow,
    #[error("no listener is registered for this local socket")]
    NoListener,
    #[error("no flow exists for this 4-tuple and no listener would accept it")]
    NoRoute,
}

/// The union of errors that can surface from a single call to
/// [`crate::engine::Engine::submit_segment`].
#[derive(Debug, ThisError)]
pub enum EngineError {
    #[error(transparent)]
    Header(#[from] HeaderParseError),
    #[error(transparent)]
    MptcpOption(#[from] MptcpOptionError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Mptcp(#[from] MptcpError),
    #[error(transparent)]
    Table(#[from] TableError),
}
