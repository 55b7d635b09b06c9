//! A userspace TCP/MPTCP receive-path engine: per-connection state
//! machines, reassembly, and loss recovery, decoupled from packet I/O and
//! the event loop that drives it.
//!
//! # Organization
//!
//! The engine is layered bottom-up:
//! - [`seq`] and [`header`] are the wire-level primitives: modular
//!   sequence arithmetic, the Internet checksum, and the TCP/MPTCP option
//!   codec.
//! - [`recv_buffer`], [`send_buffer`], [`rtt`], [`sack`], and
//!   [`congestion`] are the per-direction building blocks a flow is made
//!   of.
//! - [`flow`] is the per-4-tuple RFC 9293 state machine, driving all of
//!   the above.
//! - [`mptcp`] aggregates one or more [`flow::Flow`]s into a single
//!   ordered byte stream per RFC 8684.
//! - [`engine`] owns the flow table, the listener directory, and the
//!   poll-driven loop that ties everything to a packet I/O layer and an
//!   application event stream.
//!
//! [`config`] loads the on-disk configuration, and [`logging`] wires up
//! structured tracing output; [`error`] collects every error type the
//! above produce.

pub mod congestion;
pub mod error;
pub mod flow;
pub mod header;
pub mod ipv4_addr;
pub mod message;
pub mod mptcp;
pub mod rtt;
pub mod sack;
pub mod recv_buffer;
pub mod send_buffer;
pub mod seq;
pub mod state;

pub mod cli;
pub mod config;
pub mod engine;
pub mod logging;

pub use cli::parse_cli;
pub use config::Config;
pub use engine::Engine;
pub use error::EngineError;
pub use flow::{Flow, FlowId, Socket};
pub use ipv4_addr::Ipv4Address;
pub use message::Message;
