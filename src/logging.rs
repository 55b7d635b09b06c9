//! Structured tracing output for the engine.
//!
//! Each function wraps a `tracing::event!` call so the call sites in
//! [`crate::engine`] stay free of formatting noise. Events are emitted as
//! JSON to a timestamped file under `./logs` rather than the terminal,
//! since the engine runs headless per worker.

use std::fs::{create_dir_all, OpenOptions};
use std::sync::Arc;

use tracing::{event, Level};
use tracing_subscriber::FmtSubscriber;

use crate::engine::EngineEvent;
use crate::flow::FlowId;
use crate::ipv4_addr::Ipv4Address;

/// Initializes the global tracing subscriber. Only should be called once,
/// at worker startup. Writes JSON-formatted events to a log file under
/// `./logs`; during `cargo test` no subscriber is installed and these
/// calls are no-ops.
pub fn init_events() {
    let main_path = "./logs";
    if let Err(error) = create_dir_all(main_path) {
        panic!("Error: {:?}", error);
    }
    let file_path = format!(
        "{}/debug-{}.log",
        main_path,
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    );
    let file = OpenOptions::new()
        .write(true)
        .append(true)
        .create(true)
        .open(file_path);
    let file = match file {
        Ok(file) => file,
        Err(error) => panic!("Error: {:?}", error),
    };
    let subscriber = FmtSubscriber::builder()
        .with_writer(Arc::new(file))
        .json()
        .finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        println!("{:?}", error);
    }
}

fn fmt_flow(id: FlowId) -> String {
    format!(
        "{:?}:{}<->{:?}:{}",
        id.local.address.to_bytes(),
        id.local.port,
        id.remote.address.to_bytes(),
        id.remote.port
    )
}

/// Logs an inbound segment reaching [`crate::engine::Engine::submit_segment`].
pub fn segment_received_event(src: Ipv4Address, dst: Ipv4Address, src_port: u16, dst_port: u16, len: usize) {
    event!(
        target: "SEGMENT_RECEIVED",
        Level::INFO,
        src = format!("{:?}", src.to_bytes()),
        dst = format!("{:?}", dst.to_bytes()),
        src_port = src_port,
        dst_port = dst_port,
        len = len,
    );
}

/// Logs an outbound segment queued by [`crate::engine::Engine::take_outgoing`].
pub fn segment_sent_event(flow: FlowId, flags: String, len: usize) {
    event!(
        target: "SEGMENT_SENT",
        Level::INFO,
        flow = fmt_flow(flow),
        flags = flags,
        len = len,
    );
}

/// Logs a flow's state machine transition.
pub fn flow_transition_event(flow: FlowId, from: &str, to: &str) {
    event!(
        target: "FLOW_TRANSITION",
        Level::INFO,
        flow = fmt_flow(flow),
        from = from,
        to = to,
    );
}

/// Logs an application-facing event raised on a flow or listener socket.
pub fn engine_event(event: EngineEvent) {
    match event {
        EngineEvent::Readable(id) => {
            tracing::event!(target: "ENGINE_EVENT", Level::INFO, kind = "readable", flow = fmt_flow(id));
        }
        EngineEvent::Writable(id) => {
            tracing::event!(target: "ENGINE_EVENT", Level::INFO, kind = "writable", flow = fmt_flow(id));
        }
        EngineEvent::Error(id) => {
            tracing::event!(target: "ENGINE_EVENT", Level::WARN, kind = "error", flow = fmt_flow(id));
        }
        EngineEvent::Close(id) => {
            tracing::event!(target: "ENGINE_EVENT", Level::INFO, kind = "close", flow = fmt_flow(id));
        }
        EngineEvent::Accept(socket) => {
            tracing::event!(
                target: "ENGINE_EVENT",
                Level::INFO,
                kind = "accept",
                address = format!("{:?}", socket.address.to_bytes()),
                port = socket.port,
            );
        }
    }
}

/// Logs an MPTCP master control block reaching the established state.
pub fn mptcp_established_event(token: u32, subflow: FlowId) {
    event!(
        target: "MPTCP_ESTABLISHED",
        Level::INFO,
        token = format!("{:#010x}", token),
        subflow = fmt_flow(subflow),
    );
}
