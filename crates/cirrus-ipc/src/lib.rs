//! Cirrus IPC - the local wire protocol
//!
//! The presentation process talks to the daemon over a Unix domain socket.
//! Every message is a length-prefixed JSON frame; requests carry a numeric
//! opcode from a closed enumeration and every reply starts with the
//! `(ExitCode, ExitCause)` pair. Asynchronous signal frames push
//! out-of-band events to every connected client.
//!
//! ## Key Components
//!
//! - [`Request`] / [`Signal`] - the closed opcode enumerations
//! - [`codec`] - frame encoding (u32 big-endian length + JSON)
//! - [`CommServer`] - accept loop, request channel and signal fan-out
//! - [`CommClient`] - connection helper used by tests and tools

pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;

pub use client::CommClient;
pub use protocol::{Reply, Request, Signal};
pub use server::{CommServer, RequestEnvelope};

/// Errors that can occur on the IPC surface
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Socket setup or I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// A frame carried an opcode outside the closed enumeration
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u16),

    /// The peer or the dispatch side went away mid-request
    #[error("Connection closed")]
    ConnectionClosed,
}
