//! Connection helper
//!
//! Thin client over the socket, used by integration tests and command
//! line tooling. Requests are answered in order of completion; replies
//! are matched back to their request by frame id, and signal frames
//! received while waiting are buffered for [`CommClient::next_signal`].

use std::collections::VecDeque;
use std::path::Path;

use tokio::net::UnixStream;

use crate::codec::{read_frame, write_frame, Frame};
use crate::protocol::{Reply, Request, Signal};
use crate::IpcError;

pub struct CommClient {
    stream: UnixStream,
    next_id: u64,
    pending_signals: VecDeque<Signal>,
}

impl CommClient {
    /// Connects to the daemon's socket.
    ///
    /// # Errors
    /// Returns `IpcError::Io` when the socket is absent or refuses the
    /// connection.
    pub async fn connect(socket_path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self {
            stream,
            next_id: 1,
            pending_signals: VecDeque::new(),
        })
    }

    /// Sends one request and waits for its reply. Signals arriving in the
    /// meantime are buffered.
    ///
    /// # Errors
    /// Returns `IpcError::ConnectionClosed` if the server goes away before
    /// replying.
    pub async fn request(&mut self, request: &Request) -> Result<Reply, IpcError> {
        let id = self.next_id;
        self.next_id += 1;

        let (op, params) = request.encode()?;
        write_frame(&mut self.stream, &Frame::Request { id, op, params }).await?;

        loop {
            match read_frame(&mut self.stream).await? {
                None => return Err(IpcError::ConnectionClosed),
                Some(Frame::Reply { id: reply_id, exit, result }) if reply_id == id => {
                    return Ok(Reply { exit, result });
                }
                Some(Frame::Reply { .. }) => {
                    // Reply to a request this client no longer waits for.
                    continue;
                }
                Some(Frame::Signal { op, params }) => {
                    if let Ok(signal) = Signal::decode(op, params) {
                        self.pending_signals.push_back(signal);
                    }
                }
                Some(Frame::Request { .. }) => {
                    return Err(IpcError::Codec("Request frame from server".to_string()));
                }
            }
        }
    }

    /// Waits for the next signal, draining the buffer first.
    ///
    /// # Errors
    /// Returns `IpcError::ConnectionClosed` when the server shuts the
    /// connection down.
    pub async fn next_signal(&mut self) -> Result<Signal, IpcError> {
        if let Some(signal) = self.pending_signals.pop_front() {
            return Ok(signal);
        }
        loop {
            match read_frame(&mut self.stream).await? {
                None => return Err(IpcError::ConnectionClosed),
                Some(Frame::Signal { op, params }) => return Signal::decode(op, params),
                Some(_) => continue,
            }
        }
    }

    /// Sends a raw frame, bypassing the request enumeration. Test-side
    /// escape hatch for exercising the server's rejection paths.
    pub async fn send_raw(&mut self, frame: &Frame) -> Result<(), IpcError> {
        write_frame(&mut self.stream, frame).await
    }

    /// Reads one raw frame.
    pub async fn read_raw(&mut self) -> Result<Option<Frame>, IpcError> {
        read_frame(&mut self.stream).await
    }
}
