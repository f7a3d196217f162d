//! Socket server
//!
//! `CommServer` owns the Unix listener. Each accepted connection gets a
//! reader task and a writer task; decoded requests are forwarded to the
//! dispatch side as [`RequestEnvelope`]s over a single mpsc channel, and
//! every signal published through [`CommServer::signals`] is fanned out
//! to all connected clients.

use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cirrus_core::{ExitCause, ExitCode, ExitInfo};

use crate::codec::{read_frame, write_frame, Frame};
use crate::protocol::{Reply, Request, Signal};
use crate::IpcError;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const SIGNAL_CHANNEL_CAPACITY: usize = 256;
const WRITE_CHANNEL_CAPACITY: usize = 64;

/// A decoded request paired with the channel its reply must go down.
#[derive(Debug)]
pub struct RequestEnvelope {
    pub request: Request,
    pub reply: oneshot::Sender<Reply>,
}

/// The daemon's end of the local socket.
pub struct CommServer {
    listener: UnixListener,
    socket_path: PathBuf,
    request_tx: mpsc::Sender<RequestEnvelope>,
    signal_tx: broadcast::Sender<Signal>,
}

impl CommServer {
    /// Binds the socket and returns the server plus the request stream the
    /// dispatch task consumes. A stale socket file from a previous run is
    /// removed first.
    ///
    /// # Errors
    /// Returns `IpcError::Io` when the socket cannot be bound.
    pub fn bind(socket_path: &Path) -> Result<(Self, mpsc::Receiver<RequestEnvelope>), IpcError> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (signal_tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);

        info!(socket = %socket_path.display(), "IPC socket bound");

        Ok((
            Self {
                listener,
                socket_path: socket_path.to_path_buf(),
                request_tx,
                signal_tx,
            },
            request_rx,
        ))
    }

    /// Sender used to publish signals to every connected client.
    pub fn signals(&self) -> broadcast::Sender<Signal> {
        self.signal_tx.clone()
    }

    /// Accept loop. Runs until the token is cancelled, then removes the
    /// socket file.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            debug!("IPC client connected");
                            let request_tx = self.request_tx.clone();
                            let signal_rx = self.signal_tx.subscribe();
                            let conn_cancel = cancel.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, request_tx, signal_rx, conn_cancel).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "IPC accept failed");
                        }
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Socket file removal failed");
        }
        info!("IPC server stopped");
    }
}

async fn handle_connection(
    stream: UnixStream,
    request_tx: mpsc::Sender<RequestEnvelope>,
    mut signal_rx: broadcast::Receiver<Signal>,
    cancel: CancellationToken,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (write_tx, mut write_rx) = mpsc::channel::<Frame>(WRITE_CHANNEL_CAPACITY);

    // Writer task: the single place this connection's stream is written.
    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                frame = write_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        debug!(error = %e, "IPC write failed, dropping connection");
                        break;
                    }
                }
            }
        }
    });

    // Signal fan-out into the writer channel.
    let signal_write_tx = write_tx.clone();
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = signal_cancel.cancelled() => break,
                received = signal_rx.recv() => {
                    let signal = match received {
                        Ok(signal) => signal,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "IPC client lagging, signals dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };
                    let frame = match signal.encode() {
                        Ok((op, params)) => Frame::Signal { op, params },
                        Err(e) => {
                            warn!(error = %e, "Signal encoding failed");
                            continue;
                        }
                    };
                    if signal_write_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read loop on this task.
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_frame(&mut reader) => read,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("IPC client disconnected");
                break;
            }
            Err(e) => {
                debug!(error = %e, "IPC read failed, dropping connection");
                break;
            }
        };

        let Frame::Request { id, op, params } = frame else {
            // Clients only send requests; anything else is a protocol
            // violation.
            debug!("Unexpected frame kind from client, dropping connection");
            break;
        };

        let request = match Request::decode(op, params) {
            Ok(request) => request,
            Err(e) => {
                warn!(op, error = %e, "Rejecting request");
                let reply = Reply::error(ExitInfo::new(ExitCode::InvalidOperation, ExitCause::Unknown));
                let frame = Frame::Reply {
                    id,
                    exit: reply.exit,
                    result: reply.result,
                };
                if write_tx.send(frame).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = RequestEnvelope {
            request,
            reply: reply_tx,
        };
        if request_tx.send(envelope).await.is_err() {
            // Dispatch side is gone; nothing useful left to do.
            break;
        }

        // Forward the reply without blocking the read loop.
        let reply_write_tx = write_tx.clone();
        tokio::spawn(async move {
            let reply = match reply_rx.await {
                Ok(reply) => reply,
                Err(_) => Reply::error(ExitInfo::new(ExitCode::SystemError, ExitCause::Unknown)),
            };
            let frame = Frame::Reply {
                id,
                exit: reply.exit,
                result: reply.result,
            };
            let _ = reply_write_tx.send(frame).await;
        });
    }

    drop(write_tx);
    signal_task.abort();
    let _ = writer_task.await;
}
