//! End-to-end socket tests: request/reply correlation, unknown-opcode
//! rejection and signal fan-out, all over a real Unix socket in a
//! temporary directory.

use tokio_util::sync::CancellationToken;

use cirrus_core::{ExitCause, ExitCode, ExitInfo};
use cirrus_ipc::codec::Frame;
use cirrus_ipc::{CommClient, CommServer, Reply, Request, RequestEnvelope, Signal};

struct Harness {
    _dir: tempfile::TempDir,
    socket_path: std::path::PathBuf,
    cancel: CancellationToken,
    signals: tokio::sync::broadcast::Sender<Signal>,
}

/// Starts a server whose dispatch side answers every request through
/// `handler`.
fn start_server<F>(handler: F) -> Harness
where
    F: Fn(&Request) -> Reply + Send + 'static,
{
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("cirrus.sock");
    let (server, mut request_rx) = CommServer::bind(&socket_path).unwrap();
    let signals = server.signals();
    let cancel = CancellationToken::new();

    tokio::spawn(server.run(cancel.clone()));
    tokio::spawn(async move {
        while let Some(RequestEnvelope { request, reply }) = request_rx.recv().await {
            let _ = reply.send(handler(&request));
        }
    });

    Harness {
        _dir: dir,
        socket_path,
        cancel,
        signals,
    }
}

#[tokio::test]
async fn test_request_gets_matching_reply() {
    let harness = start_server(|request| match request {
        Request::SyncStatus { sync_db_id } => Reply::ok(serde_json::json!({
            "sync_db_id": sync_db_id,
            "status": "idle",
        })),
        _ => Reply::error(ExitInfo::new(ExitCode::InvalidOperation, ExitCause::Unknown)),
    });

    let mut client = CommClient::connect(&harness.socket_path).await.unwrap();
    let reply = client
        .request(&Request::SyncStatus { sync_db_id: 42 })
        .await
        .unwrap();

    assert!(reply.exit.is_ok());
    assert_eq!(reply.result["sync_db_id"], 42);
    assert_eq!(reply.result["status"], "idle");

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_unknown_opcode_answered_with_invalid_operation() {
    let harness = start_server(|_| Reply::ok(serde_json::Value::Null));

    let mut client = CommClient::connect(&harness.socket_path).await.unwrap();
    client
        .send_raw(&Frame::Request {
            id: 5,
            op: 999,
            params: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let frame = client.read_raw().await.unwrap().unwrap();
    match frame {
        Frame::Reply { id, exit, .. } => {
            assert_eq!(id, 5);
            assert_eq!(exit.code, ExitCode::InvalidOperation);
        }
        other => panic!("expected reply frame, got {other:?}"),
    }

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_signal_fans_out_to_every_client() {
    let harness = start_server(|_| Reply::ok(serde_json::Value::Null));

    let mut first = CommClient::connect(&harness.socket_path).await.unwrap();
    let mut second = CommClient::connect(&harness.socket_path).await.unwrap();

    // A request forces both connections fully set up before publishing.
    first.request(&Request::SyncList).await.unwrap();
    second.request(&Request::SyncList).await.unwrap();

    harness
        .signals
        .send(Signal::SyncAdded { sync_db_id: 7 })
        .unwrap();

    assert_eq!(
        first.next_signal().await.unwrap(),
        Signal::SyncAdded { sync_db_id: 7 }
    );
    assert_eq!(
        second.next_signal().await.unwrap(),
        Signal::SyncAdded { sync_db_id: 7 }
    );

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_signals_buffered_while_waiting_for_reply() {
    let harness = start_server(|request| match request {
        Request::ErrorsClear { sync_db_id, .. } => Reply::ok(serde_json::json!({
            "sync_db_id": sync_db_id,
        })),
        _ => Reply::ok(serde_json::Value::Null),
    });

    let mut client = CommClient::connect(&harness.socket_path).await.unwrap();
    client.request(&Request::SyncList).await.unwrap();

    // Published before the next request goes out, so the signal frame can
    // arrive ahead of the reply.
    harness
        .signals
        .send(Signal::ErrorsCleared { sync_db_id: 3 })
        .unwrap();

    let reply = client
        .request(&Request::ErrorsClear {
            sync_db_id: 3,
            auto_resolved_only: false,
        })
        .await
        .unwrap();
    assert!(reply.exit.is_ok());

    assert_eq!(
        client.next_signal().await.unwrap(),
        Signal::ErrorsCleared { sync_db_id: 3 }
    );

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("cirrus.sock");
    std::fs::write(&socket_path, b"stale").unwrap();

    let (server, _request_rx) = CommServer::bind(&socket_path).unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(server.run(cancel.clone()));

    let client = CommClient::connect(&socket_path).await;
    assert!(client.is_ok());

    cancel.cancel();
}
