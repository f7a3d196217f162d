//! Frame codec
//!
//! Every message on the socket is one frame: a u32 big-endian payload
//! length followed by that many bytes of JSON. Three frame kinds share
//! the stream; replies are correlated to requests by id, signals carry
//! no id.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use cirrus_core::ExitInfo;

use crate::IpcError;

/// Upper bound on one frame's payload. Anything larger is a protocol
/// violation, not a legitimate message.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: u64,
        op: u16,
        #[serde(default)]
        params: serde_json::Value,
    },
    Reply {
        id: u64,
        exit: ExitInfo,
        #[serde(default)]
        result: serde_json::Value,
    },
    Signal {
        op: u16,
        #[serde(default)]
        params: serde_json::Value,
    },
}

/// Writes one frame.
///
/// # Errors
/// Returns `IpcError::Io` on transport failure and `IpcError::Codec` if
/// the frame cannot be serialized.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), IpcError> {
    let payload = serde_json::to_vec(frame).map_err(|e| IpcError::Codec(e.to_string()))?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(IpcError::Codec(format!("Frame too large: {len} bytes")));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean end of stream.
///
/// # Errors
/// Returns `IpcError::Io` on transport failure and `IpcError::Codec` for
/// an oversized or malformed payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, IpcError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(IpcError::Codec(format!("Frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let frame = serde_json::from_slice(&payload).map_err(|e| IpcError::Codec(e.to_string()))?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_core::{ExitCause, ExitCode};

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let frame = Frame::Request {
            id: 1,
            op: 31,
            params: serde_json::json!({"sync_db_id": 7}),
        };
        write_frame(&mut a, &frame).await.unwrap();

        let read = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(read, frame);
    }

    #[tokio::test]
    async fn test_reply_frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let frame = Frame::Reply {
            id: 9,
            exit: ExitInfo::new(ExitCode::DataError, ExitCause::NotFound),
            result: serde_json::Value::Null,
        };
        write_frame(&mut a, &frame).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap().unwrap(), frame);
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let (a, mut b) = tokio::io::duplex(1024);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN + 1).to_be_bytes();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = a.write_all(&len).await;
        });
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, IpcError::Codec(_)));
    }
}
