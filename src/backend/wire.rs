//! Backend wire contract.
//!
//! Every backend connection opens with one length-prefixed JSON frame
//! (4-byte big-endian length, then the document). A call connection sends
//! `Hello::Call` and receives exactly one `CallReply` frame. A sidechannel
//! connection sends `Hello::Sidechannel`; raw git bytes follow in both
//! directions with no further framing.

use std::fmt;
use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Upper bound on a single control frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub const UPLOAD_PACK_WITH_SIDECHANNEL: &str = "SmartHTTPService/PostUploadPackWithSidechannel";

/// Correlates one RPC call with its sidechannel connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SidechannelId(Uuid);

impl SidechannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SidechannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SidechannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sc-{}", self.0)
    }
}

/// Repository the backend should serve.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Repository {
    pub storage_name: String,
    pub relative_path: String,
}

/// Body of an upload-pack call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    pub repository: Repository,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_protocol: Option<String>,
    #[serde(default)]
    pub git_config_options: Vec<String>,
    pub sidechannel_id: SidechannelId,
}

/// First frame on every backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hello {
    Call(CallRequest),
    Sidechannel { sidechannel_id: SidechannelId },
}

/// Final answer to a call, sent once the sidechannel exchange is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallReply {
    Ok,
    Error { code: String, message: String },
}

/// Framing errors.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection closed before a complete frame")]
    Closed,

    #[error("frame of {0} bytes exceeds limit of {MAX_FRAME_LEN}")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Write one frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Reads exactly the frame, so raw bytes after it stay unread.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await.map_err(eof_as_closed)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    Ok(serde_json::from_slice(&payload)?)
}

fn eof_as_closed(err: io::Error) -> WireError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        WireError::Closed
    } else {
        WireError::Io(err)
    }
}
