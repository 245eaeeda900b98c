//! Wire format for the persistent-connection protocol.
//!
//! Every message is a JSON-RPC 2.0 object in a length-prefixed frame:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Many request/response exchanges share one connection, one at a time.

use crate::config::RpcConfig;
use crate::error::{LogServiceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const INITIAL_FRAME_CAPACITY: usize = 8 * 1024;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: RpcConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    pub fn from_error(id: Option<Value>, err: &LogServiceError) -> Self {
        Self::error(id, err.to_rpc_error_code(), err.to_string())
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Read one frame, rejecting payloads larger than `max_len`.
///
/// Returns `None` on clean EOF at a frame boundary (peer closed).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(LogServiceError::FrameTooLarge { size: len, max: max_len });
    }

    // The buffer grows with the bytes that actually arrive, not the announced length.
    let mut payload = Vec::with_capacity(len.min(INITIAL_FRAME_CAPACITY));
    let read = AsyncReadExt::take(&mut *reader, len as u64)
        .read_to_end(&mut payload)
        .await?;
    if read < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("frame truncated after {} of {} bytes", read, len),
        )
        .into());
    }

    Ok(Some(payload))
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| LogServiceError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
