//! A small client for the provider socket, used by integration tests and
//! by anything that wants to poke the mock from another process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use stubvault_core::proto::{MountRequest, MountResponse, Request, Response, VersionResponse};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side failures. Provider-reported errors keep their wire code so
/// callers can assert on the specific kind, not a generic failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (connect, framing, socket gone).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The provider answered with an error envelope.
    #[error("provider error {code}: {message}")]
    Provider { code: String, message: String },

    /// The provider's response could not be decoded.
    #[error("invalid provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// Wire code of a provider-reported error, if that is what this is.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Provider { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Connects per call; the provider protocol is strictly request/response.
pub struct ProviderClient {
    socket_path: PathBuf,
}

impl ProviderClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a raw request frame and return the decoded response envelope.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Response, ClientError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connection timed out: {}", self.socket_path.display()),
                )
            })?
            .map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!(
                        "{e} (is stubvaultd running? expected socket at {})",
                        self.socket_path.display()
                    ),
                )
            })?;

        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(stubvault_core::MAX_FRAME_LENGTH)
            .new_codec();
        let mut framed = Framed::new(stream, codec);

        let req = Request {
            id: 1,
            method: method.to_string(),
            params,
        };
        debug!(method, "sending request to provider");
        let out = serde_json::to_vec(&req)?;
        framed.send(Bytes::from(out)).await.map_err(ClientError::Io)?;

        let Some(frame) = framed.next().await else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no response from provider",
            )
            .into());
        };
        let frame = frame.map_err(ClientError::Io)?;

        Ok(serde_json::from_slice::<Response>(&frame)?)
    }

    /// Issue a mount call.
    pub async fn mount(&self, request: &MountRequest) -> Result<MountResponse, ClientError> {
        let params = serde_json::to_value(request)?;
        let resp = self.call("mount", params).await?;
        Self::decode_result(resp)
    }

    /// Query provider identification.
    pub async fn version(&self) -> Result<VersionResponse, ClientError> {
        let resp = self.call("version", serde_json::Value::Null).await?;
        Self::decode_result(resp)
    }

    fn decode_result<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
        let result = resp.into_result().map_err(|e| ClientError::Provider {
            code: e.code,
            message: e.message,
        })?;
        Ok(serde_json::from_value(result)?)
    }
}
