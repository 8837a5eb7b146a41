//! Server lifecycle and connection handling.
//!
//! A [`Server`] owns one Unix socket endpoint and one [`MountHandler`];
//! rotation state lives in the handler, so independent server instances
//! (e.g. in parallel tests) never share epochs. Lifecycle is
//! `Created -> Running -> Stopped`, with `Stopped` terminal.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use stubvault_core::error::MountError;
use stubvault_core::mount::MountHandler;
use stubvault_core::proto::{MountRequest, MountResponse, Request, Response, VersionResponse};
use stubvault_core::rotation::{EnvTrigger, RotationTrigger};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{info, warn};

/// How long `stop` waits for the accept loop and open connections to wind
/// down before abandoning them.
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by server construction, lifecycle, and call dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The bind endpoint is empty or uses an unsupported scheme.
    #[error("invalid endpoint {0:?}: expected a path or unix:// URI")]
    InvalidEndpoint(String),

    /// `start` was called on a server that already left the `Created` state.
    #[error("server already running")]
    AlreadyRunning,

    /// The socket endpoint could not be acquired.
    #[error("failed to bind {path}: {source}")]
    BindFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A call arrived before `start` or after `stop`.
    #[error("server not ready")]
    NotReady,

    /// The mount call itself failed; tracker state was not advanced.
    #[error(transparent)]
    Mount(#[from] MountError),
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

enum Lifecycle {
    Created,
    Running {
        shutdown_tx: watch::Sender<bool>,
        accept_task: JoinHandle<()>,
    },
    Stopped,
}

/// A mock secret provider bound to one Unix socket endpoint.
pub struct Server {
    socket: PathBuf,
    handler: Arc<MountHandler>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    active_connections: Arc<AtomicUsize>,
    /// Set once this instance has bound the socket file. An instance that
    /// never bound must not unlink another server's live socket.
    bound: AtomicBool,
}

impl Server {
    /// Construct a server with the environment-driven rotation trigger.
    ///
    /// `endpoint` is a filesystem path or a `unix://` URI.
    pub fn new(endpoint: &str) -> Result<Self, ServerError> {
        Self::with_trigger(endpoint, Arc::new(EnvTrigger))
    }

    /// Construct a server with an injected rotation trigger. Tests use this
    /// to drive rotation without touching the process environment.
    pub fn with_trigger(
        endpoint: &str,
        trigger: Arc<dyn RotationTrigger>,
    ) -> Result<Self, ServerError> {
        let socket = crate::socket::parse_endpoint(endpoint)
            .ok_or_else(|| ServerError::InvalidEndpoint(endpoint.to_owned()))?;
        Ok(Self {
            socket,
            handler: Arc::new(MountHandler::new(trigger)),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Created),
            active_connections: Arc::new(AtomicUsize::new(0)),
            bound: AtomicBool::new(false),
        })
    }

    /// The socket path this server binds.
    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket
    }

    /// Begin accepting and dispatching calls.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = self.bind().await?;
        self.bound.store(true, Ordering::SeqCst);
        info!("listening on {}", self.socket.display());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handler = self.handler.clone();
        let active = self.active_connections.clone();
        let accept_task = tokio::spawn(accept_loop(listener, handler, shutdown_rx, active));

        *lifecycle = Lifecycle::Running {
            shutdown_tx,
            accept_task,
        };
        Ok(())
    }

    /// Stop accepting calls and release the endpoint. Idempotent.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        let Lifecycle::Running {
            shutdown_tx,
            accept_task,
        } = previous
        else {
            return;
        };

        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(DRAIN_DEADLINE, accept_task)
            .await
            .is_err()
        {
            warn!("accept loop did not exit in time, abandoning it");
        }

        // Let in-flight connections finish, bounded.
        let drain_start = tokio::time::Instant::now();
        while self.active_connections.load(Ordering::SeqCst) > 0
            && drain_start.elapsed() < DRAIN_DEADLINE
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let remaining = self.active_connections.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!("{remaining} connections still active after drain deadline");
        }

        let _ = std::fs::remove_file(&self.socket);
        // The path may be rebound by a fresh server; this instance no
        // longer owns it.
        self.bound.store(false, Ordering::SeqCst);
        info!("stopped, released {}", self.socket.display());
    }

    /// Serve one mount call in-process.
    ///
    /// Fails with [`ServerError::NotReady`] outside the `Running` state,
    /// before any tracker state is touched.
    pub async fn mount(&self, request: &MountRequest) -> Result<MountResponse, ServerError> {
        self.ensure_running().await?;
        Ok(self.handler.mount(request)?)
    }

    /// Provider identification, the companion operation to `mount`.
    pub async fn version(&self) -> Result<VersionResponse, ServerError> {
        self.ensure_running().await?;
        Ok(version_payload())
    }

    async fn ensure_running(&self) -> Result<(), ServerError> {
        let lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running { .. } => Ok(()),
            Lifecycle::Created | Lifecycle::Stopped => Err(ServerError::NotReady),
        }
    }

    async fn bind(&self) -> Result<UnixListener, ServerError> {
        crate::socket::ensure_socket_parent_dir(&self.socket).map_err(|source| {
            ServerError::BindFailure {
                path: self.socket.clone(),
                source,
            }
        })?;

        if self.socket.exists() {
            match UnixStream::connect(&self.socket).await {
                Ok(_) => {
                    return Err(ServerError::BindFailure {
                        path: self.socket.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::AddrInUse,
                            "socket already in use",
                        ),
                    });
                }
                Err(_) => {
                    // Stale socket file.
                    let _ = std::fs::remove_file(&self.socket);
                }
            }
        }

        let listener =
            UnixListener::bind(&self.socket).map_err(|source| ServerError::BindFailure {
                path: self.socket.clone(),
                source,
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket, std::fs::Permissions::from_mode(0o600))
                .map_err(|source| ServerError::BindFailure {
                    path: self.socket.clone(),
                    source,
                })?;
        }

        Ok(listener)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Covers servers dropped without an explicit stop. Only the
        // instance that bound the socket may unlink it; a failed-bind
        // server must leave the live owner's endpoint alone.
        if self.bound.load(Ordering::SeqCst) {
            let _ = std::fs::remove_file(&self.socket);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: UnixListener,
    handler: Arc<MountHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("shutdown signaled, leaving accept loop");
                break;
            }
            res = listener.accept() => {
                let stream = match res {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let handler = handler.clone();
                let conn_shutdown_rx = shutdown_rx.clone();
                let counter = active.clone();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(handler, stream, conn_shutdown_rx).await {
                        warn!("connection error: {e}");
                    }
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
        }
    }
}

async fn handle_conn(
    handler: Arc<MountHandler>,
    stream: UnixStream,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(stubvault_core::MAX_FRAME_LENGTH)
        .new_codec();
    let mut framed = Framed::new(stream, codec);

    loop {
        let frame = tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("shutdown signaled, closing connection");
                break;
            }
            frame = framed.next() => frame,
        };

        match frame {
            Some(Ok(frame)) => {
                let req: Request = match serde_json::from_slice(&frame) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("bad JSON from client: {e}");
                        let resp = Response::err(None, "bad_json", "invalid JSON request");
                        send_response(&mut framed, &resp).await?;
                        continue;
                    }
                };
                let resp = dispatch(&handler, req);
                send_response(&mut framed, &resp).await?;
            }
            Some(Err(e)) => {
                warn!("bad frame from client: {e}");
                let resp = Response::err(None, "bad_frame", "malformed frame");
                let _ = send_response(&mut framed, &resp).await;
                return Err(e);
            }
            None => break, // Client disconnected
        }
    }

    Ok(())
}

async fn send_response(
    framed: &mut Framed<UnixStream, LengthDelimitedCodec>,
    resp: &Response,
) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(resp).map_err(std::io::Error::other)?;
    framed.send(Bytes::from(bytes)).await
}

/// Dispatch one decoded request to the handler.
///
/// Mount errors are surfaced verbatim with their stable code; no partial
/// response is ever produced.
fn dispatch(handler: &MountHandler, req: Request) -> Response {
    match req.method.as_str() {
        "mount" => {
            let request: MountRequest = match serde_json::from_value(req.params) {
                Ok(r) => r,
                Err(e) => {
                    return Response::err(
                        Some(req.id),
                        "bad_request",
                        format!("invalid mount params: {e}"),
                    );
                }
            };
            match handler.mount(&request) {
                Ok(response) => match serde_json::to_value(&response) {
                    Ok(value) => Response::ok(req.id, value),
                    Err(e) => Response::err(Some(req.id), "encode", e.to_string()),
                },
                Err(e) => Response::err(Some(req.id), e.code(), e.to_string()),
            }
        }
        "version" => match serde_json::to_value(version_payload()) {
            Ok(value) => Response::ok(req.id, value),
            Err(e) => Response::err(Some(req.id), "encode", e.to_string()),
        },
        other => Response::err(
            Some(req.id),
            "unknown_method",
            format!("unknown method {other:?}"),
        ),
    }
}

fn version_payload() -> VersionResponse {
    VersionResponse {
        version: format!("v{}", stubvault_core::API_VERSION),
        runtime_name: env!("CARGO_PKG_NAME").to_owned(),
        runtime_version: env!("CARGO_PKG_VERSION").to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_endpoint() -> String {
        format!(
            "unix://{}",
            std::env::temp_dir()
                .join(format!("stubvault-test-{}.sock", uuid::Uuid::new_v4()))
                .display()
        )
    }

    fn mount_request() -> MountRequest {
        let attributes = serde_json::json!({
            "objects": "array:\n  - |\n    objectName: foo\n    objectType: secret",
        });
        MountRequest {
            attributes: serde_json::to_string(&attributes).unwrap(),
            secrets: "{}".into(),
            permission: "640".into(),
            target_path: "/".into(),
        }
    }

    #[test]
    fn rejects_empty_endpoint() {
        assert!(matches!(
            Server::new(""),
            Err(ServerError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn rejects_foreign_scheme() {
        assert!(matches!(
            Server::new("tcp://127.0.0.1:9"),
            Err(ServerError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn mount_before_start_is_not_ready() {
        let server = Server::new(&temp_endpoint()).unwrap();
        let err = server.mount(&mount_request()).await.unwrap_err();
        assert!(matches!(err, ServerError::NotReady));
        // NotReady must not touch tracker state.
        assert_eq!(server.handler.tracker().current_epoch("secret/foo"), 1);
    }

    #[tokio::test]
    async fn double_start_fails() {
        let server = Server::new(&temp_endpoint()).unwrap();
        server.start().await.unwrap();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRunning));
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_terminal() {
        let server = Server::new(&temp_endpoint()).unwrap();
        server.start().await.unwrap();
        server.stop().await;
        server.stop().await;

        let err = server.mount(&mount_request()).await.unwrap_err();
        assert!(matches!(err, ServerError::NotReady));
        // Stopped is terminal: a restart attempt is refused.
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn stop_releases_the_endpoint() {
        let endpoint = temp_endpoint();
        let server = Server::new(&endpoint).unwrap();
        server.start().await.unwrap();
        let path = server.socket_path().to_path_buf();
        assert!(path.exists());
        server.stop().await;
        assert!(!path.exists());

        // A fresh server can bind the same endpoint afterwards.
        let second = Server::new(&endpoint).unwrap();
        second.start().await.unwrap();
        second.stop().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_a_bind_failure() {
        let endpoint = temp_endpoint();
        let first = Server::new(&endpoint).unwrap();
        first.start().await.unwrap();

        let second = Server::new(&endpoint).unwrap();
        let err = second.start().await.unwrap_err();
        assert!(matches!(err, ServerError::BindFailure { .. }));

        first.stop().await;
    }

    #[tokio::test]
    async fn failed_bind_drop_leaves_live_socket() {
        let endpoint = temp_endpoint();
        let live = Server::new(&endpoint).unwrap();
        live.start().await.unwrap();

        {
            let loser = Server::new(&endpoint).unwrap();
            assert!(matches!(
                loser.start().await,
                Err(ServerError::BindFailure { .. })
            ));
        } // Dropped here without ever having bound.

        // The live server keeps its endpoint and keeps serving.
        assert!(live.socket_path().exists());
        let response = live.mount(&mount_request()).await.unwrap();
        assert_eq!(response.object_version[0].version, "v1");

        live.stop().await;
    }

    #[tokio::test]
    async fn mount_in_process_round_trip() {
        let server = Server::new(&temp_endpoint()).unwrap();
        server.start().await.unwrap();

        let response = server.mount(&mount_request()).await.unwrap();
        assert_eq!(response.object_version[0].id, "secret/foo");
        assert_eq!(response.object_version[0].version, "v1");
        assert_eq!(response.files[0].contents, b"secret");

        server.stop().await;
    }

    #[tokio::test]
    async fn version_reports_runtime() {
        let server = Server::new(&temp_endpoint()).unwrap();
        server.start().await.unwrap();
        let version = server.version().await.unwrap();
        assert_eq!(version.runtime_name, "stubvaultd");
        assert_eq!(version.version, "v1");
        server.stop().await;
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let trigger = Arc::new(stubvault_core::rotation::ManualTrigger::new());
        let server = Server::with_trigger(&temp_endpoint(), trigger).unwrap();
        let resp = dispatch(
            &server.handler,
            Request {
                id: 9,
                method: "rotate".into(),
                params: serde_json::Value::Null,
            },
        );
        assert_eq!(resp.error.unwrap().code, "unknown_method");
    }

    #[tokio::test]
    async fn mount_with_bad_params_is_rejected() {
        let server = Server::new(&temp_endpoint()).unwrap();
        let resp = dispatch(
            &server.handler,
            Request {
                id: 4,
                method: "mount".into(),
                params: serde_json::json!({"attributes": 42}),
            },
        );
        assert_eq!(resp.error.unwrap().code, "bad_request");
    }
}
