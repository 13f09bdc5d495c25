use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::http::parser::{ReadError, read_request_with_timeout};
use crate::http::request::Request;
use crate::http::response::{ContentEncoding, StatusCode};
use crate::http::writer::ResponseWriter;

/// Writes a handler may have in flight before it blocks on the peer.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// A function registered for one exact request target.
///
/// The handler must drive the writer through status, headers and body. An
/// `Err` (or a panic) is turned into a 500 by the connection.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, writer: &mut ResponseWriter, request: &Request) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&mut ResponseWriter, &Request) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn call(&self, writer: &mut ResponseWriter, request: &Request) -> anyhow::Result<()> {
        self(writer, request)
    }
}

/// Exact-path handler lookup. Shared read-only once the server is running.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `path`, replacing any previous one.
    pub fn register(&mut self, path: impl Into<String>, handler: impl Handler) {
        self.handlers.insert(path.into(), Arc::new(handler));
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(path).cloned()
    }
}

/// Per-connection settings copied out of the server config.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub timeout: Duration,
    pub read_buffer_size: usize,
    /// Codings the server may apply; empty disables compression.
    pub encodings: Vec<ContentEncoding>,
}

/// Serves exactly one request on an accepted stream, then closes it.
pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    registry: Arc<HandlerRegistry>,
    settings: Arc<ConnectionSettings>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        registry: Arc<HandlerRegistry>,
        settings: Arc<ConnectionSettings>,
    ) -> Self {
        Self {
            stream,
            peer: None,
            registry,
            settings,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    fn client_id(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Reads, dispatches, responds and closes. Errors are answered on the
    /// wire and logged; only a failure to close the stream is returned.
    ///
    /// Every read and write on the stream is bounded by the connection
    /// timeout.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let client = self.client_id();
        debug!(peer = %client, "Reading request");

        let read = read_request_with_timeout(
            &mut self.stream,
            self.settings.read_buffer_size,
            self.settings.timeout,
        )
        .await;

        let mut writer = match read {
            Ok(request) => self.dispatch(request, &client).await,
            Err(e) => {
                let status = match &e {
                    ReadError::Parse(_) => {
                        warn!(peer = %client, error = %e, "Error parsing request");
                        StatusCode::BAD_REQUEST
                    }
                    ReadError::Timeout(_) => {
                        warn!(
                            peer = %client,
                            error = %e,
                            "Connection timed out while reading request"
                        );
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    ReadError::Io(_) => {
                        error!(peer = %client, error = %e, "Error reading request");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let message = match &e {
                    ReadError::Timeout(_) => "Request timed out".to_string(),
                    _ => format!("Error parsing request: {e}"),
                };
                let mut writer = ResponseWriter::new(ContentEncoding::Identity);
                send_error_response(&mut writer, status, &message);
                writer
            }
        };

        match timeout(self.settings.timeout, writer.flush(&mut self.stream)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(peer = %client, error = %e, "Error sending response"),
            Err(_) => warn!(peer = %client, "Timed out sending response"),
        }

        debug!(peer = %client, "Closing connection");
        match timeout(self.settings.timeout, self.stream.shutdown()).await {
            Ok(res) => res?,
            Err(_) => warn!(peer = %client, "Timed out closing connection"),
        }
        Ok(())
    }

    /// Routes `request` and runs its handler. Whatever the handler writes is
    /// streamed to the peer as it is produced; the returned writer holds only
    /// what is left to send afterwards.
    async fn dispatch(&mut self, request: Request, client: &str) -> ResponseWriter {
        let method = request.method();
        let target = request.target().to_string();
        debug!(peer = %client, %method, %target, "Received request");

        let encoding =
            ContentEncoding::negotiate(request.header("accept-encoding"), &self.settings.encodings);

        let Some(handler) = self.registry.get(&target) else {
            warn!(peer = %client, %method, %target, "No handler found");
            let message = format!("Path '{target}' not found for method {method}");
            let mut writer = ResponseWriter::new(encoding);
            send_error_response(&mut writer, StatusCode::NOT_FOUND, &message);
            return writer;
        };

        let (tx, mut rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
        let mut writer = ResponseWriter::new(encoding).with_sink(tx);

        // Handlers are synchronous; keep them off the event loop.
        let task = tokio::task::spawn_blocking(move || {
            let result = handler.call(&mut writer, &request);
            writer.unbind();
            (writer, result)
        });

        let mut streamed = false;
        let mut stream_failed = false;
        while let Some(bytes) = rx.recv().await {
            streamed = true;
            if let Err(e) = self.send(&bytes).await {
                error!(peer = %client, %method, %target, error = %e, "Error streaming response");
                stream_failed = true;
                break;
            }
        }
        // Pending and future sends from the handler fail fast from here on.
        drop(rx);

        let outcome = task.await;

        if stream_failed {
            if let Ok((_, Err(e))) = &outcome {
                debug!(peer = %client, error = %e, "Handler stopped after stream failure");
            }
            return ResponseWriter::new(encoding);
        }

        match outcome {
            Ok((writer, Ok(()))) => {
                info!(peer = %client, %method, %target, "Handler completed successfully");
                writer
            }
            Ok((mut writer, Err(e))) => {
                error!(peer = %client, %method, %target, error = %e, "Unhandled error in handler");
                send_error_response(
                    &mut writer,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("Internal server error: {e}"),
                );
                writer
            }
            Err(join_error) => {
                error!(
                    peer = %client,
                    %method,
                    %target,
                    error = %join_error,
                    "Handler panicked"
                );
                let mut writer = ResponseWriter::new(encoding);
                if streamed {
                    debug!(peer = %client, "Response already started, closing without a 500");
                } else {
                    send_error_response(
                        &mut writer,
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &format!("Internal server error: {join_error}"),
                    );
                }
                writer
            }
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        timeout(self.settings.timeout, write)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
    }
}

/// Best-effort error response with default headers. A writer that is already
/// past its status line cannot take it; that is logged, not raised.
fn send_error_response(writer: &mut ResponseWriter, status: StatusCode, message: &str) {
    debug!(status = status.as_u16(), body = message, "Sending error response");
    if let Err(e) = writer.write_response(status, None, message) {
        error!(status = status.as_u16(), error = %e, "Error sending error response");
    }
}
