//! Response writer state machine.
//!
//! Wire order is enforced: status line, then headers, then body. Bytes are
//! staged in an outbound buffer. A writer bound to a sink with
//! [`ResponseWriter::with_sink`] forwards them after every operation, so
//! chunks reach the peer while the handler is still running; an unbound
//! writer keeps them until [`ResponseWriter::flush`].

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::http::headers::Headers;
use crate::http::response::{ContentEncoding, StatusCode, default_headers};

const CRLF: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    StatusLine,
    Headers,
    Body,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterState::StatusLine => "status line",
            WriterState::Headers => "headers",
            WriterState::Body => "body",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("cannot write {operation} in state {state}")]
    InvalidWriterState {
        operation: &'static str,
        state: WriterState,
    },

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("response stream closed")]
    SinkClosed,
}

pub struct ResponseWriter {
    state: WriterState,
    encoding: ContentEncoding,
    out: BytesMut,
    sink: Option<mpsc::Sender<Bytes>>,
}

impl ResponseWriter {
    /// Creates a writer. `encoding` is fixed for the writer's lifetime and
    /// only affects [`write_response`](Self::write_response).
    pub fn new(encoding: ContentEncoding) -> Self {
        Self {
            state: WriterState::StatusLine,
            encoding,
            out: BytesMut::with_capacity(1024),
            sink: None,
        }
    }

    /// Binds the writer to `sink`. Every write operation hands its bytes to
    /// the channel before returning.
    ///
    /// Sending blocks while the channel is full, so a bound writer must only
    /// be driven from a blocking thread, never from async code.
    pub fn with_sink(mut self, sink: mpsc::Sender<Bytes>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drops the sink. Later writes are staged until [`flush`](Self::flush).
    pub fn unbind(&mut self) {
        self.sink = None;
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Bytes written so far and not yet flushed or forwarded.
    pub fn pending(&self) -> &[u8] {
        &self.out
    }

    fn expect_state(
        &self,
        expected: WriterState,
        operation: &'static str,
    ) -> Result<(), WriterError> {
        if self.state != expected {
            return Err(WriterError::InvalidWriterState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn put_header_lines(&mut self, headers: &Headers) {
        for (key, value) in headers.iter() {
            self.out.put_slice(key.as_bytes());
            self.out.put_slice(b": ");
            self.out.put_slice(value.as_bytes());
            self.out.put_slice(CRLF);
        }
        self.out.put_slice(CRLF);
    }

    fn forward(&mut self) -> Result<(), WriterError> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        if self.out.is_empty() {
            return Ok(());
        }
        let bytes = self.out.split().freeze();
        sink.blocking_send(bytes).map_err(|_| WriterError::SinkClosed)
    }

    pub fn write_status_line(&mut self, status: StatusCode) -> Result<(), WriterError> {
        self.expect_state(WriterState::StatusLine, "status line")?;
        self.out.put_slice(status.status_line().as_bytes());
        self.state = WriterState::Headers;
        self.forward()
    }

    pub fn write_headers(&mut self, headers: &Headers) -> Result<(), WriterError> {
        self.expect_state(WriterState::Headers, "headers")?;
        self.put_header_lines(headers);
        self.state = WriterState::Body;
        self.forward()
    }

    /// Writes raw body bytes. Returns the number of bytes written.
    pub fn write_body(&mut self, body: &[u8]) -> Result<usize, WriterError> {
        self.expect_state(WriterState::Body, "body")?;
        self.out.put_slice(body);
        self.forward()?;
        Ok(body.len())
    }

    /// Writes one chunk: hex size, CRLF, payload, CRLF.
    ///
    /// Returns the number of bytes put on the wire, framing included.
    pub fn write_chunked_body(&mut self, chunk: &[u8]) -> Result<usize, WriterError> {
        self.expect_state(WriterState::Body, "chunked body")?;
        let size_line = format!("{:x}\r\n", chunk.len());
        self.out.put_slice(size_line.as_bytes());
        self.out.put_slice(chunk);
        self.out.put_slice(CRLF);
        self.forward()?;
        Ok(size_line.len() + chunk.len() + CRLF.len())
    }

    /// Ends a chunked body with the zero-size chunk followed by `trailers`.
    pub fn write_trailers(&mut self, trailers: &Headers) -> Result<(), WriterError> {
        self.expect_state(WriterState::Body, "trailers")?;
        self.out.put_slice(LAST_CHUNK);
        self.put_header_lines(trailers);
        self.forward()
    }

    /// Ends a chunked body without trailers.
    pub fn write_chunked_body_done(&mut self) -> Result<usize, WriterError> {
        self.expect_state(WriterState::Body, "chunked body terminator")?;
        self.out.put_slice(LAST_CHUNK);
        self.out.put_slice(CRLF);
        self.forward()?;
        Ok(LAST_CHUNK.len() + CRLF.len())
    }

    /// Writes a complete response in one call.
    ///
    /// With no `headers`, defaults from [`default_headers`] are used. When the
    /// writer has a content coding, the body is compressed first and
    /// `content-encoding`, `vary` and `content-length` are set to match.
    pub fn write_response(
        &mut self,
        status: StatusCode,
        headers: Option<Headers>,
        body: impl AsRef<[u8]>,
    ) -> Result<(), WriterError> {
        self.expect_state(WriterState::StatusLine, "response")?;

        let body = body.as_ref();
        let mut headers = headers.unwrap_or_else(|| default_headers(body.len()));

        let compressed;
        let body = if self.encoding.is_identity() {
            body
        } else {
            compressed = self.encoding.compress(body)?;
            headers.set("content-encoding", self.encoding.as_str());
            headers.set("vary", "Accept-Encoding");
            headers.set("content-length", compressed.len().to_string());
            &compressed[..]
        };

        self.write_status_line(status)?;
        self.write_headers(&headers)?;
        self.write_body(body)?;
        Ok(())
    }

    /// Drains staged bytes onto `stream` and flushes it.
    pub async fn flush<W>(&mut self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if !self.out.is_empty() {
            stream.write_all(&self.out).await?;
            self.out.clear();
        }
        stream.flush().await
    }
}
