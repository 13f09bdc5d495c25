//! Incremental request parser.
//!
//! Bytes are fed as they arrive; nothing assumes a read boundary lines up
//! with a message boundary. Each call to [`RequestParser::feed`] reports how
//! many bytes it consumed so the caller can slide its buffer.

use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::http::headers::{Headers, find_crlf};
use crate::http::request::{Request, RequestLine, parse_request_line};

const CRLF_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Initialized,
    ParsingHeaders,
    ParsingBody,
    Done,
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParserState::Initialized => "initialized",
            ParserState::ParsingHeaders => "parsing headers",
            ParserState::ParsingBody => "parsing body",
            ParserState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything that can go wrong turning bytes into a [`Request`].
///
/// All variants are fatal to the request being parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("poorly formatted request line: {0}")]
    MalformedRequestLine(String),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("unrecognized protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("unrecognized HTTP version: {0}")]
    UnsupportedVersion(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("invalid header token found: {0:?}")]
    InvalidHeaderToken(String),

    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("body exceeds content-length: declared {declared}, received {received}")]
    ContentLengthExceeded { declared: usize, received: usize },

    #[error("incomplete request, connection closed while {0}")]
    IncompleteRequest(ParserState),

    #[error("cannot feed parser in state: {0}")]
    InvalidState(ParserState),
}

pub struct RequestParser {
    state: ParserState,
    request_line: Option<RequestLine>,
    headers: Headers,
    body: Vec<u8>,
    body_read: usize,
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Initialized,
            request_line: None,
            headers: Headers::new(),
            body: Vec::new(),
            body_read: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == ParserState::Done
    }

    /// Consumes as much of `buf` as the current state allows.
    ///
    /// Steps are repeated until one consumes nothing (more input needed) or
    /// the parser reaches `Done`.
    pub fn feed(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        if self.is_done() {
            return Err(ParseError::InvalidState(self.state));
        }

        let mut consumed = 0;
        while !self.is_done() {
            let n = self.step(&buf[consumed..])?;
            consumed += n;
            if n == 0 {
                break;
            }
        }

        Ok(consumed)
    }

    fn step(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        match self.state {
            ParserState::Initialized => {
                let Some(idx) = find_crlf(buf) else {
                    return Ok(0);
                };
                self.request_line = Some(parse_request_line(&buf[..idx])?);
                self.state = ParserState::ParsingHeaders;
                Ok(idx + CRLF_LEN)
            }
            ParserState::ParsingHeaders => {
                let (n, done) = self.headers.parse(buf)?;
                if done {
                    self.state = ParserState::ParsingBody;
                }
                Ok(n)
            }
            ParserState::ParsingBody => self.step_body(buf),
            ParserState::Done => Err(ParseError::InvalidState(self.state)),
        }
    }

    fn step_body(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        let declared = match self.headers.get("content-length") {
            None | Some("") => {
                // Without a declared length any bytes present are dropped.
                self.state = ParserState::Done;
                return Ok(buf.len());
            }
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))?,
        };

        self.body.extend_from_slice(buf);
        self.body_read += buf.len();

        if self.body_read > declared {
            return Err(ParseError::ContentLengthExceeded {
                declared,
                received: self.body_read,
            });
        }
        if self.body_read == declared {
            self.state = ParserState::Done;
        }

        Ok(buf.len())
    }

    /// Hands out the finished request. Fails unless the parser is `Done`.
    pub fn finish(self) -> Result<Request, ParseError> {
        match (self.state, self.request_line) {
            (ParserState::Done, Some(request_line)) => Ok(Request {
                request_line,
                headers: self.headers,
                body: self.body,
            }),
            (state, _) => Err(ParseError::IncompleteRequest(state)),
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read buffer that starts small and doubles whenever the unread bytes fill it.
///
/// `filled` is the length of unread data; `buf.len()` is the capacity.
pub struct ReadBuffer {
    buf: BytesMut,
    filled: usize,
}

impl ReadBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(capacity.max(1));
        buf.resize(capacity.max(1), 0);
        Self { buf, filled: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes read but not yet consumed.
    pub fn unread(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Reads once from `reader` into the free tail, growing first if full.
    /// Returns the number of bytes read; 0 means end of stream.
    pub async fn fill_from<R>(&mut self, reader: &mut R) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        if self.filled == self.buf.len() {
            let doubled = self.buf.len() * 2;
            self.buf.resize(doubled, 0);
        }

        let n = reader.read(&mut self.buf[self.filled..]).await?;
        self.filled += n;
        Ok(n)
    }

    /// Drops the first `n` unread bytes, sliding the rest to the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.filled);
        self.buf.copy_within(n..self.filled, 0);
        self.filled -= n;
    }
}

/// Failure while reading a request off a stream.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("timed out after {0:?} waiting for request")]
    Timeout(Duration),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Drives a fresh [`RequestParser`] from `reader` until the request is complete.
pub async fn read_request<R>(reader: &mut R, buffer_size: usize) -> Result<Request, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut parser = RequestParser::new();
    let mut buffer = ReadBuffer::with_capacity(buffer_size);

    while !parser.is_done() {
        let n = buffer.fill_from(reader).await?;
        if n == 0 {
            return Err(ParseError::IncompleteRequest(parser.state()).into());
        }

        let consumed = parser.feed(buffer.unread())?;
        buffer.consume(consumed);
    }

    Ok(parser.finish()?)
}

/// [`read_request`] bounded by `timeout`.
pub async fn read_request_with_timeout<R>(
    reader: &mut R,
    buffer_size: usize,
    timeout: Duration,
) -> Result<Request, ReadError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_request(reader, buffer_size))
        .await
        .map_err(|_| ReadError::Timeout(timeout))?
}
