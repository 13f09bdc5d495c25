//! HTTP protocol implementation.
//!
//! One request per connection: the stream is read until a full request is
//! parsed, the registered handler writes the response, and the connection
//! is closed.
//!
//! # Architecture
//!
//! - **`headers`**: case-insensitive header table with incremental line parsing
//! - **`request`**: request line validation and the parsed `Request`
//! - **`parser`**: incremental request parser and the stream-driving loop
//! - **`response`**: status codes, default headers, content-coding negotiation
//! - **`writer`**: response writer state machine (plain, chunked, trailers)
//! - **`connection`**: per-connection orchestration and the handler registry
//!
//! # State Machines
//!
//! ```text
//!  parser:  Initialized ──► ParsingHeaders ──► ParsingBody ──► Done
//!  writer:  StatusLine ──► Headers ──► Body
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tcp_to_http::config::Config;
//! use tcp_to_http::http::{Request, ResponseWriter, StatusCode};
//! use tcp_to_http::server::{Server, Shutdown};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = Server::new(Config::default());
//!     server.register_handler("/", |w: &mut ResponseWriter, _req: &Request| -> anyhow::Result<()> {
//!         w.write_response(StatusCode::OK, None, "hello\n")?;
//!         Ok(())
//!     });
//!
//!     let shutdown = Shutdown::new();
//!     server.listen(shutdown.subscribe()).await
//! }
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use connection::{Connection, Handler, HandlerRegistry};
pub use headers::Headers;
pub use parser::{ParseError, ParserState, RequestParser};
pub use request::{Method, Request, RequestLine};
pub use response::{ContentEncoding, StatusCode};
pub use writer::{ResponseWriter, WriterError, WriterState};
