use std::fmt;

use crate::http::headers::Headers;
use crate::http::parser::ParseError;

/// HTTP request methods.
///
/// The request-line parser accepts exactly these nine verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// TRACE - Loop-back test
    TRACE,
}

impl Method {
    /// Parses an HTTP method from its wire token.
    ///
    /// Matching is case-sensitive.
    ///
    /// ```
    /// # use tcp_to_http::http::request::Method;
    /// assert_eq!(Method::parse("GET"), Some(Method::GET));
    /// assert_eq!(Method::parse("get"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "CONNECT" => Some(Method::CONNECT),
            "TRACE" => Some(Method::TRACE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The validated first line of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    /// Request target, stored verbatim.
    pub target: String,
    /// Protocol version without the `HTTP/` prefix. Always `1.1`.
    pub version: String,
}

/// Parses one request line. `line` must not include the trailing CRLF.
pub fn parse_request_line(line: &[u8]) -> Result<RequestLine, ParseError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ParseError::MalformedRequestLine("request line is not valid UTF-8".into()))?;

    let parts: Vec<&str> = line.split(' ').collect();
    let &[method, target, version] = &parts[..] else {
        return Err(ParseError::MalformedRequestLine(line.to_string()));
    };

    if !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ParseError::InvalidMethod(method.to_string()));
    }
    let method =
        Method::parse(method).ok_or_else(|| ParseError::InvalidMethod(method.to_string()))?;

    let version_parts: Vec<&str> = version.split('/').collect();
    let &[protocol, number] = &version_parts[..] else {
        return Err(ParseError::MalformedRequestLine(line.to_string()));
    };

    if protocol != "HTTP" {
        return Err(ParseError::UnsupportedProtocol(protocol.to_string()));
    }
    if number != "1.1" {
        return Err(ParseError::UnsupportedVersion(number.to_string()));
    }

    Ok(RequestLine {
        method,
        target: target.to_string(),
        version: number.to_string(),
    })
}

/// A fully parsed HTTP request.
///
/// Produced by [`RequestParser`](crate::http::parser::RequestParser) once it
/// reaches `Done`; read-only from then on.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_line: RequestLine,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Request {
    pub fn method(&self) -> Method {
        self.request_line.method
    }

    pub fn target(&self) -> &str {
        &self.request_line.target
    }

    pub fn version(&self) -> &str {
        &self.request_line.version
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Declared `Content-Length`, or 0 when missing or unparsable.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
