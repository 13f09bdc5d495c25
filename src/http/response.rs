use std::fmt;
use std::io::Write;

use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder};
use serde::Deserialize;

use crate::http::headers::Headers;

/// HTTP status code.
///
/// Any numeric code can be written; only the codes in
/// [`StatusCode::reason_phrase`]'s table carry a reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    /// 200 OK
    pub const OK: StatusCode = StatusCode(200);
    /// 400 Bad Request
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// 404 Not Found. Not in the reason-phrase table.
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    /// 500 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Reason phrase from the fixed table, or `""` for any other code.
    ///
    /// ```
    /// # use tcp_to_http::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            400 => "Bad Request",
            500 => "Internal Server Error",
            _ => "",
        }
    }

    /// `HTTP/1.1 <code> <reason>\r\n`
    pub fn status_line(&self) -> String {
        format!("HTTP/1.1 {} {}\r\n", self.0, self.reason_phrase())
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Headers used by the whole-response convenience path when the caller
/// supplies none.
pub fn default_headers(content_length: usize) -> Headers {
    let mut headers = Headers::new();
    headers.set("content-length", content_length.to_string());
    headers.set("connection", "close");
    headers.set("content-type", "text/plain");
    headers
}

/// Content coding applied to whole response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Identity => "identity",
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == ContentEncoding::Identity
    }

    /// Picks a coding from an `Accept-Encoding` value.
    ///
    /// Each entry in `supported` is ranked by the client's q-value (1 when
    /// absent); entries refused with `q=0` are skipped. Equal q-values go to
    /// the coding the client listed first. `*` stands for the first supported
    /// coding. Falls back to `Identity`.
    ///
    /// ```
    /// # use tcp_to_http::http::response::ContentEncoding;
    /// let supported = [ContentEncoding::Gzip, ContentEncoding::Deflate];
    /// assert_eq!(
    ///     ContentEncoding::negotiate(Some("br, deflate, gzip"), &supported),
    ///     ContentEncoding::Deflate
    /// );
    /// assert_eq!(
    ///     ContentEncoding::negotiate(Some("gzip;q=0.1, deflate;q=0.9"), &supported),
    ///     ContentEncoding::Deflate
    /// );
    /// assert_eq!(ContentEncoding::negotiate(None, &supported), ContentEncoding::Identity);
    /// ```
    pub fn negotiate(accept_encoding: Option<&str>, supported: &[ContentEncoding]) -> Self {
        let Some(accept) = accept_encoding else {
            return ContentEncoding::Identity;
        };

        let mut best: Option<(ContentEncoding, f32)> = None;
        for item in accept.split(',') {
            let mut params = item.split(';');
            let name = params.next().unwrap_or("").trim();
            if name.is_empty() {
                continue;
            }

            let q = quality(params);
            if q <= 0.0 {
                continue;
            }

            let candidate = if name == "*" {
                supported.iter().find(|e| !e.is_identity())
            } else {
                supported
                    .iter()
                    .find(|e| !e.is_identity() && e.as_str().eq_ignore_ascii_case(name))
            };

            let Some(&candidate) = candidate else {
                continue;
            };
            if best.is_none_or(|(_, best_q)| q > best_q) {
                best = Some((candidate, q));
            }
        }

        best.map_or(ContentEncoding::Identity, |(encoding, _)| encoding)
    }

    /// Compresses `body` in one shot.
    ///
    /// Gzip uses the standard container at best compression. Deflate emits a
    /// raw deflate stream with no zlib framing; a new encoder is used per call.
    pub fn compress(&self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            ContentEncoding::Identity => Ok(body.to_vec()),
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
                encoder.write_all(body)?;
                encoder.finish()
            }
            ContentEncoding::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body)?;
                encoder.finish()
            }
        }
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// q-value from an entry's parameters. Missing or unparsable means 1.
fn quality<'a>(mut params: impl Iterator<Item = &'a str>) -> f32 {
    params
        .find_map(|p| p.trim().strip_prefix("q="))
        .and_then(|q| q.trim().parse::<f32>().ok())
        .unwrap_or(1.0)
}
