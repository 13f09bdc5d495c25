use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder};
use tcp_to_http::http::headers::Headers;
use tcp_to_http::http::response::{ContentEncoding, StatusCode};
use tcp_to_http::http::writer::{ResponseWriter, WriterError, WriterState};
use tokio::sync::mpsc;

/// Splits a response into (head, body) at the first blank line.
fn split_head(raw: &[u8]) -> (String, Vec<u8>) {
    let idx = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator");
    (
        String::from_utf8(raw[..idx + 4].to_vec()).unwrap(),
        raw[idx + 4..].to_vec(),
    )
}

/// Minimal chunked decoder: returns the payload and the raw trailer section.
fn decode_chunked(mut raw: &[u8]) -> (Vec<u8>, String) {
    let mut payload = Vec::new();
    loop {
        let line_end = raw.windows(2).position(|w| w == b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&raw[..line_end]).unwrap(), 16).unwrap();
        raw = &raw[line_end + 2..];
        if size == 0 {
            return (payload, String::from_utf8(raw.to_vec()).unwrap());
        }
        payload.extend_from_slice(&raw[..size]);
        assert_eq!(&raw[size..size + 2], b"\r\n");
        raw = &raw[size + 2..];
    }
}

#[test]
fn test_full_plain_response() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    let mut headers = Headers::new();
    headers.set("Content-Length", "2");
    headers.set("Content-Type", "text/plain");

    w.write_status_line(StatusCode::OK).unwrap();
    assert_eq!(w.state(), WriterState::Headers);
    w.write_headers(&headers).unwrap();
    assert_eq!(w.state(), WriterState::Body);
    assert_eq!(w.write_body(b"ok").unwrap(), 2);

    assert_eq!(
        w.pending(),
        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\ncontent-type: text/plain\r\n\r\nok"
    );
}

#[test]
fn test_headers_before_status_line_fails() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    let result = w.write_headers(&Headers::new());

    assert!(matches!(
        result,
        Err(WriterError::InvalidWriterState {
            state: WriterState::StatusLine,
            ..
        })
    ));
    assert!(w.pending().is_empty());
}

#[test]
fn test_body_before_headers_fails() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    w.write_status_line(StatusCode::OK).unwrap();

    assert!(w.write_body(b"x").is_err());
    assert!(w.write_chunked_body(b"x").is_err());
    assert!(w.write_chunked_body_done().is_err());
    assert!(w.write_trailers(&Headers::new()).is_err());
}

#[test]
fn test_status_line_cannot_be_rewritten() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    w.write_status_line(StatusCode::OK).unwrap();
    w.write_headers(&Headers::new()).unwrap();

    assert!(w.write_status_line(StatusCode::INTERNAL_SERVER_ERROR).is_err());
    assert!(w.write_headers(&Headers::new()).is_err());
    assert!(
        w.write_response(StatusCode::INTERNAL_SERVER_ERROR, None, "oops")
            .is_err()
    );
    assert_eq!(w.pending(), b"HTTP/1.1 200 OK\r\n\r\n");
}

#[test]
fn test_not_found_has_empty_reason() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    w.write_status_line(StatusCode::NOT_FOUND).unwrap();
    assert_eq!(w.pending(), b"HTTP/1.1 404 \r\n");
}

#[test]
fn test_chunked_round_trip() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    let mut headers = Headers::new();
    headers.set("Transfer-Encoding", "chunked");

    w.write_status_line(StatusCode::OK).unwrap();
    w.write_headers(&headers).unwrap();
    assert_eq!(w.write_chunked_body(b"abc").unwrap(), 8);
    assert_eq!(w.write_chunked_body(b"de").unwrap(), 7);
    assert_eq!(w.write_chunked_body_done().unwrap(), 5);
    assert_eq!(w.state(), WriterState::Body);

    let (head, body) = split_head(w.pending());
    assert!(head.contains("transfer-encoding: chunked\r\n"));
    assert_eq!(body, b"3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n");

    let (payload, trailer) = decode_chunked(&body);
    assert_eq!(payload, b"abcde");
    assert_eq!(trailer, "\r\n");
}

#[test]
fn test_chunk_size_is_hex() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    w.write_status_line(StatusCode::OK).unwrap();
    w.write_headers(&Headers::new()).unwrap();
    w.write_chunked_body(&[b'x'; 26]).unwrap();

    let (_, body) = split_head(w.pending());
    assert!(body.starts_with(b"1a\r\n"));
}

#[test]
fn test_trailers_end_chunked_body() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    let mut headers = Headers::new();
    headers.set("Transfer-Encoding", "chunked");
    headers.set("Trailer", "X-Content-Length");

    w.write_status_line(StatusCode::OK).unwrap();
    w.write_headers(&headers).unwrap();
    w.write_chunked_body(b"hello").unwrap();

    let mut trailers = Headers::new();
    trailers.set("X-Content-Length", "5");
    w.write_trailers(&trailers).unwrap();

    let (_, body) = split_head(w.pending());
    assert_eq!(body, b"5\r\nhello\r\n0\r\nx-content-length: 5\r\n\r\n");

    let (payload, trailer) = decode_chunked(&body);
    assert_eq!(payload, b"hello");
    assert_eq!(trailer, "x-content-length: 5\r\n\r\n");
}

#[test]
fn test_write_response_default_headers() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    w.write_response(StatusCode::OK, None, "hello").unwrap();

    assert_eq!(w.state(), WriterState::Body);
    assert_eq!(
        w.pending(),
        b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\ncontent-type: text/plain\r\n\r\nhello"
    );
}

#[test]
fn test_write_response_custom_headers() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    let mut headers = Headers::new();
    headers.set("Content-Type", "application/json");
    headers.set("Content-Length", "2");

    w.write_response(StatusCode::from(201), Some(headers), "{}").unwrap();

    assert_eq!(
        w.pending(),
        b"HTTP/1.1 201 \r\ncontent-type: application/json\r\ncontent-length: 2\r\n\r\n{}"
    );
}

#[test]
fn test_write_response_gzip() {
    let body = "hello hello hello hello hello hello";
    let mut w = ResponseWriter::new(ContentEncoding::Gzip);
    w.write_response(StatusCode::OK, None, body).unwrap();

    let (head, compressed) = split_head(w.pending());
    assert!(head.contains("content-encoding: gzip\r\n"));
    assert!(head.contains("vary: Accept-Encoding\r\n"));
    assert!(head.contains(&format!("content-length: {}\r\n", compressed.len())));

    let mut decoded = String::new();
    GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, body);
}

#[test]
fn test_write_response_deflate() {
    let body = "deflate me deflate me deflate me";
    let mut w = ResponseWriter::new(ContentEncoding::Deflate);
    w.write_response(StatusCode::OK, None, body).unwrap();

    let (head, compressed) = split_head(w.pending());
    assert!(head.contains("content-encoding: deflate\r\n"));
    assert!(head.contains(&format!("content-length: {}\r\n", compressed.len())));

    let mut decoded = String::new();
    DeflateDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, body);
}

#[test]
fn test_chunked_body_is_never_compressed() {
    let mut w = ResponseWriter::new(ContentEncoding::Gzip);
    w.write_status_line(StatusCode::OK).unwrap();
    w.write_headers(&Headers::new()).unwrap();
    w.write_chunked_body(b"raw").unwrap();

    let (_, body) = split_head(w.pending());
    assert_eq!(body, b"3\r\nraw\r\n");
}

#[tokio::test]
async fn test_flush_drains_pending_bytes() {
    let mut w = ResponseWriter::new(ContentEncoding::Identity);
    w.write_response(StatusCode::OK, None, "ok").unwrap();

    let mut sink: Vec<u8> = Vec::new();
    w.flush(&mut sink).await.unwrap();

    assert!(w.pending().is_empty());
    assert!(sink.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(sink.ends_with(b"\r\n\r\nok"));
}

#[test]
fn test_bound_writer_forwards_each_write() {
    let (tx, mut rx) = mpsc::channel(8);
    let mut w = ResponseWriter::new(ContentEncoding::Identity).with_sink(tx);

    w.write_status_line(StatusCode::OK).unwrap();
    assert_eq!(&rx.try_recv().unwrap()[..], b"HTTP/1.1 200 OK\r\n");

    w.write_headers(&Headers::new()).unwrap();
    assert_eq!(&rx.try_recv().unwrap()[..], b"\r\n");

    w.write_chunked_body(b"abc").unwrap();
    assert_eq!(&rx.try_recv().unwrap()[..], b"3\r\nabc\r\n");

    assert!(w.pending().is_empty());
}

#[test]
fn test_bound_writer_reports_closed_sink() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let mut w = ResponseWriter::new(ContentEncoding::Identity).with_sink(tx);

    let result = w.write_status_line(StatusCode::OK);
    assert!(matches!(result, Err(WriterError::SinkClosed)));
}

#[test]
fn test_unbound_writer_stages_bytes() {
    let (tx, mut rx) = mpsc::channel(1);
    let mut w = ResponseWriter::new(ContentEncoding::Identity).with_sink(tx);
    w.unbind();

    w.write_status_line(StatusCode::OK).unwrap();

    assert!(rx.try_recv().is_err());
    assert_eq!(w.pending(), b"HTTP/1.1 200 OK\r\n");
}
