//! HTTP/1.1 request parsing using the [`httparse`] crate.
//!
//! A [`Request`] is only produced once its whole body has been buffered,
//! whether the body is framed by `Content-Length` or sent with
//! `Transfer-Encoding: chunked`.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value:?}")]
    InvalidContentLength { value: String },

    #[error("malformed chunked body")]
    InvalidChunk,
}

/// A fully parsed HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use lmbridge::http::Request;
///
/// let raw = b"POST /copilot/chat HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}";
/// let (request, consumed) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "POST");
/// assert_eq!(request.path(), "/copilot/chat");
/// assert_eq!(&request.body()[..], b"{}");
/// assert_eq!(consumed, raw.len());
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse one complete request from the front of `buf`.
    ///
    /// Returns the request and the number of bytes it occupied, so the caller
    /// can drop them and keep any pipelined data that follows.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — the head or the body has not fully arrived.
    /// - [`RequestError::Parse`] — the head is malformed.
    /// - [`RequestError::MissingField`] — method, path or version is absent.
    /// - [`RequestError::InvalidContentLength`] / [`RequestError::InvalidChunk`] —
    ///   the body framing cannot be understood.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let head_len = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let rest = &buf[head_len..];
        let (body, body_len) = if is_chunked(&header_map) {
            decode_chunked(rest)?
        } else {
            let len = match header_map.get("content-length") {
                Some(value) => value.trim().parse::<usize>().map_err(|_| {
                    RequestError::InvalidContentLength {
                        value: value.to_owned(),
                    }
                })?,
                None => 0,
            };
            if rest.len() < len {
                return Err(RequestError::Incomplete);
            }
            (Bytes::copy_from_slice(&rest[..len]), len)
        };

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                body,
            },
            head_len + body_len,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as sent, query string included.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the fully assembled request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get("transfer-encoding")
        .and_then(|te| te.rsplit(',').next())
        .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
}

/// Decodes a chunked body from the front of `buf`.
///
/// Returns the reassembled payload and the number of framed bytes consumed,
/// including the terminating chunk and any trailer section.
fn decode_chunked(buf: &[u8]) -> Result<(Bytes, usize), RequestError> {
    let mut body = BytesMut::new();
    let mut pos = 0;

    loop {
        let (data_start, size) = match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete((offset, size))) => (pos + offset, size),
            Ok(httparse::Status::Partial) => return Err(RequestError::Incomplete),
            Err(_) => return Err(RequestError::InvalidChunk),
        };

        if size == 0 {
            let tail = &buf[data_start..];
            if tail.starts_with(b"\r\n") {
                return Ok((body.freeze(), data_start + 2));
            }
            // Trailer fields end with an empty line.
            return match tail.windows(4).position(|w| w == b"\r\n\r\n") {
                Some(end) => Ok((body.freeze(), data_start + end + 4)),
                None => Err(RequestError::Incomplete),
            };
        }

        let (data_end, chunk_end) = usize::try_from(size)
            .ok()
            .and_then(|size| data_start.checked_add(size))
            .and_then(|end| Some((end, end.checked_add(2)?)))
            .ok_or(RequestError::InvalidChunk)?;
        if buf.len() < chunk_end {
            return Err(RequestError::Incomplete);
        }
        if &buf[data_end..chunk_end] != b"\r\n" {
            return Err(RequestError::InvalidChunk);
        }

        body.extend_from_slice(&buf[data_start..data_end]);
        pos = chunk_end;
    }
}
