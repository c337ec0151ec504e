//! In-memory request/response model with case-insensitive, multi-valued,
//! order-preserving headers (§3, §4.2).

use std::collections::HashMap;
use std::fmt::Write as _;

/// A single header field: the wire-original field name, and every value
/// that has been appended to it. A comma-separated value arriving on the
/// wire is kept as one entry, never split (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    values: Vec<String>,
}

impl Header {
    fn new(name: impl Into<String>) -> Header {
        Header {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// The original wire casing of the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All values appended to this header, in arrival order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Appends a value (one per occurrence on the wire).
    pub fn push(&mut self, value: impl Into<String>) {
        self.values.push(value.into());
    }
}

/// Headers for one message: a case-insensitive map from lowercased name to
/// `Header`, with insertion order preserved for serialization (§3).
#[derive(Debug, Clone, Default)]
pub struct Headers {
    order: Vec<Header>,
    index: HashMap<String, usize>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Returns the header for `name`, creating an empty one (preserving the
    /// caller's casing) if it doesn't already exist.
    pub fn header(&mut self, name: &str) -> &mut Header {
        let key = Self::key(name);
        if let Some(&idx) = self.index.get(&key) {
            return &mut self.order[idx];
        }
        let idx = self.order.len();
        self.order.push(Header::new(name));
        self.index.insert(key, idx);
        &mut self.order[idx]
    }

    /// Returns the header for `name` if present, via case-insensitive match.
    pub fn get(&self, name: &str) -> Option<&Header> {
        self.index.get(&Self::key(name)).map(|&i| &self.order[i])
    }

    /// Removes the header matching `name`. Returns true if one was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = Self::key(name);
        if self.index.remove(&key).is_none() {
            return false;
        }
        self.order.retain(|h| Self::key(&h.name) != key);
        self.index.clear();
        for (i, h) in self.order.iter().enumerate() {
            self.index.insert(Self::key(&h.name), i);
        }
        true
    }

    /// Removes any existing header for `name`, then returns a fresh one.
    pub fn replace(&mut self, name: &str) -> &mut Header {
        self.remove(name);
        self.header(name)
    }

    /// Iterates headers in wire (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Serializes each header as a wire line (`Name: v1, v2\r\n`). Also
    /// used to serialize a trailer section, which has the same on-wire
    /// shape as a header section (§4.1).
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        for header in &self.order {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            for (i, v) in header.values.iter().enumerate() {
                if i > 0 {
                    out.extend_from_slice(b", ");
                }
                out.extend_from_slice(v.as_bytes());
            }
            out.extend_from_slice(b"\r\n");
        }
    }
}

/// HTTP version as (major, minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    /// Default keep-alive per §4.1: HTTP/1.1 defaults true, HTTP/1.0 false.
    pub fn default_keep_alive(self) -> bool {
        self.major == 1 && self.minor >= 1
    }
}

/// An incoming or outgoing HTTP request (§3).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub version: Version,
    pub headers: Headers,
}

impl Request {
    pub fn new() -> Request {
        Request {
            method: String::new(),
            url: String::new(),
            version: Version::HTTP_11,
            headers: Headers::new(),
        }
    }

    pub fn header(&mut self, name: &str) -> &mut Header {
        self.headers.header(name)
    }

    pub fn get_header(&self, name: &str) -> Option<&Header> {
        self.headers.get(name)
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    pub fn replace_header(&mut self, name: &str) -> &mut Header {
        self.headers.replace(name)
    }

    /// Serializes the request line and headers (not the body) to bytes.
    pub fn serialize_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.url.as_bytes());
        let _ = write!(
            UnsafeVecWriter(&mut out),
            " HTTP/{}.{}\r\n",
            self.version.major,
            self.version.minor
        );
        self.headers.write_to(&mut out);
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl Default for Request {
    fn default() -> Self {
        Request::new()
    }
}

/// An incoming or outgoing HTTP response (§3).
#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            version: Version::HTTP_11,
            status,
            reason: default_reason_phrase(status).to_owned(),
            headers: Headers::new(),
        }
    }

    pub fn header(&mut self, name: &str) -> &mut Header {
        self.headers.header(name)
    }

    pub fn get_header(&self, name: &str) -> Option<&Header> {
        self.headers.get(name)
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    pub fn replace_header(&mut self, name: &str) -> &mut Header {
        self.headers.replace(name)
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::new(0)
    }
}

impl Response {
    /// Serializes the status line and headers (not the body) to bytes.
    /// Status serialization is "HTTP/M.m CODE REASON\r\n"; reason may be
    /// empty (§4.2).
    pub fn serialize_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        let _ = write!(
            UnsafeVecWriter(&mut out),
            "HTTP/{}.{} {} {}\r\n",
            self.version.major,
            self.version.minor,
            self.status,
            self.reason
        );
        self.headers.write_to(&mut out);
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// A tiny `fmt::Write` shim over `Vec<u8>`, the same trick hyper's encoder
/// uses to format integers straight into the output buffer without an
/// intermediate `String`.
struct UnsafeVecWriter<'a>(&'a mut Vec<u8>);

impl std::fmt::Write for UnsafeVecWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Builds a synthetic response for the proxy's own error paths (400/502/503,
/// and the 400 substituted for a filter exception). Always carries
/// `Server` and `Content-Length: 0` (§6 "Default response bodies").
pub fn default_response(status: u16) -> Response {
    let mut resp = Response::new(status);
    resp.header("Server").push(concat!("pyroxide/", env!("CARGO_PKG_VERSION")));
    resp.header("Content-Length").push("0");
    resp
}

fn default_reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_case_insensitive_preserves_casing() {
        let mut h = Headers::new();
        h.header("Content-Type").push("text/plain");
        assert_eq!(h.get("content-type").unwrap().values(), ["text/plain"]);
        assert_eq!(h.get("content-type").unwrap().name(), "Content-Type");
    }

    #[test]
    fn multiple_occurrences_append_values() {
        let mut h = Headers::new();
        h.header("X-Foo").push("a");
        h.header("X-Foo").push("b");
        assert_eq!(h.get("x-foo").unwrap().values(), ["a", "b"]);
    }

    #[test]
    fn comma_separated_value_preserved_verbatim() {
        let mut h = Headers::new();
        h.header("Accept").push("text/html, application/json");
        assert_eq!(h.get("accept").unwrap().values(), ["text/html, application/json"]);
    }

    #[test]
    fn replace_header_drops_prior_values() {
        let mut h = Headers::new();
        h.header("X-Foo").push("a");
        h.replace("x-foo").push("b");
        assert_eq!(h.get("X-FOO").unwrap().values(), ["b"]);
    }

    #[test]
    fn request_round_trip_head() {
        let mut req = Request::new();
        req.method = "GET".into();
        req.url = "/x".into();
        req.header("Host").push("example.com");
        let bytes = req.serialize_head();
        assert_eq!(bytes, b"GET /x HTTP/1.1\r\nHost: example.com\r\n\r\n");
    }

    #[test]
    fn response_with_empty_reason() {
        let mut r = Response::new(599);
        r.reason.clear();
        let bytes = r.serialize_head();
        assert_eq!(bytes, b"HTTP/1.1 599 \r\n\r\n");
    }

    #[test]
    fn multi_value_header_joined_with_comma_on_serialize() {
        let mut req = Request::new();
        req.method = "GET".into();
        req.url = "/".into();
        req.header("X-Foo").push("a");
        req.header("X-Foo").push("b");
        let bytes = req.serialize_head();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("X-Foo: a, b\r\n"));
    }
}
