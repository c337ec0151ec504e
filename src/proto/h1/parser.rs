//! The incremental HTTP/1.1 parser (C1, §4.1).
//!
//! `Parser` drives a [`ParseDelegate`] with callbacks in strict wire order
//! as bytes arrive. It tolerates being fed one byte at a time — a header
//! field, value, or any other token may straddle an `execute` call, and
//! the parser resumes exactly where it left off.
//!
//! The delegate is a plain, synchronous trait: it only records what the
//! wire said (onto whatever message/flags the implementer owns). Any
//! asynchronous follow-up (running a filter pipeline, connecting upstream,
//! writing to a socket) happens in the caller, after `execute` returns,
//! by inspecting whatever the delegate recorded — the parser itself never
//! touches I/O.

use crate::error::{Error, Parse as ParseKind, Result};

/// Which side of the exchange a `Parser` instance parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
}

/// Callbacks invoked by [`Parser::execute`], in wire order (§4.1).
///
/// All methods have empty default bodies; implement only the ones you
/// need. None of them may fail — a delegate records state or stashes a
/// decision for its caller to act on later; it does not perform I/O.
pub trait ParseDelegate {
    fn on_message_begin(&mut self) {}
    fn on_req_method(&mut self, _bytes: &[u8]) {}
    fn on_req_path(&mut self, _bytes: &[u8]) {}
    fn on_http_version(&mut self, _major: u8, _minor: u8) {}
    fn on_status(&mut self, _code: u16) {}
    /// Reason-phrase bytes, one slice per call — may straddle `execute`
    /// calls like any other token. Not invoked when the status line has
    /// no reason phrase (`HTTP/1.1 204\r\n`).
    fn on_reason(&mut self, _bytes: &[u8]) {}
    fn on_header_field(&mut self, _bytes: &[u8]) {}
    fn on_header_value(&mut self, _bytes: &[u8]) {}
    fn on_headers_complete(&mut self) {}
    fn on_body(&mut self, _bytes: &[u8], _length: u64, _is_chunked: bool) {}
    fn on_message_complete(&mut self, _is_chunked: bool, _should_keep_alive: bool) {}

    /// Queried once headers are complete: true if this is a `HEAD`
    /// request, which never carries a body regardless of `Content-Length`
    /// (§4.6 body-framing decision). Responses ignore this.
    fn is_head_request(&self) -> bool {
        false
    }
}

const DEFAULT_MAX_SCRATCH: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    MessageBegin,
    ReqMethod,
    ReqUrl,
    ReqVersion,
    ReqVersionLf,
    RespVersion,
    RespStatusCode,
    RespStatusLf,
    RespReason,
    RespReasonLf,
    HeaderLineStart,
    HeaderLineStartCr,
    HeaderName,
    HeaderValueLeadingWs,
    HeaderValue,
    HeaderValueCr,
    BodyIdentity,
    BodyUntilClose,
    ChunkSizeDigits,
    ChunkExtension,
    ChunkSizeCr,
    ChunkSizeLf,
    ChunkData,
    ChunkDataCr,
    ChunkDataLf,
    TrailerHeaderLineStart,
    TrailerHeaderLineStartCr,
    TrailerHeaderName,
    TrailerValueLeadingWs,
    TrailerValue,
    TrailerValueCr,
    Done,
}

/// Tracks which well-known header is currently being accumulated, purely
/// for internal framing decisions (chunked vs content-length, keep-alive,
/// Expect: 100-continue). Bounded and case-folded; unrecognized/overlong
/// names simply never match and are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownHeader {
    None,
    ContentLength,
    TransferEncoding,
    Connection,
    Expect,
}

/// An incremental HTTP/1.1 request or response parser (§4.1, §3 "Parser
/// State").
pub struct Parser {
    kind: Kind,
    state: State,
    max_scratch: usize,
    /// Accumulates the version token ("HTTP/1.1") and status-code digits,
    /// the only tokens that need a full-token view before they can be
    /// validated and turned into a callback.
    scratch: Vec<u8>,
    /// Counts bytes of the *current* streamed token (method, url, header
    /// name/value, reason phrase) so a token that never terminates can
    /// still trip `PBUFFER_OVERFLOW` without the parser copying it.
    token_len: usize,

    current_header: KnownHeader,
    current_value_lower: Vec<u8>,

    version: (u8, u8),
    status_code: u16,
    chunked: bool,
    content_length: Option<u64>,
    bytes_read: u64,
    connection_close: bool,
    connection_keep_alive: bool,
    has_expect_continue: bool,
}

impl Parser {
    /// Creates a parser for the given message kind with the default
    /// (8 KiB) scratch bound.
    pub fn new(kind: Kind) -> Parser {
        Parser::with_max_scratch(kind, DEFAULT_MAX_SCRATCH)
    }

    pub fn with_max_scratch(kind: Kind, max_scratch: usize) -> Parser {
        Parser {
            kind,
            state: State::MessageBegin,
            max_scratch: max_scratch.max(DEFAULT_MAX_SCRATCH),
            scratch: Vec::with_capacity(16),
            token_len: 0,
            current_header: KnownHeader::None,
            current_value_lower: Vec::with_capacity(32),
            version: (0, 0),
            status_code: 0,
            chunked: false,
            content_length: None,
            bytes_read: 0,
            connection_close: false,
            connection_keep_alive: false,
            has_expect_continue: false,
        }
    }

    /// True once a full message (head + body) has been parsed and
    /// [`reset`](Parser::reset) has not yet been called.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// True while a body is still being streamed.
    pub fn in_body(&self) -> bool {
        matches!(
            self.state,
            State::BodyIdentity
                | State::BodyUntilClose
                | State::ChunkSizeDigits
                | State::ChunkExtension
                | State::ChunkSizeCr
                | State::ChunkSizeLf
                | State::ChunkData
                | State::ChunkDataCr
                | State::ChunkDataLf
                | State::TrailerHeaderLineStart
                | State::TrailerHeaderLineStartCr
                | State::TrailerHeaderName
                | State::TrailerValueLeadingWs
                | State::TrailerValue
                | State::TrailerValueCr
        )
    }

    /// Resets the parser to parse a fresh message on the same connection
    /// (§3 "Lifecycle": parsers are reset between requests on keep-alive).
    pub fn reset(&mut self) {
        let kind = self.kind;
        let max_scratch = self.max_scratch;
        *self = Parser::with_max_scratch(kind, max_scratch);
    }

    fn parse_error(&mut self, kind: ParseKind) -> Error {
        self.state = State::Done;
        match self.kind {
            Kind::Request => Error::new_client_parse(kind),
            Kind::Response => Error::new_origin_parse(kind),
        }
    }

    fn bump_token(&mut self, n: usize) -> std::result::Result<(), ParseKind> {
        self.token_len += n;
        if self.token_len > self.max_scratch {
            return Err(ParseKind::BufferOverflow);
        }
        Ok(())
    }

    /// Feeds `buf` to the parser, invoking `delegate`'s callbacks for
    /// every event that becomes available. Returns the number of bytes
    /// consumed (always `buf.len()` unless an error is returned — the
    /// parser never leaves bytes unconsumed on success).
    pub fn execute<D: ParseDelegate>(&mut self, buf: &[u8], delegate: &mut D) -> Result<usize> {
        let mut i = 0;
        if self.state == State::MessageBegin {
            delegate.on_message_begin();
            self.state = match self.kind {
                Kind::Request => State::ReqMethod,
                Kind::Response => State::RespVersion,
            };
        }

        while i < buf.len() {
            match self.state {
                State::MessageBegin => unreachable!("handled above"),

                State::ReqMethod => {
                    let start = i;
                    while i < buf.len() && buf[i] != b' ' {
                        if !super::role::is_method_char(buf[i]) {
                            return Err(self.parse_error(ParseKind::BadMethod));
                        }
                        i += 1;
                    }
                    if i > start {
                        self.bump_token(i - start)
                            .map_err(|e| self.parse_error(e))?;
                        delegate.on_req_method(&buf[start..i]);
                    }
                    if i < buf.len() {
                        i += 1; // consume SP
                        self.token_len = 0;
                        self.state = State::ReqUrl;
                    }
                }

                State::ReqUrl => {
                    let start = i;
                    while i < buf.len() && buf[i] != b' ' {
                        i += 1;
                    }
                    if i > start {
                        self.bump_token(i - start)
                            .map_err(|e| self.parse_error(e))?;
                        delegate.on_req_path(&buf[start..i]);
                    }
                    if i < buf.len() {
                        i += 1; // consume SP
                        self.token_len = 0;
                        self.state = State::ReqVersion;
                    }
                }

                State::ReqVersion => {
                    let start = i;
                    while i < buf.len() && buf[i] != b'\r' {
                        i += 1;
                    }
                    self.scratch.extend_from_slice(&buf[start..i]);
                    if self.scratch.len() > 16 {
                        return Err(self.parse_error(ParseKind::BadHttpVersion));
                    }
                    if i < buf.len() {
                        // saw CR
                        let (major, minor) = parse_version(&self.scratch)
                            .ok_or(ParseKind::BadHttpVersion)
                            .map_err(|e| self.parse_error(e))?;
                        self.version = (major, minor);
                        delegate.on_http_version(major, minor);
                        self.scratch.clear();
                        i += 1; // consume CR
                        self.state = State::ReqVersionLf;
                    }
                }

                State::ReqVersionLf => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadHttpVersion));
                    }
                    i += 1;
                    self.state = State::HeaderLineStart;
                }

                State::RespVersion => {
                    let start = i;
                    while i < buf.len() && buf[i] != b' ' {
                        i += 1;
                    }
                    self.scratch.extend_from_slice(&buf[start..i]);
                    if self.scratch.len() > 16 {
                        return Err(self.parse_error(ParseKind::BadHttpVersion));
                    }
                    if i < buf.len() {
                        let (major, minor) = parse_version(&self.scratch)
                            .ok_or(ParseKind::BadHttpVersion)
                            .map_err(|e| self.parse_error(e))?;
                        self.version = (major, minor);
                        delegate.on_http_version(major, minor);
                        self.scratch.clear();
                        i += 1; // consume SP
                        self.state = State::RespStatusCode;
                    }
                }

                State::RespStatusCode => {
                    let start = i;
                    while i < buf.len() && buf[i] != b' ' && buf[i] != b'\r' {
                        i += 1;
                    }
                    self.scratch.extend_from_slice(&buf[start..i]);
                    if self.scratch.len() > 3 {
                        return Err(self.parse_error(ParseKind::BadStatusCode));
                    }
                    if i < buf.len() {
                        if self.scratch.len() != 3 || !self.scratch.iter().all(u8::is_ascii_digit)
                        {
                            return Err(self.parse_error(ParseKind::BadStatusCode));
                        }
                        let code = (self.scratch[0] - b'0') as u16 * 100
                            + (self.scratch[1] - b'0') as u16 * 10
                            + (self.scratch[2] - b'0') as u16;
                        self.status_code = code;
                        delegate.on_status(code);
                        self.scratch.clear();
                        if buf[i] == b'\r' {
                            // no reason phrase
                            i += 1; // consume CR
                            self.state = State::RespStatusLf;
                        } else {
                            i += 1; // consume SP
                            self.token_len = 0;
                            self.state = State::RespReason;
                        }
                    }
                }

                State::RespStatusLf => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadStatusCode));
                    }
                    i += 1;
                    self.state = State::HeaderLineStart;
                }

                State::RespReason => {
                    let start = i;
                    while i < buf.len() && buf[i] != b'\r' {
                        i += 1;
                    }
                    if i > start {
                        self.bump_token(i - start)
                            .map_err(|e| self.parse_error(e))?;
                        delegate.on_reason(&buf[start..i]);
                    }
                    if i < buf.len() {
                        i += 1; // consume CR
                        self.state = State::RespReasonLf;
                    }
                }

                State::RespReasonLf => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadStatusCode));
                    }
                    i += 1;
                    self.state = State::HeaderLineStart;
                }

                State::HeaderLineStart => {
                    match buf[i] {
                        b'\r' => {
                            i += 1; // consume CR
                            self.state = State::HeaderLineStartCr;
                        }
                        b' ' | b'\t' => {
                            // obs-fold: continuation of the previous value.
                            while i < buf.len() && (buf[i] == b' ' || buf[i] == b'\t') {
                                i += 1;
                            }
                            delegate.on_header_value(b" ");
                            self.current_value_push(b" ");
                            self.state = State::HeaderValue;
                        }
                        _ => {
                            self.token_len = 0;
                            self.current_header = KnownHeader::None;
                            self.state = State::HeaderName;
                        }
                    }
                }

                State::HeaderLineStartCr => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadHeaderToken));
                    }
                    i += 1;
                    self.finish_headers(delegate)?;
                }

                State::HeaderName => {
                    let start = i;
                    while i < buf.len() && buf[i] != b':' {
                        if !super::role::is_token_char(buf[i]) {
                            return Err(self.parse_error(ParseKind::BadHeaderToken));
                        }
                        i += 1;
                    }
                    if i > start {
                        self.bump_token(i - start)
                            .map_err(|e| self.parse_error(e))?;
                        self.classify_header_name(&buf[start..i]);
                        delegate.on_header_field(&buf[start..i]);
                    }
                    if i < buf.len() {
                        i += 1; // consume ':'
                        self.current_value_lower.clear();
                        self.token_len = 0;
                        self.state = State::HeaderValueLeadingWs;
                    }
                }

                State::HeaderValueLeadingWs => {
                    while i < buf.len() && (buf[i] == b' ' || buf[i] == b'\t') {
                        i += 1;
                    }
                    if i < buf.len() {
                        self.state = State::HeaderValue;
                    }
                }

                State::HeaderValue => {
                    let start = i;
                    while i < buf.len() && buf[i] != b'\r' {
                        i += 1;
                    }
                    if i > start {
                        self.bump_token(i - start)
                            .map_err(|e| self.parse_error(e))?;
                        self.current_value_push(&buf[start..i]);
                        delegate.on_header_value(&buf[start..i]);
                    }
                    if i < buf.len() {
                        i += 1; // consume CR
                        self.state = State::HeaderValueCr;
                    }
                }

                State::HeaderValueCr => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadHeaderToken));
                    }
                    i += 1;
                    self.apply_known_header()
                        .map_err(|e| self.parse_error(e))?;
                    self.state = State::HeaderLineStart;
                }

                State::BodyIdentity => {
                    let remaining = self.content_length.unwrap_or(0) - self.bytes_read;
                    let take = (buf.len() - i).min(remaining as usize);
                    if take > 0 {
                        delegate.on_body(&buf[i..i + take], take as u64, false);
                        self.bytes_read += take as u64;
                        i += take;
                    }
                    if self.bytes_read >= self.content_length.unwrap_or(0) {
                        self.finish_message(delegate, false);
                    } else if take == 0 {
                        break;
                    }
                }

                State::BodyUntilClose => {
                    let take = buf.len() - i;
                    if take > 0 {
                        delegate.on_body(&buf[i..], take as u64, false);
                        i = buf.len();
                    }
                }

                State::ChunkSizeDigits => {
                    let start = i;
                    while i < buf.len() {
                        if super::role::hex_value(buf[i]).is_some() {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    self.scratch.extend_from_slice(&buf[start..i]);
                    if self.scratch.is_empty() && i < buf.len() && buf[i] != b';' && buf[i] != b'\r'
                    {
                        return Err(self.parse_error(ParseKind::BadChunkSize));
                    }
                    if i < buf.len() {
                        if self.scratch.is_empty() {
                            return Err(self.parse_error(ParseKind::BadChunkSize));
                        }
                        let size = parse_hex_u64(&self.scratch)
                            .ok_or(ParseKind::BadChunkSize)
                            .map_err(|e| self.parse_error(e))?;
                        self.scratch.clear();
                        self.content_length = Some(size);
                        self.bytes_read = 0;
                        self.state = if buf[i] == b';' {
                            i += 1;
                            State::ChunkExtension
                        } else {
                            State::ChunkSizeCr
                        };
                    }
                }

                State::ChunkExtension => {
                    while i < buf.len() && buf[i] != b'\r' {
                        i += 1;
                    }
                    if i < buf.len() {
                        self.state = State::ChunkSizeCr;
                    }
                }

                State::ChunkSizeCr => {
                    if buf[i] != b'\r' {
                        return Err(self.parse_error(ParseKind::BadChunkSize));
                    }
                    i += 1; // consume CR
                    self.state = State::ChunkSizeLf;
                }

                State::ChunkSizeLf => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadChunkSize));
                    }
                    i += 1;
                    self.state = if self.content_length == Some(0) {
                        State::TrailerHeaderLineStart
                    } else {
                        State::ChunkData
                    };
                }

                State::ChunkData => {
                    let remaining = self.content_length.unwrap_or(0) - self.bytes_read;
                    let take = (buf.len() - i).min(remaining as usize);
                    if take > 0 {
                        delegate.on_body(&buf[i..i + take], take as u64, true);
                        self.bytes_read += take as u64;
                        i += take;
                    }
                    if self.bytes_read >= self.content_length.unwrap_or(0) {
                        self.state = State::ChunkDataCr;
                    } else if take == 0 {
                        break;
                    }
                }

                State::ChunkDataCr => {
                    if buf[i] != b'\r' {
                        return Err(self.parse_error(ParseKind::BadChunkSize));
                    }
                    i += 1; // consume CR
                    self.state = State::ChunkDataLf;
                }

                State::ChunkDataLf => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadChunkSize));
                    }
                    i += 1;
                    self.scratch.clear();
                    self.state = State::ChunkSizeDigits;
                }

                State::TrailerHeaderLineStart => match buf[i] {
                    b'\r' => {
                        i += 1; // consume CR
                        self.state = State::TrailerHeaderLineStartCr;
                    }
                    _ => {
                        self.state = State::TrailerHeaderName;
                    }
                },

                State::TrailerHeaderLineStartCr => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadHeaderToken));
                    }
                    i += 1;
                    self.finish_message(delegate, true);
                }

                State::TrailerHeaderName => {
                    let start = i;
                    while i < buf.len() && buf[i] != b':' {
                        if !super::role::is_token_char(buf[i]) {
                            return Err(self.parse_error(ParseKind::BadHeaderToken));
                        }
                        i += 1;
                    }
                    if i > start {
                        delegate.on_header_field(&buf[start..i]);
                    }
                    if i < buf.len() {
                        i += 1;
                        self.state = State::TrailerValueLeadingWs;
                    }
                }

                State::TrailerValueLeadingWs => {
                    while i < buf.len() && (buf[i] == b' ' || buf[i] == b'\t') {
                        i += 1;
                    }
                    if i < buf.len() {
                        self.state = State::TrailerValue;
                    }
                }

                State::TrailerValue => {
                    let start = i;
                    while i < buf.len() && buf[i] != b'\r' {
                        i += 1;
                    }
                    if i > start {
                        delegate.on_header_value(&buf[start..i]);
                    }
                    if i < buf.len() {
                        i += 1;
                        self.state = State::TrailerValueCr;
                    }
                }

                State::TrailerValueCr => {
                    if buf[i] != b'\n' {
                        return Err(self.parse_error(ParseKind::BadHeaderToken));
                    }
                    i += 1;
                    self.state = State::TrailerHeaderLineStart;
                }

                State::Done => break,
            }
        }

        Ok(i)
    }

    fn current_value_push(&mut self, bytes: &[u8]) {
        if self.current_value_lower.len() < 256 {
            for &b in bytes {
                if self.current_value_lower.len() >= 256 {
                    break;
                }
                self.current_value_lower.push(b.to_ascii_lowercase());
            }
        }
    }

    fn classify_header_name(&mut self, name: &[u8]) {
        self.current_header = if name.eq_ignore_ascii_case(b"content-length") {
            KnownHeader::ContentLength
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            KnownHeader::TransferEncoding
        } else if name.eq_ignore_ascii_case(b"connection") {
            KnownHeader::Connection
        } else if name.eq_ignore_ascii_case(b"expect") {
            KnownHeader::Expect
        } else {
            KnownHeader::None
        };
    }

    fn apply_known_header(&mut self) -> std::result::Result<(), ParseKind> {
        let value = String::from_utf8_lossy(&self.current_value_lower).into_owned();
        match self.current_header {
            KnownHeader::ContentLength => {
                let n: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| ParseKind::BadContentLength)?;
                // Transfer-Encoding: chunked wins over Content-Length (§4.1).
                if !self.chunked {
                    self.content_length = Some(n);
                }
            }
            KnownHeader::TransferEncoding => {
                if value.split(',').any(|p| p.trim() == "chunked") {
                    self.chunked = true;
                    self.content_length = None;
                }
            }
            KnownHeader::Connection => {
                if super::role::connection_has_close(&value) {
                    self.connection_close = true;
                }
                if super::role::connection_has_keep_alive(&value) {
                    self.connection_keep_alive = true;
                }
            }
            KnownHeader::Expect => {
                if value.trim() == "100-continue" {
                    self.has_expect_continue = true;
                }
            }
            KnownHeader::None => {}
        }
        self.current_header = KnownHeader::None;
        Ok(())
    }

    fn should_keep_alive(&self) -> bool {
        if self.connection_close {
            return false;
        }
        if self.version.0 == 1 && self.version.1 == 0 {
            self.connection_keep_alive
        } else {
            true
        }
    }

    /// True if the request carried `Expect: 100-continue` (§4.6).
    pub fn has_expect_continue(&self) -> bool {
        self.has_expect_continue
    }

    fn finish_headers<D: ParseDelegate>(&mut self, delegate: &mut D) -> Result<()> {
        delegate.on_headers_complete();
        let no_body = delegate.is_head_request()
            || (self.kind == Kind::Response
                && matches!(self.status_code, 100..=199 | 204 | 304));
        self.state = if self.chunked && !no_body {
            State::ChunkSizeDigits
        } else if no_body {
            self.finish_message(delegate, self.chunked);
            State::Done
        } else {
            match self.content_length {
                Some(0) => {
                    self.finish_message(delegate, false);
                    State::Done
                }
                Some(_) => State::BodyIdentity,
                None if self.kind == Kind::Response => State::BodyUntilClose,
                None => {
                    self.finish_message(delegate, false);
                    State::Done
                }
            }
        };
        Ok(())
    }

    fn finish_message<D: ParseDelegate>(&mut self, delegate: &mut D, is_chunked: bool) {
        let keep_alive = self.should_keep_alive();
        delegate.on_message_complete(is_chunked, keep_alive);
        self.state = State::Done;
    }
}

fn parse_version(bytes: &[u8]) -> Option<(u8, u8)> {
    let s = std::str::from_utf8(bytes).ok()?;
    let rest = s.strip_prefix("HTTP/")?;
    let mut parts = rest.splitn(2, '.');
    let major = parts.next()?;
    let minor = parts.next()?;
    if major.len() != 1 || minor.len() != 1 {
        return None;
    }
    let major = major.as_bytes()[0];
    let minor = minor.as_bytes()[0];
    if !major.is_ascii_digit() || !minor.is_ascii_digit() {
        return None;
    }
    Some((major - b'0', minor - b'0'))
}

fn parse_hex_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 16 {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        n = n.checked_mul(16)?.checked_add(super::role::hex_value(b)? as u64)?;
    }
    Some(n)
}
