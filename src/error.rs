//! Error and Result types for the proxy engine.

use std::error::Error as StdError;
use std::fmt;

/// Result type returned from proxy engine operations.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Opaque error type covering everything the engine, parser, pipeline,
/// router and pool can fail with.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// A malformed request arrived from downstream. §7 CLIENT_PROTOCOL.
    ClientProtocol(Parse),
    /// A malformed response arrived from upstream. §7 ORIGIN_PROTOCOL.
    OriginProtocol(Parse),
    /// No route is configured and no override was set.
    NoRoute,
    /// Failed to connect, or lost, the upstream socket.
    Connect,
    /// I/O error while reading or writing either side of the connection.
    Io,
    /// A filter's handler raised; dispatch policy treats this as REJECT 400.
    Filter,
    /// The connection closed before a message in flight completed.
    IncompleteMessage,
}

/// Parse failure kinds, matching the HTTP Parser's (§4.1) failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse {
    BadState,
    BadMethod,
    BadHttpVersion,
    BadHeaderToken,
    BadContentLength,
    BadChunkSize,
    BadStatusCode,
    BufferOverflow,
}

impl Parse {
    fn description(self) -> &'static str {
        match self {
            Parse::BadState => "parser invoked in an invalid state",
            Parse::BadMethod => "invalid request method token",
            Parse::BadHttpVersion => "invalid HTTP version",
            Parse::BadHeaderToken => "invalid header field-name token",
            Parse::BadContentLength => "invalid Content-Length value",
            Parse::BadChunkSize => "invalid chunk size",
            Parse::BadStatusCode => "invalid status code",
            Parse::BufferOverflow => "scratch buffer exceeded its bound",
        }
    }
}

impl Error {
    /// True if this is a protocol error from the downstream (client) side.
    pub fn is_client_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::ClientProtocol(_))
    }

    /// True if this is a protocol error from the upstream (origin) side.
    pub fn is_origin_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::OriginProtocol(_))
    }

    /// True if routing failed because no route was available.
    pub fn is_no_route(&self) -> bool {
        matches!(self.inner.kind, Kind::NoRoute)
    }

    /// True if this was a connect or upstream I/O error.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// True if a filter handler raised.
    pub fn is_filter(&self) -> bool {
        matches!(self.inner.kind, Kind::Filter)
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn new_client_parse(p: Parse) -> Error {
        Error::new(Kind::ClientProtocol(p))
    }

    pub(crate) fn new_origin_parse(p: Parse) -> Error {
        Error::new(Kind::OriginProtocol(p))
    }

    pub(crate) fn new_no_route() -> Error {
        Error::new(Kind::NoRoute)
    }

    pub(crate) fn new_connect<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_filter<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Filter).with(cause)
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::ClientProtocol(p) => p.description(),
            Kind::OriginProtocol(p) => p.description(),
            Kind::NoRoute => "no route available",
            Kind::Connect => "error connecting to upstream",
            Kind::Io => "connection I/O error",
            Kind::Filter => "filter handler raised an error",
            Kind::IncompleteMessage => "connection closed before message completed",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("pyroxide::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::new_io(e)
    }
}

#[doc(hidden)]
trait AssertSendSync: Send + Sync + 'static {}
#[doc(hidden)]
impl AssertSendSync for Error {}
