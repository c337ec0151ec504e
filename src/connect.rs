//! Opens a fresh upstream socket for a route (§4.6 "CONNECTING").
//!
//! TLS is out of scope (§1); an `Https` route still connects a plain TCP
//! socket here — wrapping the transport is left to the embedder (§1 "the
//! transport may be wrapped").

use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::router::Route;

pub async fn connect(route: &Route) -> Result<TcpStream> {
    TcpStream::connect((route.host.as_str(), route.port))
        .await
        .map_err(Error::new_connect)
}
