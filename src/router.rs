//! Upstream target selection (C4, §4.4).

use std::sync::Mutex;

use crate::error::{Error, Result};

/// The transport scheme for an upstream target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A route: an upstream target `(host, port, scheme)` (§GLOSSARY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
}

impl Route {
    pub fn new(host: impl Into<String>, port: u16, scheme: Scheme) -> Route {
        Route {
            host: host.into(),
            port,
            scheme,
        }
    }

    /// Parses `scheme://host[:port]`, defaulting the port to 80/443 per
    /// scheme when omitted. Grounded on pyrox's `parse_route_url`.
    pub fn parse(url: &str) -> Result<Route> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            (Scheme::Http, url)
        };
        let mut parts = rest.splitn(2, ':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(Error::new_no_route)?;
        let port = match parts.next() {
            Some(p) => p.parse().map_err(|_| Error::new_no_route())?,
            None => match scheme {
                Scheme::Http => 80,
                Scheme::Https => 443,
            },
        };
        Ok(Route::new(host, port, scheme))
    }

    /// The `host:port` authority this route resolves to (used to rewrite
    /// the outbound `Host` header, §4.6 step 1).
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// A stable key identifying this route in the connection pool (§4.5).
    pub fn pool_key(&self) -> String {
        format!(
            "{}://{}:{}",
            match self.scheme {
                Scheme::Http => "http",
                Scheme::Https => "https",
            },
            self.host,
            self.port
        )
    }
}

/// Round-robin route selector with a one-shot override (§4.4).
pub struct Router {
    routes: Vec<Route>,
    state: Mutex<RouterState>,
}

struct RouterState {
    next_index: usize,
    override_route: Option<Route>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Router {
        Router {
            routes,
            state: Mutex::new(RouterState {
                next_index: 0,
                override_route: None,
            }),
        }
    }

    /// Returns the next route by round-robin, consuming any pending
    /// one-shot override first. `Err` (`NO_ROUTE`) if nothing is
    /// configured and no override is set.
    pub fn get_next(&self) -> Result<Route> {
        let mut state = self.state.lock().unwrap();
        if let Some(route) = state.override_route.take() {
            return Ok(route);
        }
        if self.routes.is_empty() {
            return Err(Error::new_no_route());
        }
        let route = self.routes[state.next_index % self.routes.len()].clone();
        state.next_index = (state.next_index + 1) % self.routes.len();
        Ok(route)
    }

    /// Overrides the very next `get_next()` call, then clears (§4.4,
    /// filter `ROUTE(target)` action).
    pub fn set_next(&self, route: Route) {
        self.state.lock().unwrap().override_route = Some(route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_host_port() {
        let r = Route::parse("https://example.com:8443").unwrap();
        assert_eq!(r.host, "example.com");
        assert_eq!(r.port, 8443);
        assert_eq!(r.scheme, Scheme::Https);
    }

    #[test]
    fn parse_defaults_port_from_scheme() {
        let r = Route::parse("http://example.com").unwrap();
        assert_eq!(r.port, 80);
    }

    #[test]
    fn round_robin_cycles_and_resumes() {
        let router = Router::new(vec![
            Route::new("host0", 80, Scheme::Http),
            Route::new("host1", 80, Scheme::Http),
        ]);
        assert_eq!(router.get_next().unwrap().host, "host0");
        router.set_next(Route::new("host2", 80, Scheme::Http));
        assert_eq!(router.get_next().unwrap().host, "host2");
        // round robin resumes from its prior position (index 1 -> host1).
        assert_eq!(router.get_next().unwrap().host, "host1");
        assert_eq!(router.get_next().unwrap().host, "host0");
    }

    #[test]
    fn no_routes_and_no_override_is_no_route_error() {
        let router = Router::new(vec![]);
        assert!(router.get_next().unwrap_err().is_no_route());
    }
}
