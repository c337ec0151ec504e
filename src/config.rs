//! Ambient configuration (§6 "Config consumed"). Plain data; loading it
//! from a file or CLI is out of scope (§1) and left to the embedder.

use std::time::Duration;

use crate::router::Route;

/// Everything the core engine needs to run, independent of how an
/// embedder obtained it.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the proxy listens on.
    pub bind_host: String,
    pub bind_port: u16,
    /// Number of worker tasks; stands in for the source's forked worker
    /// processes (§5, §9) — here, concurrently spawned Tokio tasks
    /// sharing one listener via `SO_REUSEPORT`-free accept-loop fanout.
    pub worker_count: usize,
    /// Default upstream routes, consulted round-robin absent a filter
    /// override (§4.4).
    pub routes: Vec<Route>,
    /// Max idle upstream sockets kept per route (§4.5).
    pub pool_capacity: usize,
    /// How long a pooled upstream channel, or a half-open engine, may sit
    /// idle before it is closed (§5 "Cancellation/timeout" — a config
    /// knob, not a correctness constraint).
    pub idle_timeout: Duration,
    /// Maximum size of one outbound chunk when re-framing to chunked, or
    /// streaming an intercepted reply body (§GLOSSARY, §4.6).
    pub max_chunk_size: usize,
}

impl ProxyConfig {
    pub fn new(bind_host: impl Into<String>, bind_port: u16) -> ProxyConfig {
        ProxyConfig {
            bind_host: bind_host.into(),
            bind_port,
            worker_count: 1,
            routes: Vec::new(),
            pool_capacity: 5,
            idle_timeout: Duration::from_secs(60),
            max_chunk_size: 16 * 1024,
        }
    }

    pub fn with_routes(mut self, routes: Vec<Route>) -> ProxyConfig {
        self.routes = routes;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> ProxyConfig {
        self.pool_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ProxyConfig::new("0.0.0.0", 8080);
        assert_eq!(cfg.pool_capacity, 5);
        assert_eq!(cfg.max_chunk_size, 16 * 1024);
    }
}
