//! # pyroxide
//!
//! A streaming HTTP/1.1 reverse proxy with a programmable filter pipeline.
//!
//! Request and response streams are parsed incrementally ([`proto::h1`])
//! and each request head, request body chunk, response head, and
//! response body chunk is offered to a [`filter`] pipeline that may
//! observe, mutate, intercept, route, or drop the event. The
//! [`engine`] couples one downstream (client) socket to one upstream
//! (origin) socket, rewriting framing between content-length and
//! chunked transfer when a filter needs to see body bytes, and pooling
//! upstream sockets per [`router::Route`] across keep-alive requests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pyroxide::{config::ProxyConfig, filter::Pipeline, router::Route, Proxy};
//!
//! # async fn run() -> pyroxide::Result<()> {
//! let config = ProxyConfig::new("127.0.0.1", 8080)
//!     .with_routes(vec![Route::parse("http://localhost:9000")?]);
//! let proxy = Proxy::new(
//!     config,
//!     Arc::new(Pipeline::new),
//!     Arc::new(Pipeline::new),
//! );
//! proxy.run().await
//! # }
//! ```

use std::sync::Arc;

use tokio::net::TcpListener;

pub mod config;
pub mod connect;
pub mod engine;
pub mod error;
pub mod filter;
pub mod filters;
pub mod message;
mod proto;
pub mod pool;
pub mod router;

pub use crate::error::{Error, Result};

use crate::config::ProxyConfig;
use crate::engine::EngineDeps;
use crate::filter::PipelineFactory;
use crate::pool::Pool;
use crate::router::Router;

/// Owns the listening socket and the shared, per-worker-process resources
/// (§5 "Shared resources": the connection pool and router) that every
/// accepted connection's [`engine::serve_connection`] task borrows.
///
/// The source's single-threaded readiness loop per forked worker process
/// (C7, §9) is here a Tokio accept loop spawning one task per connection
/// on the shared multi-threaded runtime — each task drives its own engine
/// independently, the way each worker owned its sockets exclusively.
pub struct Proxy {
    config: Arc<ProxyConfig>,
    deps: EngineDeps,
}

impl Proxy {
    /// Builds a proxy from its configuration and the two pipeline
    /// factories (§6 "Filter registration API").
    pub fn new(
        config: ProxyConfig,
        request_pipeline: PipelineFactory,
        response_pipeline: PipelineFactory,
    ) -> Proxy {
        let router = Arc::new(Router::new(config.routes.clone()));
        let pool = Arc::new(Pool::new(config.pool_capacity));
        let max_chunk_size = config.max_chunk_size;
        Proxy {
            config: Arc::new(config),
            deps: EngineDeps {
                router,
                pool,
                max_chunk_size,
                request_pipeline,
                response_pipeline,
            },
        }
    }

    /// Binds the configured address and accepts connections until a
    /// fatal I/O error occurs. Each connection is handled by its own
    /// spawned task; a connection-level error is logged and does not
    /// bring down the listener (§7 "Propagation policy": errors surface
    /// only at the stream engine boundary).
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((self.config.bind_host.as_str(), self.config.bind_port))
            .await
            .map_err(Error::new_io)?;
        tracing::info!(
            addr = %listener.local_addr().map_err(Error::new_io)?,
            "pyroxide listening"
        );
        loop {
            let (socket, peer) = listener.accept().await.map_err(Error::new_io)?;
            let deps = self.deps.clone();
            tokio::spawn(async move {
                tracing::debug!(%peer, "accepted connection");
                if let Err(e) = engine::serve_connection(socket, deps).await {
                    tracing::debug!(%peer, error = %e, "connection closed");
                }
            });
        }
    }
}
