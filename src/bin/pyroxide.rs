//! A minimal runnable binary wiring [`pyroxide::Proxy`] to a bind address,
//! a set of upstream routes, and the stock filters (`pyroxide::filters`).
//! Real deployments are expected to embed the library directly and build
//! their own filter set; this binary exists so the crate is runnable
//! out of the box.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use pyroxide::config::ProxyConfig;
use pyroxide::filter::Pipeline;
use pyroxide::filters::TagResponse;
use pyroxide::router::Route;
use pyroxide::Proxy;

fn init_logging() {
    #[cfg(feature = "logging")]
    {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let bind = env::var("PYROXIDE_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());
    let upstream = env::var("PYROXIDE_UPSTREAM").unwrap_or_else(|_| "http://127.0.0.1:9000".to_owned());

    let (host, port) = match bind.rsplit_once(':') {
        Some((h, p)) => match p.parse() {
            Ok(p) => (h.to_owned(), p),
            Err(_) => {
                eprintln!("invalid PYROXIDE_BIND port: {bind}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            eprintln!("PYROXIDE_BIND must be host:port, got {bind}");
            return ExitCode::FAILURE;
        }
    };

    let route = match Route::parse(&upstream) {
        Ok(route) => route,
        Err(e) => {
            eprintln!("invalid PYROXIDE_UPSTREAM: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = ProxyConfig::new(host, port).with_routes(vec![route]);

    let request_pipeline = Arc::new(Pipeline::new);
    let response_pipeline = Arc::new(|| {
        let mut p = Pipeline::new();
        p.register(Arc::new(TagResponse {
            header: "Via".to_owned(),
            value: "1.1 pyroxide".to_owned(),
        }));
        p
    });

    let proxy = Proxy::new(config, request_pipeline, response_pipeline);
    if let Err(e) = proxy.run().await {
        eprintln!("pyroxide exited: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
