//! A handful of illustrative stock filters, grounded on pyrox's
//! `stock_filters` package. Not load-bearing for the engine — useful for
//! docs, tests, and as a template for writing new filters.

use crate::error::Result;
use crate::filter::{Action, Filter, Hooks};
use crate::message::{Request, Response};

/// Stamps every request's `Host` header with a fixed value before the
/// engine does its own authority rewrite — a no-op in practice since the
/// engine always rewrites `Host` to the selected route, but useful as the
/// simplest possible request-head filter.
#[derive(Debug, Clone)]
pub struct HostStamp {
    pub value: String,
}

impl Filter for HostStamp {
    fn hooks(&self) -> Hooks {
        Hooks {
            request_head: true,
            ..Hooks::default()
        }
    }

    fn on_request_head(&self, req: &mut Request) -> Result<Action> {
        req.replace_header("Host").push(self.value.clone());
        Ok(Action::Next)
    }
}

/// Adds a fixed response header, e.g. to mark traffic that passed through
/// the proxy. Declares no body hooks, so it never forces chunked
/// re-framing.
#[derive(Debug, Clone)]
pub struct TagResponse {
    pub header: String,
    pub value: String,
}

impl Filter for TagResponse {
    fn hooks(&self) -> Hooks {
        Hooks {
            response_head: true,
            ..Hooks::default()
        }
    }

    fn on_response_head(&self, resp: &mut Response, _req: &Request) -> Result<Action> {
        resp.header(&self.header).push(self.value.clone());
        Ok(Action::Next)
    }
}

/// Rejects every request outright. Useful in tests exercising §8 scenario
/// 2 ("reject before connect").
#[derive(Debug, Clone, Copy)]
pub struct RejectAll {
    pub status: u16,
}

impl Filter for RejectAll {
    fn hooks(&self) -> Hooks {
        Hooks {
            request_head: true,
            ..Hooks::default()
        }
    }

    fn on_request_head(&self, _req: &mut Request) -> Result<Action> {
        Ok(Action::Reject(crate::filter::Reply::new(
            crate::message::default_response(self.status),
        )))
    }
}

/// A transparent body filter that passes every chunk through unmodified.
/// Registering this is the simplest way to force `chunked_rewrite_out`
/// for testing (§8 scenario 4).
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughBody;

impl Filter for PassThroughBody {
    fn hooks(&self) -> Hooks {
        Hooks {
            request_body: true,
            ..Hooks::default()
        }
    }

    fn on_request_body(&self, chunk: &[u8], out: &mut Vec<u8>) -> Result<Action> {
        out.extend_from_slice(chunk);
        Ok(Action::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_stamp_rewrites_host() {
        let f = HostStamp {
            value: "pinned.example".into(),
        };
        let mut req = Request::new();
        req.header("Host").push("original.example");
        f.on_request_head(&mut req).unwrap();
        assert_eq!(req.get_header("host").unwrap().values(), ["pinned.example"]);
    }

    #[test]
    fn reject_all_returns_configured_status() {
        let f = RejectAll { status: 401 };
        let mut req = Request::new();
        match f.on_request_head(&mut req).unwrap() {
            Action::Reject(reply) => assert_eq!(reply.response.status, 401),
            other => panic!("expected Reject, got {:?}", other),
        }
    }
}
