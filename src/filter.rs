//! The filter pipeline (C3, §4.3): ordered filters dispatched per hook,
//! aggregating into a single breaking [`Action`].

use std::sync::Arc;

use crate::message::{default_response, Request, Response};
use crate::router::Route;

/// A reply carried by [`Action::Reject`] or [`Action::Reply`]: a response
/// head plus an optional body blob to stream to the client.
#[derive(Debug, Clone)]
pub struct Reply {
    pub response: Response,
    pub body: Option<Vec<u8>>,
}

impl Reply {
    pub fn new(response: Response) -> Reply {
        Reply {
            response,
            body: None,
        }
    }

    pub fn with_body(response: Response, body: Vec<u8>) -> Reply {
        Reply {
            response,
            body: Some(body),
        }
    }
}

/// What a filter decided to do with one hook invocation (§4.3).
#[derive(Debug, Clone)]
pub enum Action {
    /// Continue the pipeline.
    Next,
    /// Halt the pipeline; drop the event, but the request still proceeds
    /// as if no filter had seen it (§9 open question resolution).
    Consume,
    /// Halt; send `reply` to the client, never contacting upstream.
    Reject(Reply),
    /// Halt; same wire effect as `Reject`, semantically an intentional
    /// reply rather than a rejection.
    Reply(Reply),
    /// Halt; bind this request to `target`, overriding the router.
    Route(Route),
}

impl Action {
    /// True for every variant except `Next` — the dispatch loop stops at
    /// the first one of these (§4.3 "Dispatch rules").
    pub fn is_breaking(&self) -> bool {
        !matches!(self, Action::Next)
    }

    fn filter_exception_default() -> Action {
        Action::Reject(Reply::new(default_response(400)))
    }
}

/// Which hooks a filter wants dispatched to it (§9 "Decorator-declared
/// capabilities" — a capability enum in place of introspecting method
/// arity).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hooks {
    pub request_head: bool,
    pub request_body: bool,
    pub response_head: bool,
    pub response_body: bool,
}

/// A pipeline participant. All four hooks default to "not interested" —
/// override `hooks()` and only the handlers you declared are ever called.
///
/// The response-side handlers always receive the originating request
/// (§9 "Arity-dependent dispatch": one fixed shape instead of introspecting
/// arity).
pub trait Filter: Send + Sync {
    fn hooks(&self) -> Hooks {
        Hooks::default()
    }

    fn on_request_head(&self, _req: &mut Request) -> crate::error::Result<Action> {
        Ok(Action::Next)
    }

    fn on_request_body(&self, _chunk: &[u8], _out: &mut Vec<u8>) -> crate::error::Result<Action> {
        Ok(Action::Next)
    }

    fn on_response_head(
        &self,
        _resp: &mut Response,
        _req: &Request,
    ) -> crate::error::Result<Action> {
        Ok(Action::Next)
    }

    fn on_response_body(
        &self,
        _chunk: &[u8],
        _out: &mut Vec<u8>,
        _req: &Request,
    ) -> crate::error::Result<Action> {
        Ok(Action::Next)
    }
}

/// An ordered collection of filters, one list per hook (§4.3 "four ordered
/// lists").
#[derive(Default, Clone)]
pub struct Pipeline {
    request_head: Vec<Arc<dyn Filter>>,
    request_body: Vec<Arc<dyn Filter>>,
    response_head: Vec<Arc<dyn Filter>>,
    response_body: Vec<Arc<dyn Filter>>,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline::default()
    }

    /// Appends `filter` to every hook list it declares interest in,
    /// preserving registration order within each list.
    pub fn register(&mut self, filter: Arc<dyn Filter>) {
        let hooks = filter.hooks();
        if hooks.request_head {
            self.request_head.push(filter.clone());
        }
        if hooks.request_body {
            self.request_body.push(filter.clone());
        }
        if hooks.response_head {
            self.response_head.push(filter.clone());
        }
        if hooks.response_body {
            self.response_body.push(filter);
        }
    }

    /// Whether any filter wants request body chunks — the engine uses
    /// this to decide whether to re-frame the outbound request body as
    /// chunked (§4.3, §4.6).
    pub fn intercepts_req_body(&self) -> bool {
        !self.request_body.is_empty()
    }

    /// Whether any filter wants response body chunks.
    pub fn intercepts_resp_body(&self) -> bool {
        !self.response_body.is_empty()
    }

    pub fn dispatch_request_head(&self, req: &mut Request) -> Action {
        for filter in &self.request_head {
            let action = filter.on_request_head(req).unwrap_or_else(|e| {
                tracing::error!(error = %e, "filter raised in on_request_head");
                Action::filter_exception_default()
            });
            if action.is_breaking() {
                return action;
            }
        }
        Action::Next
    }

    pub fn dispatch_request_body(&self, chunk: &[u8], out: &mut Vec<u8>) -> Action {
        for filter in &self.request_body {
            let action = filter.on_request_body(chunk, out).unwrap_or_else(|e| {
                tracing::error!(error = %e, "filter raised in on_request_body");
                Action::filter_exception_default()
            });
            if action.is_breaking() {
                return action;
            }
        }
        Action::Next
    }

    pub fn dispatch_response_head(&self, resp: &mut Response, req: &Request) -> Action {
        for filter in &self.response_head {
            let action = filter.on_response_head(resp, req).unwrap_or_else(|e| {
                tracing::error!(error = %e, "filter raised in on_response_head");
                Action::filter_exception_default()
            });
            if action.is_breaking() {
                return action;
            }
        }
        Action::Next
    }

    pub fn dispatch_response_body(&self, chunk: &[u8], out: &mut Vec<u8>, req: &Request) -> Action {
        for filter in &self.response_body {
            let action = filter
                .on_response_body(chunk, out, req)
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "filter raised in on_response_body");
                    Action::filter_exception_default()
                });
            if action.is_breaking() {
                return action;
            }
        }
        Action::Next
    }
}

/// A nullary factory for a fresh [`Pipeline`] (§6 "Filter registration
/// API"). In singleton mode the same `Arc<dyn Filter>` instances are
/// registered into a new `Pipeline` on every call instead of being
/// reconstructed.
pub type PipelineFactory = Arc<dyn Fn() -> Pipeline + Send + Sync>;
