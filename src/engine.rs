//! The per-connection stream engine (C6, §4.6): couples one downstream
//! socket to one upstream socket through two filter pipelines, driving
//! both incremental parsers and re-framing bodies when a filter requires
//! interception.
//!
//! §9 "Callback chains via class instance attributes" calls for modeling
//! the engine's many booleans as explicit state instead of loose flags.
//! Here that takes the shape of two small per-message event logs
//! (`ReqEvent`/`RespEvent`) that the parsers' delegates append to; the
//! engine drains and acts on them strictly in wire order after each
//! `execute` call, which is also how the "pre-connect body buffer" (§3)
//! falls out for free — body bytes that arrived before upstream was
//! connected are simply queued events processed right after the
//! `HeadersComplete` event that triggers the connect.
//!
//! §5 "cooperative backpressure by toggling read/write interest" is
//! realized here as plain sequential `await`: the engine never issues
//! another downstream read until the write it triggered has drained,
//! which is the async-task equivalent of pausing reads on one side while
//! a chunk drains on the other (§9 "Suspension points").

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::connect;
use crate::error::{Error, Result};
use crate::filter::{Action, PipelineFactory, Reply};
use crate::message::{default_response, Headers, Request, Response, Version};
use crate::pool::Pool;
use crate::proto::h1::{encode_chunk, Kind, ParseDelegate, Parser, FINAL_CHUNK};
use crate::router::Router;

const READ_BUF_SIZE: usize = 8 * 1024;

/// Everything the engine needs beyond the accepted downstream socket.
#[derive(Clone)]
pub struct EngineDeps {
    pub router: Arc<Router>,
    pub pool: Arc<Pool>,
    pub max_chunk_size: usize,
    pub request_pipeline: PipelineFactory,
    pub response_pipeline: PipelineFactory,
}

enum ReqEvent {
    HeadersComplete,
    Body(Vec<u8>, bool),
    Complete {
        is_chunked: bool,
        keep_alive: bool,
        trailers: Headers,
    },
}

#[derive(Default)]
struct RequestDelegate {
    request: Request,
    method_buf: Vec<u8>,
    url_buf: Vec<u8>,
    field_buf: Vec<u8>,
    value_buf: Vec<u8>,
    current_name: String,
    value_open: bool,
    headers_done: bool,
    trailers: Headers,
    events: Vec<ReqEvent>,
}

impl RequestDelegate {
    fn flush_current(&mut self) {
        if self.value_open {
            let value = String::from_utf8_lossy(&self.value_buf).into_owned();
            if self.headers_done {
                self.trailers.header(&self.current_name).push(value);
            } else {
                self.request.header(&self.current_name).push(value);
            }
            self.value_buf.clear();
            self.value_open = false;
        }
    }
}

impl ParseDelegate for RequestDelegate {
    fn on_req_method(&mut self, bytes: &[u8]) {
        self.method_buf.extend_from_slice(bytes);
    }

    fn on_req_path(&mut self, bytes: &[u8]) {
        self.url_buf.extend_from_slice(bytes);
    }

    fn on_http_version(&mut self, major: u8, minor: u8) {
        self.request.method = String::from_utf8_lossy(&self.method_buf).into_owned();
        self.request.url = String::from_utf8_lossy(&self.url_buf).into_owned();
        self.request.version = Version { major, minor };
    }

    fn on_header_field(&mut self, bytes: &[u8]) {
        if self.value_open {
            self.flush_current();
        }
        self.field_buf.extend_from_slice(bytes);
    }

    fn on_header_value(&mut self, bytes: &[u8]) {
        if !self.value_open {
            self.value_open = true;
            self.current_name = String::from_utf8_lossy(&self.field_buf).into_owned();
            self.field_buf.clear();
        }
        self.value_buf.extend_from_slice(bytes);
    }

    fn on_headers_complete(&mut self) {
        self.flush_current();
        self.headers_done = true;
        self.events.push(ReqEvent::HeadersComplete);
    }

    fn on_body(&mut self, bytes: &[u8], _length: u64, is_chunked: bool) {
        self.events.push(ReqEvent::Body(bytes.to_vec(), is_chunked));
    }

    fn on_message_complete(&mut self, is_chunked: bool, should_keep_alive: bool) {
        self.flush_current();
        self.events.push(ReqEvent::Complete {
            is_chunked,
            keep_alive: should_keep_alive,
            trailers: std::mem::take(&mut self.trailers),
        });
    }

    fn is_head_request(&self) -> bool {
        self.request.method.eq_ignore_ascii_case("HEAD")
    }
}

enum RespEvent {
    HeadersComplete,
    Body(Vec<u8>, bool),
    Complete {
        is_chunked: bool,
        keep_alive: bool,
        trailers: Headers,
    },
}

#[derive(Default)]
struct ResponseDelegate {
    response: Response,
    field_buf: Vec<u8>,
    value_buf: Vec<u8>,
    current_name: String,
    value_open: bool,
    headers_done: bool,
    trailers: Headers,
    events: Vec<RespEvent>,
}

impl ResponseDelegate {
    fn flush_current(&mut self) {
        if self.value_open {
            let value = String::from_utf8_lossy(&self.value_buf).into_owned();
            if self.headers_done {
                self.trailers.header(&self.current_name).push(value);
            } else {
                self.response.header(&self.current_name).push(value);
            }
            self.value_buf.clear();
            self.value_open = false;
        }
    }
}

impl ParseDelegate for ResponseDelegate {
    fn on_http_version(&mut self, major: u8, minor: u8) {
        self.response.version = Version { major, minor };
    }

    fn on_status(&mut self, code: u16) {
        self.response.status = code;
        self.response.reason.clear();
    }

    fn on_reason(&mut self, bytes: &[u8]) {
        self.response.reason.push_str(&String::from_utf8_lossy(bytes));
    }

    fn on_header_field(&mut self, bytes: &[u8]) {
        if self.value_open {
            self.flush_current();
        }
        self.field_buf.extend_from_slice(bytes);
    }

    fn on_header_value(&mut self, bytes: &[u8]) {
        if !self.value_open {
            self.value_open = true;
            self.current_name = String::from_utf8_lossy(&self.field_buf).into_owned();
            self.field_buf.clear();
        }
        self.value_buf.extend_from_slice(bytes);
    }

    fn on_headers_complete(&mut self) {
        self.flush_current();
        self.headers_done = true;
        self.events.push(RespEvent::HeadersComplete);
    }

    fn on_body(&mut self, bytes: &[u8], _length: u64, is_chunked: bool) {
        self.events.push(RespEvent::Body(bytes.to_vec(), is_chunked));
    }

    fn on_message_complete(&mut self, is_chunked: bool, should_keep_alive: bool) {
        self.flush_current();
        self.events.push(RespEvent::Complete {
            is_chunked,
            keep_alive: should_keep_alive,
            trailers: std::mem::take(&mut self.trailers),
        });
    }
}

/// Drives one accepted downstream connection until it closes, looping
/// over keep-alive requests (§4.6 "Keep-alive").
pub async fn serve_connection(mut downstream: TcpStream, deps: EngineDeps) -> Result<()> {
    loop {
        match serve_one_request(&mut downstream, &deps).await? {
            Outcome::KeepAlive => continue,
            Outcome::Close => return Ok(()),
        }
    }
}

enum Outcome {
    KeepAlive,
    Close,
}

async fn serve_one_request(downstream: &mut TcpStream, deps: &EngineDeps) -> Result<Outcome> {
    let mut req_parser = Parser::new(Kind::Request);
    let mut delegate = RequestDelegate::default();
    let mut read_buf = vec![0u8; READ_BUF_SIZE];

    let req_pipeline = (deps.request_pipeline)();
    let resp_pipeline = (deps.response_pipeline)();

    let mut upstream: Option<TcpStream> = None;
    let mut pool_key: Option<String> = None;
    let mut chunked_rewrite_out = false;
    let mut intercepted: Option<Reply> = None;
    let mut keep_alive_down = true;

    'request: loop {
        let n = downstream.read(&mut read_buf).await.map_err(Error::new_io)?;
        if n == 0 {
            if delegate.request.method.is_empty() {
                return Ok(Outcome::Close);
            }
            return Err(Error::new_incomplete());
        }
        req_parser.execute(&read_buf[..n], &mut delegate)?;
        let events = std::mem::take(&mut delegate.events);

        for event in events {
            match event {
                ReqEvent::HeadersComplete => {
                    let action = req_pipeline.dispatch_request_head(&mut delegate.request);
                    match action {
                        Action::Next | Action::Consume => {}
                        Action::Route(route) => deps.router.set_next(route),
                        Action::Reject(reply) | Action::Reply(reply) => {
                            intercepted = Some(reply);
                            break 'request;
                        }
                    }

                    let route = match deps.router.get_next() {
                        Ok(route) => route,
                        Err(_) => {
                            intercepted = Some(Reply::new(default_response(503)));
                            break 'request;
                        }
                    };
                    chunked_rewrite_out = req_pipeline.intercepts_req_body();

                    let key = route.pool_key();
                    let mut socket = match deps.pool.check_out(&key).await {
                        Some(s) => s,
                        None => match connect::connect(&route).await {
                            Ok(s) => s,
                            Err(_) => {
                                intercepted = Some(Reply::new(default_response(502)));
                                break 'request;
                            }
                        },
                    };
                    pool_key = Some(key);

                    delegate.request.replace_header("Host").push(route.authority());
                    if chunked_rewrite_out {
                        delegate.request.remove_header("Content-Length");
                        delegate
                            .request
                            .replace_header("Transfer-Encoding")
                            .push("chunked");
                    }

                    let head = delegate.request.serialize_head();
                    socket.write_all(&head).await.map_err(Error::new_io)?;
                    upstream = Some(socket);

                    if req_parser.has_expect_continue() {
                        downstream
                            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                            .await
                            .map_err(Error::new_io)?;
                    }
                }

                ReqEvent::Body(bytes, wire_chunked) => {
                    if intercepted.is_some() {
                        continue;
                    }
                    let mut out = Vec::new();
                    let action = req_pipeline.dispatch_request_body(&bytes, &mut out);
                    let payload: &[u8] = if out.is_empty() { &bytes } else { &out };
                    match action {
                        Action::Consume => {}
                        Action::Reject(reply) | Action::Reply(reply) => {
                            // The head was already forwarded; the safest
                            // honest behavior is to abandon that upstream
                            // attempt rather than pretend it never
                            // happened, and reply to the client instead.
                            if let Some(mut up) = upstream.take() {
                                let _ = up.shutdown().await;
                            }
                            intercepted = Some(reply);
                        }
                        Action::Next | Action::Route(_) => {
                            if let Some(up) = upstream.as_mut() {
                                write_body_chunk(up, payload, chunked_rewrite_out || wire_chunked)
                                    .await?;
                            }
                        }
                    }
                }

                ReqEvent::Complete {
                    is_chunked,
                    keep_alive,
                    trailers,
                } => {
                    keep_alive_down = keep_alive;
                    if intercepted.is_none() && (chunked_rewrite_out || is_chunked) {
                        if let Some(up) = upstream.as_mut() {
                            write_chunked_trailer(up, &trailers).await?;
                        }
                    }
                    break 'request;
                }
            }
        }

        if intercepted.is_some() {
            break 'request;
        }
    }

    if let Some(reply) = intercepted {
        write_reply(downstream, &reply, deps.max_chunk_size).await?;
        return Ok(Outcome::Close);
    }

    let mut upstream = upstream.expect("connected while handling HeadersComplete");

    let mut resp_parser = Parser::new(Kind::Response);
    let mut resp_delegate = ResponseDelegate::default();
    let mut resp_buf = vec![0u8; READ_BUF_SIZE];
    let mut sent_any = false;
    let mut keep_alive_up = true;
    let mut resp_chunked_rewrite = false;

    'response: loop {
        let n = match upstream.read(&mut resp_buf).await {
            Ok(0) => {
                if !sent_any {
                    write_reply(
                        downstream,
                        &Reply::new(default_response(502)),
                        deps.max_chunk_size,
                    )
                    .await?;
                    return Ok(Outcome::Close);
                }
                return Ok(Outcome::Close);
            }
            Ok(n) => n,
            Err(e) => {
                if !sent_any {
                    write_reply(
                        downstream,
                        &Reply::new(default_response(502)),
                        deps.max_chunk_size,
                    )
                    .await?;
                    return Ok(Outcome::Close);
                }
                return Err(Error::new_io(e));
            }
        };

        resp_parser.execute(&resp_buf[..n], &mut resp_delegate)?;
        let events = std::mem::take(&mut resp_delegate.events);

        for event in events {
            match event {
                RespEvent::HeadersComplete => {
                    let action = resp_pipeline
                        .dispatch_response_head(&mut resp_delegate.response, &delegate.request);
                    resp_chunked_rewrite = resp_pipeline.intercepts_resp_body();

                    if let Action::Reject(reply) | Action::Reply(reply) = action {
                        write_reply(downstream, &reply, deps.max_chunk_size).await?;
                        let _ = upstream.shutdown().await;
                        return Ok(Outcome::Close);
                    }

                    if resp_chunked_rewrite {
                        resp_delegate.response.remove_header("Content-Length");
                        resp_delegate
                            .response
                            .replace_header("Transfer-Encoding")
                            .push("chunked");
                    }
                    let head = resp_delegate.response.serialize_head();
                    downstream.write_all(&head).await.map_err(Error::new_io)?;
                    sent_any = true;
                }

                RespEvent::Body(bytes, wire_chunked) => {
                    let mut out = Vec::new();
                    let action =
                        resp_pipeline.dispatch_response_body(&bytes, &mut out, &delegate.request);
                    let payload: &[u8] = if out.is_empty() { &bytes } else { &out };
                    match action {
                        Action::Consume => {}
                        Action::Reject(_) | Action::Reply(_) => {
                            tracing::warn!(
                                "response body filter returned a breaking reply after the head \
                                 was already forwarded; dropping this chunk"
                            );
                        }
                        Action::Next | Action::Route(_) => {
                            write_body_chunk(
                                downstream,
                                payload,
                                resp_chunked_rewrite || wire_chunked,
                            )
                            .await?;
                        }
                    }
                }

                RespEvent::Complete {
                    is_chunked,
                    keep_alive,
                    trailers,
                } => {
                    keep_alive_up = keep_alive;
                    if resp_chunked_rewrite || is_chunked {
                        write_chunked_trailer(downstream, &trailers).await?;
                    }
                    break 'response;
                }
            }
        }
    }

    if keep_alive_down && keep_alive_up {
        if let Some(key) = pool_key {
            deps.pool.check_in(key, upstream);
        }
        Ok(Outcome::KeepAlive)
    } else {
        Ok(Outcome::Close)
    }
}

/// Writes the terminating chunk, carrying any trailer fields the parser
/// surfaced after the `0\r\n` (§4.1 "trailers"). Plain `FINAL_CHUNK` when
/// there are none, otherwise `0\r\n<trailer lines>\r\n`.
async fn write_chunked_trailer(stream: &mut TcpStream, trailers: &Headers) -> Result<()> {
    if trailers.is_empty() {
        return stream.write_all(FINAL_CHUNK).await.map_err(Error::new_io);
    }
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(b"0\r\n");
    trailers.write_to(&mut out);
    out.extend_from_slice(b"\r\n");
    stream.write_all(&out).await.map_err(Error::new_io)
}

async fn write_body_chunk(stream: &mut TcpStream, payload: &[u8], framed: bool) -> Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    if framed {
        let mut out = Vec::with_capacity(payload.len() + 16);
        encode_chunk(payload, &mut out);
        stream.write_all(&out).await.map_err(Error::new_io)
    } else {
        stream.write_all(payload).await.map_err(Error::new_io)
    }
}

/// Writes an intercepted reply's head, and — if it carries a body source —
/// its body, re-framed as chunked and split into `max_chunk_size` pieces
/// (§4.6 "Intercepted replies with a body source").
async fn write_reply(downstream: &mut TcpStream, reply: &Reply, max_chunk_size: usize) -> Result<()> {
    let mut response = reply.response.clone();
    match &reply.body {
        None => {
            let head = response.serialize_head();
            downstream.write_all(&head).await.map_err(Error::new_io)
        }
        Some(body) => {
            response.remove_header("Content-Length");
            response.replace_header("Transfer-Encoding").push("chunked");
            let head = response.serialize_head();
            downstream.write_all(&head).await.map_err(Error::new_io)?;
            for chunk in body.chunks(max_chunk_size.max(1)) {
                let mut framed = Vec::with_capacity(chunk.len() + 16);
                encode_chunk(chunk, &mut framed);
                downstream.write_all(&framed).await.map_err(Error::new_io)?;
            }
            downstream.write_all(FINAL_CHUNK).await.map_err(Error::new_io)
        }
    }
}
