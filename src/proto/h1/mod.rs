//! HTTP/1.1 wire protocol: the incremental parser (C1), token/keep-alive
//! rules shared by both message kinds (role), and the outbound chunk
//! encoder used when a filter forces content-length→chunked rewriting
//! (C6's framing rewriter).

mod encode;
mod parser;
mod role;

pub use encode::{encode_chunk, FINAL_CHUNK};
pub use parser::{Kind, ParseDelegate, Parser};
pub use role::is_token_char;
