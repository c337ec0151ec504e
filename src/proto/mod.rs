//! Wire protocol implementations. Only HTTP/1.1 (C1/C6) is supported.

pub(crate) mod h1;
