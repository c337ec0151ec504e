//! Shared token and framing rules used by both the request and response
//! parser roles (§4.1).

/// RFC 7230 §3.2.6 `token` characters: everything but CTLs, SP, and
/// separators.
pub fn is_token_char(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9'
        | b'a'..=b'z'
        | b'A'..=b'Z'
    )
}

/// Method tokens are ASCII letters only per §4.1.
pub fn is_method_char(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

/// Parses a chunk-size hex digit, discarding any trailing `;extension`.
/// Case-insensitive; returns `None` on a non-hex digit.
pub fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// True if a (lowercased) `Connection` header value contains `close`,
/// as a comma-separated token list.
pub fn connection_has_close(value_lower: &str) -> bool {
    connection_has_token(value_lower, "close")
}

/// True if a (lowercased) `Connection` header value contains
/// `keep-alive`, as a comma-separated token list.
pub fn connection_has_keep_alive(value_lower: &str) -> bool {
    connection_has_token(value_lower, "keep-alive")
}

fn connection_has_token(value_lower: &str, token: &str) -> bool {
    value_lower
        .split(',')
        .any(|part| part.trim() == token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_chars() {
        assert!(is_token_char(b'A'));
        assert!(is_token_char(b'-'));
        assert!(!is_token_char(b' '));
        assert!(!is_token_char(b':'));
    }

    #[test]
    fn connection_tokens() {
        assert!(connection_has_close("keep-alive, close"));
        assert!(!connection_has_close("keep-alive"));
        assert!(connection_has_keep_alive("Keep-Alive".to_ascii_lowercase().as_str()));
    }
}
