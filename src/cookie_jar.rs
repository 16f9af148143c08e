//! A minimal, best-effort cookie jar.
//!
//! Not origin-aware and not a full `Set-Cookie` parser: it only extracts
//! `name=value` pairs and echoes them back on redirect hops to the same
//! host, matching the original fetcher's treatment of cookies as a
//! non-fatal convenience rather than a correctness-critical feature.

use http::HeaderMap;
use std::collections::HashMap;

/// Parses `Set-Cookie` headers from `headers` into `jar`, overwriting any
/// existing value for the same cookie name.
pub fn absorb(jar: &mut HashMap<String, String>, headers: &HeaderMap) {
    for value in headers.get_all(http::header::SET_COOKIE) {
        let Ok(text) = value.to_str() else { continue };
        let Some(pair) = text.split(';').next() else { continue };
        if let Some((name, val)) = pair.split_once('=') {
            jar.insert(name.trim().to_string(), val.trim().to_string());
        }
    }
}

/// Renders the jar as a `Cookie:` header value, or `None` if empty.
pub fn render(jar: &HashMap<String, String>) -> Option<String> {
    if jar.is_empty() {
        return None;
    }
    Some(
        jar.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorbs_and_renders_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(
            http::header::SET_COOKIE,
            "session=abc123; Path=/; HttpOnly".parse().unwrap(),
        );
        let mut jar = HashMap::new();
        absorb(&mut jar, &headers);
        assert_eq!(render(&jar), Some("session=abc123".to_string()));
    }

    #[test]
    fn empty_jar_renders_none() {
        assert_eq!(render(&HashMap::new()), None);
    }
}
