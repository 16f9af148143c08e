//! `<scheme>_proxy` environment resolution plus a per-request override,
//! matching `serveNext`/`setURL` in the original fetcher
//! (`os.environ.get('%s_proxy' % scheme) or r.proxy`).

use url::Url;

/// The proxy target to dial instead of a request's own host, plus the
/// original target preserved for the outgoing request line and any
/// authentication lookups against the true origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    /// Proxy host to open the TCP connection to.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

/// Resolves the proxy (if any) that should be used for `url`.
///
/// Precedence: a request-level override always wins; otherwise the
/// `<scheme>_proxy` environment variable is consulted (e.g. `http_proxy`,
/// `https_proxy`), matching the original.
pub fn resolve(url: &Url, request_proxy: Option<&str>) -> Option<ProxyTarget> {
    let raw = if let Some(proxy) = request_proxy {
        Some(proxy.to_string())
    } else {
        let var = format!("{}_proxy", url.scheme());
        std::env::var(&var).ok().filter(|v| !v.is_empty())
    }?;

    let parsed = Url::parse(&raw).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed
        .port_or_known_default()
        .unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });
    Some(ProxyTarget { host, port })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so parallel test execution doesn't see each other's values.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn request_level_override_wins_over_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("http_proxy", "http://env-proxy.example.com:8080");
        let url = Url::parse("http://target.example.com/").unwrap();
        let target = resolve(&url, Some("http://override.example.com:9090")).unwrap();
        assert_eq!(target.host, "override.example.com");
        assert_eq!(target.port, 9090);
        std::env::remove_var("http_proxy");
    }

    #[test]
    fn falls_back_to_scheme_env_var() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("http_proxy", "http://env-proxy.example.com:8080");
        let url = Url::parse("http://target.example.com/").unwrap();
        let target = resolve(&url, None).unwrap();
        assert_eq!(target.host, "env-proxy.example.com");
        assert_eq!(target.port, 8080);
        std::env::remove_var("http_proxy");
    }

    #[test]
    fn no_proxy_configured_returns_none() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("http_proxy");
        let url = Url::parse("http://target.example.com/").unwrap();
        assert!(resolve(&url, None).is_none());
    }
}
