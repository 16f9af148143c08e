//! `Request`: an immutable description of one fetch plus the mutable
//! lifecycle state tracked while it is in flight, and the hook table a
//! caller attaches to observe it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::error::Error;

/// Where a `Request` currently sits in its lifecycle.
///
/// `Success`, `Error`, and `Canceled` are terminal: `RequestState::transition`
/// refuses (in debug builds, via `debug_assert!`) to leave a terminal state,
/// since that would mean some code path fired a second completion hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Waiting in the Engine's ready or retry queue.
    Queued,
    /// A `Servicer` currently owns this request and is driving a connection.
    InFlight,
    /// A previous attempt failed and this request is waiting out its
    /// backoff delay before being requeued.
    RetryWaiting,
    /// Completed with a response (regardless of HTTP status code).
    Success,
    /// Exhausted its retries, hit the redirect limit, or failed some other
    /// non-recoverable way.
    Error,
    /// A hook preempted the request mid-transfer.
    Canceled,
}

/// Hooks a caller can attach to observe one request's progress.
///
/// Modeled as a table of `Arc<dyn Fn>` capabilities rather than overridable
/// methods on a base class: there is no subclassing in Rust, and a capability
/// table composes by construction (each hook is independently optional)
/// rather than requiring a full override of a virtual method.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Called each time the effective URL changes (initial dispatch, and
    /// again on every redirect hop).
    pub on_url: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Called once the response status line is known. May return a
    /// [`crate::error::Cancel`] to preempt the transfer before any body is
    /// read.
    pub on_status: Option<Arc<dyn Fn(u16) -> Option<crate::error::Cancel> + Send + Sync>>,
    /// Called once response headers are known. May return a `Cancel` to
    /// preempt the transfer before the body is read.
    pub on_headers: Option<Arc<dyn Fn(&HeaderMap) -> Option<crate::error::Cancel> + Send + Sync>>,
    /// Called with the fully decoded response body on success.
    pub on_success: Option<Arc<dyn Fn(&Response) + Send + Sync>>,
    /// Called if the request ultimately fails (including preemption).
    pub on_error: Option<Arc<dyn Fn(&Error) + Send + Sync>>,
    /// Called exactly once, after `on_success` or `on_error`, regardless of
    /// outcome — the request's one true completion signal.
    pub on_done: Option<Arc<dyn Fn(&Request) + Send + Sync>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_url", &self.on_url.is_some())
            .field("on_status", &self.on_status.is_some())
            .field("on_headers", &self.on_headers.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

/// The decoded response handed to `on_success`.
#[derive(Debug, Clone)]
pub struct Response {
    /// The final HTTP status code, after any redirects were followed.
    pub status: u16,
    /// The final response headers.
    pub headers: HeaderMap,
    /// The response body, already decompressed per `Content-Encoding`.
    pub body: Bytes,
    /// True if a proxy reported this response came from its cache
    /// (`X-Cache: HIT`); always `true` for requests that never touched a
    /// proxy, matching the original fetcher (see `DESIGN.md`).
    pub cached: bool,
}

/// Mutable fields tracked while a request is in flight, guarded by a single
/// `Mutex` since hooks may run on the Callback runner while the Dispatcher
/// reads timing/lifecycle state concurrently.
#[derive(Debug)]
pub struct RequestState {
    /// Current point in the lifecycle state machine.
    pub lifecycle: Lifecycle,
    /// The URL this request is currently pointed at (mutates on redirect).
    pub effective_url: String,
    /// Number of redirect hops followed so far.
    pub redirects_followed: u32,
    /// Number of retry attempts made so far.
    pub retries: u32,
    /// When the current attempt began.
    pub started_at: Option<Instant>,
    /// Total elapsed time once the request reaches a terminal state.
    pub elapsed: Option<Duration>,
    /// `Content-Encoding` reported by the most recent response headers.
    pub encoding: Option<String>,
    /// Best-effort cookie jar: cookie name to value, echoed on redirect hops
    /// to the same host. Not origin-aware; see `SPEC_FULL.md` §4.2.
    pub cookies: std::collections::HashMap<String, String>,
}

impl RequestState {
    fn new(url: String) -> Self {
        RequestState {
            lifecycle: Lifecycle::Queued,
            effective_url: url,
            redirects_followed: 0,
            retries: 0,
            started_at: None,
            elapsed: None,
            encoding: None,
            cookies: std::collections::HashMap::new(),
        }
    }

    /// Moves to `next`, enforcing that a terminal state never transitions
    /// again. This is an internal invariant check (a bug in the engine
    /// would trip it), not a user-facing validation.
    pub fn transition(&mut self, next: Lifecycle) {
        debug_assert!(
            !matches!(
                self.lifecycle,
                Lifecycle::Success | Lifecycle::Error | Lifecycle::Canceled
            ),
            "attempted to leave terminal lifecycle state {:?} for {:?}",
            self.lifecycle,
            next,
        );
        trace!("request {} lifecycle {:?} -> {:?}", self.effective_url, self.lifecycle, next);
        self.lifecycle = next;
    }
}

/// An immutable description of one fetch, plus its mutable in-flight state.
pub struct Request {
    /// The URL as originally given; `state.effective_url` tracks redirects.
    pub url: String,
    /// HTTP method, default `GET`.
    pub method: Method,
    /// Extra headers to send on every attempt.
    pub headers: HeaderMap,
    /// Request body, if any (e.g. for `POST`).
    pub body: Option<Bytes>,
    /// Per-attempt timeout. Default 45s, matching the original fetcher.
    pub timeout: Duration,
    /// Maximum redirects to follow before failing with `Error::Redirect`.
    /// Default 10.
    pub redirect_limit: u32,
    /// Whether to follow redirects at all. Default `true`.
    pub follow_redirect: bool,
    /// Maximum retry attempts on connect/timeout failure. Default 0.
    pub retry_max: u32,
    /// Explicit proxy URL overriding the `<scheme>_proxy` environment
    /// variable, if set.
    pub proxy: Option<String>,
    /// Observer hooks.
    pub hooks: Hooks,
    /// Mutable lifecycle state.
    pub state: Mutex<RequestState>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("redirect_limit", &self.redirect_limit)
            .field("follow_redirect", &self.follow_redirect)
            .field("retry_max", &self.retry_max)
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl Request {
    /// Starts building a request for `url` with the default hooks and
    /// limits described in `SPEC_FULL.md` §3.
    pub fn builder(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(url)
    }

    /// Default `on_status` behavior when the caller didn't attach one:
    /// log non-2xx statuses, matching the original fetcher's default.
    pub(crate) fn log_default_status(status: u16) {
        if !(200..300).contains(&status) {
            error!("non-2xx status {status}");
        }
    }
}

/// Builder for [`Request`], mirroring the teacher's chained
/// `fn foo(mut self, val: T) -> Self` style.
pub struct RequestBuilder {
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Duration,
    redirect_limit: u32,
    follow_redirect: bool,
    retry_max: u32,
    proxy: Option<String>,
    hooks: Hooks,
}

impl RequestBuilder {
    fn new(url: impl Into<String>) -> Self {
        RequestBuilder {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: Duration::from_secs(45),
            redirect_limit: 10,
            follow_redirect: true,
            retry_max: 0,
            proxy: None,
            hooks: Hooks::default(),
        }
    }

    /// Sets the HTTP method. Default `GET`.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a header to send on every attempt.
    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the per-attempt timeout. Default 45s.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the redirect limit. Default 10.
    pub fn redirect_limit(mut self, limit: u32) -> Self {
        self.redirect_limit = limit;
        self
    }

    /// Enables or disables redirect following. Default enabled.
    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.follow_redirect = follow;
        self
    }

    /// Sets the maximum retry count on connect/timeout failure. Default 0.
    pub fn retry_max(mut self, retries: u32) -> Self {
        self.retry_max = retries;
        self
    }

    /// Overrides the `<scheme>_proxy` environment variable for this request.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the callback invoked on each URL change (initial + redirects).
    pub fn on_url(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.on_url = Some(Arc::new(hook));
        self
    }

    /// Sets the callback invoked once the status line is known.
    pub fn on_status(
        mut self,
        hook: impl Fn(u16) -> Option<crate::error::Cancel> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_status = Some(Arc::new(hook));
        self
    }

    /// Sets the callback invoked once headers are known.
    pub fn on_headers(
        mut self,
        hook: impl Fn(&HeaderMap) -> Option<crate::error::Cancel> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_headers = Some(Arc::new(hook));
        self
    }

    /// Sets the callback invoked on success.
    pub fn on_success(mut self, hook: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.hooks.on_success = Some(Arc::new(hook));
        self
    }

    /// Sets the callback invoked on failure.
    pub fn on_error(mut self, hook: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Sets the callback invoked exactly once at completion.
    pub fn on_done(mut self, hook: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.hooks.on_done = Some(Arc::new(hook));
        self
    }

    /// Finishes the builder, producing an `Arc<Request>` ready to `push`
    /// onto an `Engine`.
    pub fn build(self) -> Arc<Request> {
        let state = RequestState::new(self.url.clone());
        Arc::new(Request {
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
            redirect_limit: self.redirect_limit,
            follow_redirect: self.follow_redirect,
            retry_max: self.retry_max,
            proxy: self.proxy,
            hooks: self.hooks,
            state: Mutex::new(state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_fetcher() {
        let req = Request::builder("http://example.com/").build();
        assert_eq!(req.timeout, Duration::from_secs(45));
        assert_eq!(req.redirect_limit, 10);
        assert!(req.follow_redirect);
        assert_eq!(req.retry_max, 0);
        assert_eq!(req.state.lock().unwrap().lifecycle, Lifecycle::Queued);
    }

    #[test]
    #[should_panic]
    fn transition_out_of_terminal_state_panics_in_debug() {
        let mut state = RequestState::new("http://example.com/".into());
        state.transition(Lifecycle::Success);
        state.transition(Lifecycle::InFlight);
    }
}
