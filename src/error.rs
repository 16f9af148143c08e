//! Error and Result types used throughout the crate.

use std::fmt;

/// A `Result` alias where the `Err` case is this crate's `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while fetching a [`Request`](crate::request::Request).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Establishing the underlying TCP connection failed.
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),

    /// The TLS handshake failed.
    #[error("tls error: {0}")]
    Tls(#[source] std::io::Error),

    /// No response was received within the request's configured timeout.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The HTTP transaction itself failed (malformed request/response, I/O
    /// error mid-transfer, etc).
    #[error("http error: {0}")]
    Http(#[source] hyper::Error),

    /// Building the outgoing request failed (bad header value, bad URI).
    #[error("malformed request: {0}")]
    Build(#[source] http::Error),

    /// The response body could not be decoded under its declared
    /// `Content-Encoding`.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] std::io::Error),

    /// The request required authentication this crate does not support, or
    /// the Auth Registry had no matching entry.
    #[error("authentication error: {0}")]
    Auth(&'static str),

    /// A hook preempted the request mid-transfer by returning a cancellation
    /// reason, rather than the transaction failing on its own.
    #[error("request canceled: {0}")]
    Preempted(String),

    /// The request followed more redirects than its `redirect_limit` allows.
    #[error("exceeded redirect limit")]
    Redirect,

    /// The URL could not be parsed or joined against a `Location` header.
    #[error("invalid url: {0}")]
    Url(#[source] url::ParseError),
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::Http(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::Build(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Url(err)
    }
}

/// Reason a hook gave for preempting an in-flight request.
///
/// Carried as a plain string rather than a thrown exception, per the
/// tagged-outcome preemption model: canceling a request is an expected,
/// first-class outcome, not a control-flow error.
#[derive(Debug, Clone)]
pub struct Cancel(pub String);

impl fmt::Display for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Cancel> for Error {
    fn from(cancel: Cancel) -> Self {
        Error::Preempted(cancel.0)
    }
}
