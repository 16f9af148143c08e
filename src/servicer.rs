//! `Servicer`: drives one request's connection(s) to completion.
//!
//! Owns redirect joining, proxy target rewriting, status/header reception
//! (including the cache flag, `Content-Encoding`, and cookie jar), basic-auth
//! header construction, mid-transfer cancellation, and response
//! decompression — mirroring `BaseRequestServicer` in the original fetcher
//! (`setURL`, `gotHeaders`, `gotStatus`, `cancel`).

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, Request as HttpRequest, Uri};
use http_body_util::{BodyExt, Empty, Full};
use hyper::client::conn::http1;
use url::Url;

use crate::auth::AuthRegistry;
use crate::connect::Connect;
use crate::cookie_jar;
use crate::error::{Error, Result};
use crate::proxy;
use crate::request::{Lifecycle, Request, Response};

/// Whether a failed attempt is worth retrying (connect refused, timed out)
/// or is final (bad URL, redirect limit, preemption, decode failure).
pub enum Outcome {
    /// The request completed, successfully or not; no further action needed
    /// from the Engine beyond firing hooks.
    Done(Result<Response>),
    /// A transient failure occurred; the Engine should requeue this request
    /// after its backoff delay if retries remain.
    Retry(Error),
}

/// Drives `request` to completion: connects (through a proxy if one
/// resolves), sends the request, follows redirects, and decodes the body.
pub async fn run(
    request: Arc<Request>,
    auth: AuthRegistry,
    connector: Arc<dyn Connect>,
) -> Outcome {
    match run_inner(&request, &auth, connector.as_ref()).await {
        Ok(response) => Outcome::Done(Ok(response)),
        Err(AttemptError::Retryable(err)) => Outcome::Retry(err),
        Err(AttemptError::Fatal(err)) => Outcome::Done(Err(err)),
    }
}

enum AttemptError {
    Retryable(Error),
    Fatal(Error),
}

async fn run_inner(
    request: &Arc<Request>,
    auth: &AuthRegistry,
    connector: &dyn Connect,
) -> std::result::Result<Response, AttemptError> {
    let mut current_url = {
        let state = request.state.lock().unwrap();
        state.effective_url.clone()
    };
    {
        let mut state = request.state.lock().unwrap();
        state.transition(Lifecycle::InFlight);
        state.started_at = Some(crate::clock::Clock::now());
    }
    if let Some(hook) = &request.hooks.on_url {
        hook(&current_url);
    }

    let mut cached = true;
    loop {
        let url = Url::parse(&current_url).map_err(|e| AttemptError::Fatal(e.into()))?;
        let target = proxy::resolve(&url, request.proxy.as_deref());

        let (connect_host, connect_port, request_uri) = match &target {
            Some(t) => (t.host.clone(), t.port, current_url.clone()),
            None => {
                let host = url
                    .host_str()
                    .ok_or_else(|| AttemptError::Fatal(Error::Auth("request url has no host")))?
                    .to_string();
                let port = url
                    .port_or_known_default()
                    .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
                let path = if url.query().is_some() {
                    format!("{}?{}", url.path(), url.query().unwrap())
                } else {
                    url.path().to_string()
                };
                (host, port, path)
            }
        };

        let tls = target.is_none() && url.scheme() == "https";

        let io = tokio::time::timeout(
            request.timeout,
            connector.connect(connect_host.clone(), connect_port, tls),
        )
        .await
        .map_err(|_| AttemptError::Retryable(Error::Timeout))?
        .map_err(AttemptError::Retryable)?;

        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| AttemptError::Retryable(Error::Http(e)))?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                warn!("connection driver error: {err}");
            }
        });

        let host_header = url.host_str().unwrap_or_default().to_string();
        let mut builder = HttpRequest::builder()
            .method(request.method.clone())
            .uri(request_uri.parse::<Uri>().map_err(|_| {
                AttemptError::Fatal(Error::Auth("invalid request uri"))
            })?)
            .header(http::header::HOST, &host_header)
            .header(http::header::USER_AGENT, "rogerbot/1.0");

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let realm = None;
        if let Some(proxy_target) = &target {
            if let Ok(Some(header)) = auth.auth(&proxy_target.host, realm) {
                builder = builder.header(http::header::PROXY_AUTHORIZATION, header);
            }
        } else if let Ok(Some(header)) = auth.auth(&host_header, realm) {
            builder = builder.header(http::header::AUTHORIZATION, header);
        }

        {
            let state = request.state.lock().unwrap();
            if let Some(cookie_header) = cookie_jar::render(&state.cookies) {
                if let Ok(value) = HeaderValue::from_str(&cookie_header) {
                    builder = builder.header(http::header::COOKIE, value);
                }
            }
        }

        let http_request = if let Some(body) = &request.body {
            builder
                .body(Full::new(body.clone()).boxed())
                .map_err(|e| AttemptError::Fatal(e.into()))?
        } else {
            builder
                .body(Empty::<Bytes>::new().boxed())
                .map_err(|e| AttemptError::Fatal(e.into()))?
        };

        let response = tokio::time::timeout(request.timeout, sender.send_request(http_request))
            .await
            .map_err(|_| AttemptError::Retryable(Error::Timeout))?
            .map_err(|e| AttemptError::Retryable(Error::Http(e)))?;

        let status = response.status().as_u16();
        if let Some(hook) = &request.hooks.on_status {
            if let Some(cancel) = hook(status) {
                return Err(AttemptError::Fatal(cancel.into()));
            }
        } else {
            Request::log_default_status(status);
        }

        let headers = response.headers().clone();
        if let Some(hook) = &request.hooks.on_headers {
            if let Some(cancel) = hook(&headers) {
                return Err(AttemptError::Fatal(cancel.into()));
            }
        }

        let encoding = headers
            .get(http::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        {
            let mut state = request.state.lock().unwrap();
            state.encoding = encoding.clone();
            cookie_jar::absorb(&mut state.cookies, &headers);
        }

        if let Some(proxy_target) = &target {
            let expected = format!("hit from {}", proxy_target.host);
            let hit = headers
                .get("x-cache")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_lowercase().contains(&expected))
                .unwrap_or(false);
            cached = cached && hit;
        }

        if request.follow_redirect && (300..400).contains(&status) {
            if let Some(location) = headers
                .get(http::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                let next_url = url
                    .join(location)
                    .map_err(|e| AttemptError::Fatal(e.into()))?;

                let mut state = request.state.lock().unwrap();
                if state.redirects_followed >= request.redirect_limit {
                    return Err(AttemptError::Fatal(Error::Redirect));
                }
                state.redirects_followed += 1;
                state.effective_url = next_url.to_string();
                drop(state);

                current_url = next_url.to_string();
                if let Some(hook) = &request.hooks.on_url {
                    hook(&current_url);
                }
                continue;
            }
        }

        let body_bytes = tokio::time::timeout(request.timeout, response.into_body().collect())
            .await
            .map_err(|_| AttemptError::Retryable(Error::Timeout))?
            .map_err(|e| AttemptError::Retryable(Error::Http(e)))?
            .to_bytes();

        let decoded = decode_body(body_bytes, encoding.as_deref())
            .map_err(|e| AttemptError::Fatal(Error::Decode(e)))?;

        {
            let mut state = request.state.lock().unwrap();
            state.elapsed = state.started_at.map(|start| start.elapsed());
            state.transition(Lifecycle::Success);
        }

        return Ok(Response {
            status,
            headers,
            body: decoded,
            cached,
        });
    }
}

/// Decompresses `body` per `content_encoding`, matching `gzip`/`x-gzip` and
/// `zlib`/`deflate`. Anything else (including `identity`/absent) is passed
/// through untouched.
fn decode_body(body: Bytes, content_encoding: Option<&str>) -> std::io::Result<Bytes> {
    match content_encoding.map(str::to_ascii_lowercase).as_deref() {
        Some("gzip") | Some("x-gzip") => {
            let mut decoder = flate2::read::GzDecoder::new(&body[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(Bytes::from(out))
        }
        Some("deflate") | Some("zlib") => {
            let mut decoder = flate2::read::ZlibDecoder::new(&body[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(Bytes::from(out))
        }
        _ => Ok(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_encoding_passes_through() {
        let body = Bytes::from_static(b"hello");
        let out = decode_body(body.clone(), None).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn gzip_body_is_decoded() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decode_body(Bytes::from(compressed), Some("gzip")).unwrap();
        assert_eq!(out, Bytes::from_static(b"hello world"));
    }
}
