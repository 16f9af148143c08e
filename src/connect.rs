//! Establishing the transport connection a [`Servicer`](crate::servicer::Servicer)
//! speaks HTTP/1 over: plain TCP, or TCP wrapped in TLS via `tokio-rustls`.
//!
//! The teacher's own `client/mod.rs` re-exports `HttpConnector`/`Connect`
//! from a `connect` module whose body was not part of the retrieved
//! snapshot; the trait shape here is inferred from its call sites.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hyper_util::rt::TokioIo;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// Combines `AsyncRead + AsyncWrite + Unpin + Send` into one bound, since
/// trait objects can't express the intersection directly.
pub trait AsyncReadWriteUnpin:
    tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send
{
}

impl<T> AsyncReadWriteUnpin for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send
{}

/// Either side of a connection a `Servicer` can write its HTTP/1 request to
/// and read the response from.
pub type BoxedIo = TokioIo<Box<dyn AsyncReadWriteUnpin>>;

/// A way to establish the transport connection for a request's target
/// `host:port`, optionally over TLS.
pub trait Connect: Send + Sync {
    /// Connects to `host:port`. When `tls` is true, performs a TLS
    /// handshake using `host` as the SNI/certificate name after the TCP
    /// connection is established.
    fn connect(
        &self,
        host: String,
        port: u16,
        tls: bool,
    ) -> Pin<Box<dyn Future<Output = Result<BoxedIo>> + Send>>;
}

/// The default `Connect` implementation: `tokio::net::TcpStream`, optionally
/// wrapped in `tokio-rustls` using the platform's webpki roots.
#[derive(Clone)]
pub struct HttpConnector {
    tls_config: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector").finish()
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        HttpConnector {
            tls_config: Arc::new(config),
        }
    }
}

impl HttpConnector {
    /// Creates a connector using the default webpki root store.
    pub fn new() -> Self {
        HttpConnector::default()
    }
}

impl Connect for HttpConnector {
    fn connect(
        &self,
        host: String,
        port: u16,
        tls: bool,
    ) -> Pin<Box<dyn Future<Output = Result<BoxedIo>> + Send>> {
        let tls_config = self.tls_config.clone();
        Box::pin(async move {
            debug!("connecting to {host}:{port} (tls={tls})");
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(Error::Connect)?;
            stream.set_nodelay(true).map_err(Error::Connect)?;

            if tls {
                let name = ServerName::try_from(host.clone())
                    .map_err(|_| Error::Tls(std::io::Error::other("invalid dns name")))?;
                let connector = TlsConnector::from(tls_config);
                let tls_stream = connector
                    .connect(name, stream)
                    .await
                    .map_err(Error::Tls)?;
                let boxed: Box<dyn AsyncReadWriteUnpin> = Box::new(tls_stream);
                Ok(TokioIo::new(boxed))
            } else {
                let boxed: Box<dyn AsyncReadWriteUnpin> = Box::new(stream);
                Ok(TokioIo::new(boxed))
            }
        })
    }
}
