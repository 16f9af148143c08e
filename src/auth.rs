//! Auth Registry: in-memory HTTP Basic credential store keyed by host (and
//! optionally realm), shared between an [`Engine`](crate::engine::Engine)
//! and its in-flight [`Servicer`](crate::servicer::Servicer)s via a cheap
//! `Arc` handle rather than process-wide global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    host: String,
    realm: Option<String>,
}

impl Key {
    /// Canonicalizes a host the same way the original's `client._parse`
    /// does: assume `http://` if no scheme is present, keep an explicit
    /// port, and fold in the realm (if any) as a suffix, so a registration
    /// for `(host, Some(realm))` never collides with one for `(host, None)`.
    fn new(host: &str, realm: Option<&str>) -> Result<Self> {
        let normalized = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let url = url::Url::parse(&normalized)?;
        let host_part = url
            .host_str()
            .ok_or(Error::Auth("auth key missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{host_part}:{port}"),
            None => host_part.to_string(),
        };
        Ok(Key {
            host,
            realm: realm.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// A set of HTTP Basic credentials registered against a host (and
/// optionally a realm).
///
/// Cloning an `AuthRegistry` is cheap: it is a handle around a shared,
/// mutex-guarded map, so the same registry can be handed to an `Engine` and
/// to test code without any unsafe global state.
#[derive(Debug, Clone, Default)]
pub struct AuthRegistry {
    inner: Arc<Mutex<HashMap<Key, Credentials>>>,
}

impl AuthRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        AuthRegistry::default()
    }

    /// Registers `username`/`password` for `host`, optionally scoped to
    /// `realm`. Overwrites any existing entry for the same key.
    pub fn register(
        &self,
        host: &str,
        realm: Option<&str>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<()> {
        let key = Key::new(host, realm)?;
        let mut guard = self.inner.lock().unwrap();
        guard.insert(
            key,
            Credentials {
                username: username.into(),
                password: password.into(),
            },
        );
        Ok(())
    }

    /// Removes any credentials registered for `host`/`realm`.
    pub fn unregister(&self, host: &str, realm: Option<&str>) -> Result<()> {
        let key = Key::new(host, realm)?;
        self.inner.lock().unwrap().remove(&key);
        Ok(())
    }

    /// Looks up raw `username`/`password` for `host`/`realm`, falling back
    /// to the realm-less entry for that host if a realm-scoped lookup
    /// misses. This mirrors the original's fallback behavior exactly: a
    /// proxy credential registered without a realm still matches once the
    /// proxy starts sending a `WWW-Authenticate` realm.
    pub fn get(&self, host: &str, realm: Option<&str>) -> Result<Option<(String, String)>> {
        let guard = self.inner.lock().unwrap();
        if let Some(realm) = realm {
            let scoped = Key::new(host, Some(realm))?;
            if let Some(creds) = guard.get(&scoped) {
                return Ok(Some((creds.username.clone(), creds.password.clone())));
            }
        }
        let bare = Key::new(host, None)?;
        Ok(guard
            .get(&bare)
            .map(|creds| (creds.username.clone(), creds.password.clone())))
    }

    /// Builds the `Authorization: Basic ...` header value for `host`/`realm`,
    /// if credentials are registered. Returns `None` (not an error) when
    /// there is simply no matching entry — requests without credentials are
    /// the common case, not a failure.
    pub fn auth(&self, host: &str, realm: Option<&str>) -> Result<Option<String>> {
        Ok(self.get(host, realm)?.map(|(user, pass)| {
            let token = BASE64.encode(format!("{user}:{pass}"));
            format!("Basic {token}")
        }))
    }

    /// Number of registered credential entries. Exposed for tests.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// True if no credentials are registered. Exposed for tests.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
