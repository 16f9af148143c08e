//! # fetchkit
//!
//! A concurrent, pool-bounded HTTP fetching engine: dispatch a stream of
//! [`Request`]s with bounded parallelism, following redirects, resolving
//! `<scheme>_proxy` environment proxies, attaching HTTP Basic credentials
//! from a shared [`AuthRegistry`], retrying transient failures with
//! exponential backoff, and decoding `gzip`/`deflate` response bodies.
//!
//! The [`Engine`] owns a bounded pool of in-flight requests and a
//! [`engine::dispatcher::Dispatcher`] loop driving them; hooks attached to
//! each `Request` (and, optionally, to the `Engine` itself) run on a
//! separate [`engine::callbacks::CallbackRunner`] so a slow or panicking
//! hook never stalls network I/O.

#[macro_use]
extern crate log;

pub mod auth;
pub mod clock;
pub mod connect;
mod cookie_jar;
pub mod engine;
pub mod error;
pub mod proxy;
pub mod request;
pub mod servicer;

pub use auth::AuthRegistry;
pub use engine::{run_until_signal, Builder as EngineBuilder, Dispatcher, Engine, EngineHooks, WorkSource};
pub use error::{Cancel, Error, Result};
pub use request::{Hooks, Lifecycle, Request, RequestBuilder, Response};
