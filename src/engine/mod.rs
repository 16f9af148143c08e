//! `Engine` (the Fetcher): pool-bounded dispatch of `Request`s with a ready
//! queue, an in-flight counter, and a pluggable work source to grow the
//! queue when it runs dry.
//!
//! Mirrors `BaseFetcher` in the original fetcher (`push`, `extend`, `pop`,
//! `idle`, `grow`/`grew`, `serveNext`), realized as a `Client`-shaped struct
//! (`client/mod.rs`'s `Client<C, B>`/`Config<C, B>`) with its counters kept
//! under a single lock, as `client/pool.rs`'s `PoolInner` does.

pub mod callbacks;
pub mod dispatcher;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::auth::AuthRegistry;
use crate::connect::{Connect, HttpConnector};
use crate::error::Error;
use crate::request::{Request, Response};

use self::callbacks::CallbackRunner;

pub use self::dispatcher::{run_until_signal, Dispatcher};

/// A pluggable source of additional work, consulted when the ready queue
/// runs dry. The Rust-native rendering of the original's overridable `grow`
/// method: rather than subclassing `BaseFetcher`, callers hand the `Engine`
/// an `Arc<dyn WorkSource>`.
pub trait WorkSource: Send + Sync {
    /// Produces zero or more new requests to feed into the engine. Called
    /// whenever the ready queue empties out while requests are still
    /// in flight or the work source has previously returned work.
    fn grow(&self) -> Vec<Arc<Request>>;

    /// Notified with how many requests `grow` actually contributed, after
    /// they've been enqueued. The default no-op is enough for work sources
    /// that don't need to track their own progress; override it to advance
    /// an internal cursor or stop producing once a source has run dry.
    fn grew(&self, count: usize) {
        let _ = count;
    }
}

/// Engine-level hooks, fired in addition to any hooks attached to an
/// individual `Request`. Useful for cross-cutting concerns (metrics,
/// logging) that don't belong on every request.
#[derive(Clone, Default)]
pub struct EngineHooks {
    /// Called after a request succeeds, in addition to its own `on_success`.
    pub on_success: Option<Arc<dyn Fn(&Request, &Response) + Send + Sync>>,
    /// Called after a request fails terminally, in addition to its own
    /// `on_error`.
    pub on_error: Option<Arc<dyn Fn(&Request, &Error) + Send + Sync>>,
    /// Called once per request regardless of outcome, in addition to its
    /// own `on_done`.
    pub on_done: Option<Arc<dyn Fn(&Request) + Send + Sync>>,
}

struct State {
    ready: VecDeque<Arc<Request>>,
    num_flight: usize,
    retrying: usize,
    processed: u64,
}

/// Configuration used to build an [`Engine`].
pub struct Builder {
    capacity: usize,
    callback_queue_capacity: usize,
    callback_threads: usize,
    connector: Arc<dyn Connect>,
    auth: AuthRegistry,
    work_source: Option<Arc<dyn WorkSource>>,
    grow_interval: std::time::Duration,
    stop_when_done: bool,
    hooks: EngineHooks,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            // Default pool size of 10, matching `BaseFetcher.poolSize`.
            capacity: 10,
            callback_queue_capacity: 256,
            callback_threads: 1,
            connector: Arc::new(HttpConnector::new()),
            auth: AuthRegistry::new(),
            work_source: None,
            grow_interval: std::time::Duration::from_secs(5),
            stop_when_done: false,
            hooks: EngineHooks::default(),
        }
    }
}

impl Builder {
    /// Creates a builder with the default pool size (10), matching the
    /// original fetcher.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Sets the maximum number of requests dispatched concurrently.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.capacity = size;
        self
    }

    /// Sets how many callback worker tasks drain the hook queue. Default 1.
    /// Raise this if hooks perform meaningful CPU work; they should
    /// otherwise remain fast, since they still share this bounded pool.
    pub fn callback_threads(mut self, count: usize) -> Self {
        self.callback_threads = count;
        self
    }

    /// Sets the capacity of the bounded callback queue. Default 256.
    pub fn callback_queue_capacity(mut self, capacity: usize) -> Self {
        self.callback_queue_capacity = capacity;
        self
    }

    /// Overrides the connector used to establish transport connections.
    pub fn connector(mut self, connector: Arc<dyn Connect>) -> Self {
        self.connector = connector;
        self
    }

    /// Shares an existing `AuthRegistry` rather than starting with an
    /// empty one.
    pub fn auth(mut self, auth: AuthRegistry) -> Self {
        self.auth = auth;
        self
    }

    /// Attaches a pluggable work source consulted when the ready queue
    /// empties out.
    pub fn work_source(mut self, source: Arc<dyn WorkSource>) -> Self {
        self.work_source = Some(source);
        self
    }

    /// Sets how often the Dispatcher consults the work source while idle.
    /// Default 5s.
    pub fn grow_interval(mut self, interval: std::time::Duration) -> Self {
        self.grow_interval = interval;
        self
    }

    /// When set, the Dispatcher halts on its own once the ready queue, the
    /// in-flight count, and the retry queue are all empty, rather than
    /// running forever waiting for more `push`/`extend` calls. Default
    /// `false`, matching a long-lived engine fed by a work source or an
    /// external caller.
    pub fn stop_when_done(mut self, stop: bool) -> Self {
        self.stop_when_done = stop;
        self
    }

    /// Sets engine-level hooks, fired alongside each request's own hooks.
    pub fn hooks(mut self, hooks: EngineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Builds the `Engine`. Must be called from within a Tokio runtime,
    /// since it spawns the callback worker tasks.
    pub fn build(self) -> Engine {
        let (callbacks, _callback_handles) =
            CallbackRunner::spawn(self.callback_queue_capacity, self.callback_threads);
        Engine {
            state: Mutex::new(State {
                ready: VecDeque::new(),
                num_flight: 0,
                retrying: 0,
                processed: 0,
            }),
            notify: Notify::new(),
            capacity: self.capacity,
            connector: self.connector,
            auth: self.auth,
            work_source: self.work_source,
            grow_interval: self.grow_interval,
            stop_when_done: self.stop_when_done,
            callbacks,
            hooks: self.hooks,
        }
    }
}

/// The concurrent fetch engine. See module docs.
pub struct Engine {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
    connector: Arc<dyn Connect>,
    auth: AuthRegistry,
    work_source: Option<Arc<dyn WorkSource>>,
    grow_interval: std::time::Duration,
    stop_when_done: bool,
    callbacks: CallbackRunner,
    hooks: EngineHooks,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Engine")
            .field("capacity", &self.capacity)
            .field("ready", &state.ready.len())
            .field("num_flight", &state.num_flight)
            .field("retrying", &state.retrying)
            .field("processed", &state.processed)
            .finish()
    }
}

impl Engine {
    /// Starts building an `Engine` with the default pool size (10).
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Queues a single request.
    pub fn push(&self, request: Arc<Request>) {
        self.state.lock().unwrap().ready.push_back(request);
        self.notify.notify_one();
    }

    /// Queues multiple requests at once.
    pub fn extend(&self, requests: impl IntoIterator<Item = Arc<Request>>) {
        let mut state = self.state.lock().unwrap();
        state.ready.extend(requests);
        drop(state);
        self.notify.notify_one();
    }

    /// Pops the next request to dispatch, if the pool has spare capacity.
    /// Increments the in-flight counter on a hit.
    pub(crate) fn pop(&self) -> Option<Arc<Request>> {
        let mut state = self.state.lock().unwrap();
        if state.num_flight >= self.capacity {
            return None;
        }
        let next = state.ready.pop_front();
        if next.is_some() {
            state.num_flight += 1;
        }
        next
    }

    /// True if there is no queued, in-flight, or retry-waiting work.
    pub fn idle(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.ready.is_empty() && state.num_flight == 0 && state.retrying == 0
    }

    /// True if the ready queue has run dry, regardless of in-flight work —
    /// the condition under which the Dispatcher consults the work source.
    pub(crate) fn ready_is_empty(&self) -> bool {
        self.state.lock().unwrap().ready.is_empty()
    }

    /// Total queued, in-flight, and retry-waiting requests.
    pub fn length(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ready.len() + state.num_flight + state.retrying
    }

    /// Total requests that have reached a terminal state.
    pub fn processed(&self) -> u64 {
        self.state.lock().unwrap().processed
    }

    /// Consults the work source (if any) and enqueues what it returns,
    /// returning how many requests were added.
    pub(crate) fn grow(&self) -> usize {
        let Some(source) = &self.work_source else {
            return 0;
        };
        let grown = source.grow();
        let count = grown.len();
        if count > 0 {
            debug!("grow produced {count} new requests");
            self.extend(grown);
        }
        source.grew(count);
        count
    }

    /// True if the Dispatcher should halt its own loop once drained, rather
    /// than waiting indefinitely for more work.
    pub(crate) fn stop_when_done(&self) -> bool {
        self.stop_when_done
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connect> {
        self.connector.clone()
    }

    pub(crate) fn auth(&self) -> AuthRegistry {
        self.auth.clone()
    }

    pub(crate) fn grow_interval(&self) -> std::time::Duration {
        self.grow_interval
    }

    pub(crate) async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// Called by the Dispatcher when a request's attempt ends without
    /// needing a retry (success or terminal failure). Decrements the
    /// in-flight counter, bumps the processed counter, and submits the
    /// completion hooks to the callback runner.
    pub(crate) async fn complete(&self, request: Arc<Request>, result: Result<Response, Error>) {
        {
            let mut state = self.state.lock().unwrap();
            state.num_flight = state.num_flight.saturating_sub(1);
            state.processed += 1;
        }
        // A slot just freed up; wake the Dispatcher loop in case queued
        // work is waiting on pool capacity rather than a fresh push.
        self.notify.notify_one();

        let engine_hooks = self.hooks.clone();
        self.callbacks
            .submit(move || dispatch_completion(request, result, engine_hooks))
            .await;
    }

    /// Called by the Dispatcher when an attempt fails in a retryable way
    /// but the request has exhausted its retry budget, which is handled
    /// identically to a terminal failure from the Engine's point of view.
    pub(crate) async fn give_up(&self, request: Arc<Request>, err: Error) {
        self.complete(request, Err(err)).await;
    }

    /// Called by the Dispatcher when a retryable failure occurs and the
    /// request still has retries left: the in-flight slot frees up and the
    /// request moves into the retry-waiting count, since it is not yet
    /// done and must still be reflected in `length`/`idle`.
    pub(crate) fn enter_retry_wait(&self) {
        let mut state = self.state.lock().unwrap();
        state.num_flight = state.num_flight.saturating_sub(1);
        state.retrying += 1;
        drop(state);
        self.notify.notify_one();
    }

    /// Called by the Dispatcher when a request's backoff delay has elapsed:
    /// moves it out of the retry-waiting count and back onto the ready
    /// queue.
    pub(crate) fn requeue_retried(&self, request: Arc<Request>) {
        let mut state = self.state.lock().unwrap();
        state.retrying = state.retrying.saturating_sub(1);
        state.ready.push_back(request);
        drop(state);
        self.notify.notify_one();
    }
}

fn dispatch_completion(
    request: Arc<Request>,
    result: Result<Response, Error>,
    engine_hooks: EngineHooks,
) {
    {
        let mut state = request.state.lock().unwrap();
        if state.elapsed.is_none() {
            state.elapsed = state.started_at.map(|start| start.elapsed());
        }
    }

    match &result {
        Ok(response) => {
            if let Some(hook) = &request.hooks.on_success {
                hook(response);
            }
            if let Some(hook) = &engine_hooks.on_success {
                hook(&request, response);
            }
        }
        Err(err) => {
            {
                let mut state = request.state.lock().unwrap();
                if !matches!(state.lifecycle, crate::request::Lifecycle::Canceled) {
                    let terminal = if matches!(err, Error::Preempted(_)) {
                        crate::request::Lifecycle::Canceled
                    } else {
                        crate::request::Lifecycle::Error
                    };
                    state.transition(terminal);
                }
            }
            if let Some(hook) = &request.hooks.on_error {
                hook(err);
            }
            if let Some(hook) = &engine_hooks.on_error {
                hook(&request, err);
            }
        }
    }

    if let Some(hook) = &request.hooks.on_done {
        hook(&request);
    }
    if let Some(hook) = &engine_hooks.on_done {
        hook(&request);
    }
}
