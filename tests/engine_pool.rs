use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchkit::engine::dispatcher::Dispatcher;
use fetchkit::{Engine, Request};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn pool_of_two_serves_five_urls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
        .mount(&server)
        .await;

    let engine = Arc::new(Engine::builder().pool_size(2).build());
    let mut dispatcher = Dispatcher::start(engine.clone());

    let done = Arc::new(AtomicUsize::new(0));
    let mut requests = Vec::new();
    for _ in 0..5 {
        let done = done.clone();
        let req = Request::builder(format!("{}/ok", server.uri()))
            .on_done(move |_| {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        requests.push(req);
    }
    engine.extend(requests);

    let completed = wait_until(|| done.load(Ordering::SeqCst) == 5, Duration::from_secs(5)).await;
    assert!(completed, "expected all 5 requests to complete");
    assert_eq!(engine.processed(), 5);

    dispatcher.stop();
}

#[tokio::test]
async fn pool_of_one_follows_a_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/end", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/end"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .mount(&server)
        .await;

    let engine = Arc::new(Engine::builder().pool_size(1).build());
    let mut dispatcher = Dispatcher::start(engine.clone());

    let body = Arc::new(Mutex::new(None));
    let body_clone = body.clone();
    let req = Request::builder(format!("{}/start", server.uri()))
        .on_success(move |resp| {
            *body_clone.lock().unwrap() = Some(resp.body.clone());
        })
        .build();
    engine.push(req);

    let completed = wait_until(|| body.lock().unwrap().is_some(), Duration::from_secs(5)).await;
    assert!(completed, "expected the redirect chain to complete");
    assert_eq!(body.lock().unwrap().as_ref().unwrap().as_ref(), b"landed");

    dispatcher.stop();
}

#[tokio::test]
async fn stop_when_done_halts_the_dispatcher_once_drained() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
        .mount(&server)
        .await;

    let engine = Arc::new(Engine::builder().pool_size(1).stop_when_done(true).build());
    let dispatcher_handle = Dispatcher::start(engine.clone());

    let req = Request::builder(format!("{}/ok", server.uri())).build();
    engine.push(req);

    let completed = wait_until(|| engine.processed() == 1, Duration::from_secs(5)).await;
    assert!(completed, "expected the request to complete");

    // The Dispatcher loop should have halted on its own once the queue
    // drained, without anyone calling `stop()`.
    let mut dispatcher_handle = dispatcher_handle;
    tokio::task::spawn_blocking(move || dispatcher_handle.stop())
        .await
        .unwrap();
}
