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
async fn redirect_loop_fails_once_limit_is_exceeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/loop", server.uri())),
        )
        .mount(&server)
        .await;

    let engine = Arc::new(Engine::builder().pool_size(1).build());
    let mut dispatcher = Dispatcher::start(engine.clone());

    let error_seen = Arc::new(Mutex::new(None));
    let error_hook = error_seen.clone();
    let req = Request::builder(format!("{}/loop", server.uri()))
        .redirect_limit(3)
        .on_error(move |err| {
            *error_hook.lock().unwrap() = Some(err.to_string());
        })
        .build();
    engine.push(req);

    let completed = wait_until(|| error_seen.lock().unwrap().is_some(), Duration::from_secs(5)).await;
    assert!(completed);
    assert!(error_seen
        .lock()
        .unwrap()
        .as_ref()
        .unwrap()
        .contains("redirect"));

    dispatcher.stop();
}
