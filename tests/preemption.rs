use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchkit::engine::dispatcher::Dispatcher;
use fetchkit::{Cancel, Engine, Request};
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
async fn on_headers_hook_can_preempt_before_body_is_read() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_string("this body should never be delivered"),
        )
        .mount(&server)
        .await;

    let engine = Arc::new(Engine::builder().pool_size(1).build());
    let mut dispatcher = Dispatcher::start(engine.clone());

    let success_fired = Arc::new(AtomicBool::new(false));
    let error_seen = Arc::new(Mutex::new(None));

    let success_fired_hook = success_fired.clone();
    let error_seen_hook = error_seen.clone();
    let req = Request::builder(format!("{}/big", server.uri()))
        .on_headers(|_headers| Some(Cancel("not interested".to_string())))
        .on_success(move |_| success_fired_hook.store(true, Ordering::SeqCst))
        .on_error(move |err| {
            *error_seen_hook.lock().unwrap() = Some(err.to_string());
        })
        .build();
    engine.push(req);

    let completed = wait_until(|| error_seen.lock().unwrap().is_some(), Duration::from_secs(5)).await;
    assert!(completed, "expected the preemption to surface via on_error");
    assert!(!success_fired.load(Ordering::SeqCst));
    assert!(error_seen.lock().unwrap().as_ref().unwrap().contains("not interested"));

    dispatcher.stop();
}
