use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchkit::engine::dispatcher::Dispatcher;
use fetchkit::{Engine, Request};
use flate2::write::GzEncoder;
use flate2::Compression;
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
async fn gzip_encoded_body_is_transparently_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"the quick brown fox").unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/compressed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(compressed),
        )
        .mount(&server)
        .await;

    let engine = Arc::new(Engine::builder().pool_size(1).build());
    let mut dispatcher = Dispatcher::start(engine.clone());

    let body = Arc::new(Mutex::new(None));
    let body_hook = body.clone();
    let req = Request::builder(format!("{}/compressed", server.uri()))
        .on_success(move |resp| {
            *body_hook.lock().unwrap() = Some(resp.body.clone());
        })
        .build();
    engine.push(req);

    let completed = wait_until(|| body.lock().unwrap().is_some(), Duration::from_secs(5)).await;
    assert!(completed);
    assert_eq!(
        body.lock().unwrap().as_ref().unwrap().as_ref(),
        b"the quick brown fox"
    );

    dispatcher.stop();
}
