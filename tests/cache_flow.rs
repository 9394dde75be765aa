//! End-to-end tests of the cached plain-HTTP flow.

use std::sync::Arc;
use std::time::Duration;

use caching_proxy::cache::{canonical_key, Fingerprint};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod common;
use common::Reply;

fn fingerprint_for(backend: &common::MockBackend, path: &str) -> Fingerprint {
    Fingerprint::of(&canonical_key(&backend.addr.to_string(), path, None))
}

#[tokio::test]
async fn first_request_fetches_and_repeat_is_served_from_cache() {
    let backend = common::start_mock_backend("hello").await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |_| {}).await;
    let client = proxy.client();

    let res = client.get(backend.url("/a")).send().await.expect("proxy unreachable");
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-length"], "5");
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client.get(backend.url("/a")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello");

    assert_eq!(backend.hits(), 1, "second request must not reach the origin");

    // Exactly one file, named by the fingerprint, holding the raw body.
    let fp = fingerprint_for(&backend, "/a");
    assert_eq!(common::cache_files(dir.path()), vec![fp.to_string()]);
    assert_eq!(std::fs::read(dir.path().join(fp.as_str())).unwrap(), b"hello");

    proxy.stop().await;
}

#[tokio::test]
async fn query_strings_are_cached_separately() {
    let backend = common::start_programmable_backend(|hit| async move {
        Reply::Respond(200, format!("response {hit}"))
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |_| {}).await;
    let client = proxy.client();

    let first = client.get(backend.url("/search?q=1")).send().await.unwrap().text().await.unwrap();
    let second = client.get(backend.url("/search?q=2")).send().await.unwrap().text().await.unwrap();
    let again = client.get(backend.url("/search?q=1")).send().await.unwrap().text().await.unwrap();

    assert_eq!(first, "response 0");
    assert_eq!(second, "response 1");
    assert_eq!(again, "response 0");
    assert_eq!(backend.hits(), 2);

    proxy.stop().await;
}

#[tokio::test]
async fn concurrent_requests_share_one_fetch() {
    let backend = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Reply::Respond(200, "shared".into())
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |_| {}).await;
    let client = proxy.client();
    let url = Arc::new(backend.url("/slow"));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let res = client.get(url.as_str()).send().await.unwrap();
            (res.status().as_u16(), res.text().await.unwrap())
        }));
    }

    for task in tasks {
        let (status, body) = task.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "shared");
    }
    assert_eq!(backend.hits(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn failed_fetch_releases_the_key() {
    let backend = common::start_programmable_backend(|hit| async move {
        if hit == 0 {
            Reply::Hangup
        } else {
            Reply::Respond(200, "recovered".into())
        }
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |_| {}).await;
    let client = proxy.client();

    let res = client.get(backend.url("/flaky")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    assert!(common::cache_files(dir.path()).is_empty());

    // No marker is left behind: the next request fetches again.
    let res = tokio::time::timeout(Duration::from_secs(5), client.get(backend.url("/flaky")).send())
        .await
        .expect("second request must not hang")
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "recovered");
    assert_eq!(backend.hits(), 2);

    proxy.stop().await;
}

#[tokio::test]
async fn refused_upstream_is_500() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |_| {}).await;
    let client = proxy.client();
    let addr = common::closed_port_addr();

    let res = client.get(format!("http://{addr}/gone")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(proxy.running().state.cache.stats().busy, 0);

    proxy.stop().await;
}

#[tokio::test]
async fn large_bodies_stay_on_disk() {
    let body = "x".repeat(1000);
    let served = body.clone();
    let backend = common::start_programmable_backend(move |_| {
        let served = served.clone();
        async move { Reply::Respond(200, served) }
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |c| c.cache.memory_threshold_bytes = 16).await;
    let client = proxy.client();

    let res = client.get(backend.url("/big")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), body);

    let status: serde_json::Value = proxy
        .admin_client()
        .get(proxy.admin_url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["cache"]["entries"], 1);
    assert_eq!(status["cache"]["in_memory"], 0);

    let fp = fingerprint_for(&backend, "/big");
    assert_eq!(std::fs::metadata(dir.path().join(fp.as_str())).unwrap().len(), 1000);

    // Served again from the file.
    let res = client.get(backend.url("/big")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), body);
    assert_eq!(backend.hits(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn cache_survives_restart() {
    let backend = common::start_mock_backend("durable").await;
    let dir = tempfile::tempdir().unwrap();

    let proxy = common::start_proxy(dir.path(), |_| {}).await;
    let res = proxy.client().get(backend.url("/keep")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "durable");
    proxy.stop().await;

    let proxy = common::start_proxy(dir.path(), |_| {}).await;
    assert_eq!(proxy.running().state.cache.stats().entries, 1);
    let res = proxy.client().get(backend.url("/keep")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "durable");
    assert_eq!(backend.hits(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn upstream_leg_is_sanitized() {
    let backend = common::start_mock_backend("ok").await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |_| {}).await;

    let res = proxy
        .client()
        .get(backend.url("/headers"))
        .header("Connection", "keep-alive, X-Hop")
        .header("X-Hop", "secret")
        .header("X-Forwarded-For", "192.0.2.7")
        .header("X-Custom", "kept")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let head = backend.last_request().unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /headers http/1.1"), "{head}");
    assert!(head.contains("x-forwarded-for: 192.0.2.7, 127.0.0.1"), "{head}");
    assert!(head.contains("x-custom: kept"), "{head}");
    assert!(!head.contains("x-hop"), "{head}");

    proxy.stop().await;
}

#[tokio::test]
async fn cache_stage_off_relays_origin_response() {
    let backend = common::start_programmable_backend(|_| async {
        Reply::Respond(404, "missing".into())
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |c| c.pipeline.cache = false).await;
    let client = proxy.client();

    for _ in 0..2 {
        let res = client.get(backend.url("/nope")).send().await.unwrap();
        assert_eq!(res.status(), 404);
        assert_eq!(res.text().await.unwrap(), "missing");
    }
    assert_eq!(backend.hits(), 2);
    assert!(common::cache_files(dir.path()).is_empty());

    proxy.stop().await;
}

/// Origin that answers after `delay`.
async fn slow_backend(delay: Duration) -> common::MockBackend {
    common::start_programmable_backend(move |_| async move {
        tokio::time::sleep(delay).await;
        Reply::Respond(200, "slow body".into())
    })
    .await
}

/// Send a proxied GET for `url` and hang up before the answer arrives.
async fn request_then_hang_up(proxy: &common::TestProxy, backend: &common::MockBackend, url: &str) {
    let mut stream = TcpStream::connect(proxy.proxy_addr).await.unwrap();
    stream
        .write_all(format!("GET {url} HTTP/1.1\r\nHost: {}\r\n\r\n", backend.addr).as_bytes())
        .await
        .unwrap();
    assert!(
        common::eventually(Duration::from_secs(2), || backend.hits() == 1).await,
        "origin never saw the request"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(stream);
}

#[tokio::test]
async fn client_hangup_still_completes_the_fetch() {
    let backend = slow_backend(Duration::from_millis(500)).await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |config| {
        config.cache.complete_fetch_on_disconnect = true;
    })
    .await;
    let cache = Arc::clone(&proxy.running().state.cache);
    let key = canonical_key(&backend.addr.to_string(), "/slow", None);

    request_then_hang_up(&proxy, &backend, &backend.url("/slow")).await;

    assert!(
        common::eventually(Duration::from_secs(3), || cache.contains(&key)).await,
        "detached fetch should commit after the client left"
    );
    assert_eq!(
        common::cache_files(dir.path()),
        vec![fingerprint_for(&backend, "/slow").as_str().to_string()]
    );

    // The committed entry serves the next client without another origin hit.
    let res = proxy.client().get(backend.url("/slow")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "slow body");
    assert_eq!(backend.hits(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn client_hangup_cancels_the_fetch_when_not_detached() {
    let backend = slow_backend(Duration::from_millis(500)).await;
    let dir = tempfile::tempdir().unwrap();
    let proxy = common::start_proxy(dir.path(), |config| {
        config.cache.complete_fetch_on_disconnect = false;
    })
    .await;
    let cache = Arc::clone(&proxy.running().state.cache);
    let key = canonical_key(&backend.addr.to_string(), "/slow", None);

    request_then_hang_up(&proxy, &backend, &backend.url("/slow")).await;

    assert!(
        common::eventually(Duration::from_secs(2), || cache.stats().busy == 0).await,
        "cancelled fetch must release its marker"
    );
    // Past the point the origin would have answered.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!cache.contains(&key));
    assert!(common::cache_files(dir.path()).is_empty());
    assert_eq!(cache.stats().busy, 0);

    proxy.stop().await;
}
