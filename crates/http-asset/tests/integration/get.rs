use std::time::{Duration, SystemTime};

use http_asset_test::{MockResponse, MockServer, checksum};
use reqwest::StatusCode;
use reqwest::header;

use crate::{setup_assets, stale_after, uncached};

#[tokio::test]
async fn test_basic_request() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.file("/jquery", "b-b-b-body");

    let asset = assets.asset(server.url("/jquery"), &uncached());
    assert_eq!(asset.get().await.unwrap(), "b-b-b-body");
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn test_coalesces_concurrent_gets() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.file("/call-me-maybe", "hi");
    server.set_delay(Duration::from_millis(50));

    let asset = assets.asset(server.url("/call-me-maybe"), &uncached());
    let (a, b, c, d) = futures::join!(asset.get(), asset.get(), asset.get(), asset.get());

    for body in [a, b, c, d] {
        assert_eq!(body.unwrap(), "hi");
    }
    assert_eq!(server.requests(), 1);

    // once settled, the next call makes a new request
    assert_eq!(asset.get().await.unwrap(), "hi");
    assert_eq!(server.requests(), 2);
}

#[tokio::test]
async fn test_serves_cache_within_window() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/refresh-cache", |_req, handled| {
        MockResponse::ok(format!("response #{handled}"))
    });

    let asset = assets.asset(
        server.url("/refresh-cache"),
        &stale_after(Duration::from_millis(250)),
    );
    let one = asset.get().await.unwrap();
    let two = asset.get().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let three = asset.get().await.unwrap();

    assert_eq!(server.requests(), 2);
    assert_eq!(one, "response #0");
    assert_eq!(two, one);
    assert_eq!(three, "response #1");
}

#[tokio::test]
async fn test_requests_after_window() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.file("/refresh-cache", "ok");

    let asset = assets.asset(
        server.url("/refresh-cache"),
        &stale_after(Duration::from_millis(5)),
    );
    asset.get().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    asset.get().await.unwrap();

    assert_eq!(server.requests(), 2);

    // the unchanged file was revalidated with its checksum
    let log = server.log();
    assert_eq!(log[1].req.if_none_match, Some(checksum("ok")));
    assert_eq!(log[1].res.status, StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_reuses_cache_on_failure() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/quark", |_req, handled| {
        if handled > 0 {
            MockResponse::status(StatusCode::NOT_FOUND)
        } else {
            MockResponse::ok("hi")
        }
    });

    let asset = assets.asset(server.url("/quark"), &stale_after(Duration::ZERO));
    assert_eq!(asset.get().await.unwrap(), "hi");
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(asset.get().await.unwrap(), "hi");

    let statuses: Vec<_> = server.log().into_iter().map(|e| e.res.status).collect();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::NOT_FOUND]);
}

#[tokio::test]
async fn test_respects_etag() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/check-etag", |req, _handled| {
        if req.if_none_match.as_deref() == Some("eeeeee") {
            MockResponse::status(StatusCode::NOT_MODIFIED)
        } else {
            MockResponse::ok("who 4 art").with_header(header::ETAG, "eeeeee")
        }
    });

    let asset = assets.asset(server.url("/check-etag"), &stale_after(Duration::ZERO));
    assert_eq!(asset.get().await.unwrap(), "who 4 art");
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(asset.get().await.unwrap(), "who 4 art");

    let log = server.log();
    assert_eq!(log.len(), 2);

    assert_eq!(log[0].req.if_none_match, None);
    assert_eq!(log[0].res.status, StatusCode::OK);
    assert_eq!(log[0].res.body.as_deref(), Some("who 4 art"));

    assert_eq!(log[1].req.if_none_match.as_deref(), Some("eeeeee"));
    assert_eq!(log[1].res.status, StatusCode::NOT_MODIFIED);
    assert_eq!(log[1].res.body, None);
}

#[tokio::test]
async fn test_respects_expires_header() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/check-expires", |req, _handled| {
        if req.if_none_match.as_deref() == Some("eeeeee") {
            MockResponse::status(StatusCode::RESET_CONTENT).with_body("high five!")
        } else {
            MockResponse::ok("come back soon")
                .with_header(header::ETAG, "eeeeee")
                .with_header(header::EXPIRES, httpdate::fmt_http_date(SystemTime::now()))
        }
    });

    let asset = assets.asset(
        server.url("/check-expires"),
        &stale_after(Duration::from_secs(30 * 60)),
    );
    assert_eq!(asset.get().await.unwrap(), "come back soon");
    tokio::time::sleep(Duration::from_millis(2)).await;

    // the record expired right away, a non-200 response keeps the cached body
    assert_eq!(asset.get().await.unwrap(), "come back soon");

    let log = server.log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].res.body.as_deref(), Some("come back soon"));
    assert_eq!(log[0].res.status, StatusCode::OK);
    assert_eq!(log[1].res.body.as_deref(), Some("high five!"));
    assert_eq!(log[1].res.status, StatusCode::RESET_CONTENT);
}

#[tokio::test]
async fn test_expired_record_is_replaced() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/expired", |_req, handled| {
        MockResponse::ok(format!("version {handled}"))
            .with_header(header::EXPIRES, "Sun, 06 Nov 1994 08:49:37 GMT")
    });

    let asset = assets.asset(
        server.url("/expired"),
        &stale_after(Duration::from_secs(30 * 60)),
    );
    assert_eq!(asset.get().await.unwrap(), "version 0");
    assert_eq!(asset.get().await.unwrap(), "version 1");
    assert_eq!(asset.get().await.unwrap(), "version 2");
}

#[tokio::test]
async fn test_invalid_expires_header_is_ignored() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/bad-expires", |_req, _handled| {
        MockResponse::ok("forever").with_header(header::EXPIRES, "0")
    });

    let asset = assets.asset(
        server.url("/bad-expires"),
        &stale_after(Duration::from_secs(30 * 60)),
    );
    assert_eq!(asset.get().await.unwrap(), "forever");
    assert_eq!(asset.get().await.unwrap(), "forever");
    assert_eq!(server.requests(), 1);
}
