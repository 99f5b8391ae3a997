use std::time::Duration;

use http_asset::{AssetError, AssetOptions};
use http_asset_test::{MockResponse, MockServer};
use reqwest::StatusCode;

use crate::{setup_assets, stale_after};

#[tokio::test]
async fn test_status_error_without_cache() {
    let (assets, cache_dir) = setup_assets();
    let server = MockServer::new();

    let asset = assets.asset(server.url("/quark"), &AssetOptions::default());
    let err = asset.get().await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.url(), &server.url("/quark"));

    let message = err
        .to_string()
        .replace(&server.url("/").port().unwrap().to_string(), "<port>");
    insta::assert_snapshot!(message, @r#"failed to fetch http asset: 404 Not Found - "http://localhost:<port>/quark""#);

    // failures are never written to the store
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_transport_error_without_cache() {
    let (assets, _cache_dir) = setup_assets();

    // nothing listens on the discard port
    let url = "http://127.0.0.1:9/quark".parse().unwrap();
    let asset = assets.asset(url, &AssetOptions::default());

    let err = asset.get().await.unwrap_err();
    assert!(matches!(err, AssetError::Transport { .. }));
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn test_concurrent_callers_share_failure() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/flaky", |_req, _handled| {
        MockResponse::status(StatusCode::SERVICE_UNAVAILABLE)
    });
    server.set_delay(Duration::from_millis(50));

    let asset = assets.asset(server.url("/flaky"), &AssetOptions::default());
    let (one, two, three) = futures::join!(asset.get(), asset.get(), asset.get());

    assert_eq!(server.requests(), 1);
    for result in [one, two, three] {
        assert_eq!(
            result.unwrap_err().status(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}

#[tokio::test]
async fn test_serve_stale_on_fail_disabled() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/quark", |_req, handled| {
        if handled > 0 {
            MockResponse::status(StatusCode::INTERNAL_SERVER_ERROR)
        } else {
            MockResponse::ok("hi")
        }
    });

    let options = AssetOptions {
        serve_stale_on_fail: false,
        ..stale_after(Duration::ZERO)
    };
    let asset = assets.asset(server.url("/quark"), &options);
    assert_eq!(asset.get().await.unwrap(), "hi");
    tokio::time::sleep(Duration::from_millis(2)).await;

    let err = asset.get().await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
}

#[tokio::test]
async fn test_recovers_after_outage() {
    let (assets, _cache_dir) = setup_assets();
    let server = MockServer::new();
    server.handler("/quark", |_req, handled| match handled {
        0 => MockResponse::ok("v1"),
        1 => MockResponse::status(StatusCode::BAD_GATEWAY),
        _ => MockResponse::ok("v2"),
    });

    let asset = assets.asset(server.url("/quark"), &stale_after(Duration::ZERO));
    assert_eq!(asset.get().await.unwrap(), "v1");
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(asset.get().await.unwrap(), "v1");
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(asset.get().await.unwrap(), "v2");
    assert_eq!(server.requests(), 3);
}
