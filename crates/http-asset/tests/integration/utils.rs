use std::time::Duration;

use http_asset::{AssetOptions, Assets, Config};
use http_asset_test::{self as test, TempDir};

/// Creates an asset factory that keeps its records in a fresh temp directory.
///
/// Hold on to the returned [`TempDir`] for the entire test.
pub fn setup_assets() -> (Assets, TempDir) {
    test::setup();

    let cache_dir = test::tempdir();
    let config = Config {
        cache_dir: cache_dir.path().to_owned(),
        connect_timeout: Duration::from_millis(500),
        max_download_timeout: Duration::from_secs(5),
        ..Default::default()
    };

    (Assets::from_config(config).unwrap(), cache_dir)
}

/// Options that revalidate the cached record once it is older than `stale_after`.
pub fn stale_after(stale_after: Duration) -> AssetOptions {
    AssetOptions {
        stale_after,
        ..Default::default()
    }
}

/// Options that never touch the record store.
pub fn uncached() -> AssetOptions {
    AssetOptions {
        cache: false,
        ..Default::default()
    }
}
