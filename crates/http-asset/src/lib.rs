//! Fetches remote HTTP assets and keeps a copy of their body on local storage.
//!
//! An [`Asset`] serves its cached body while it is fresh, revalidates it with the origin using
//! the `ETag` once it got stale or expired, and falls back to the cached body if the origin
//! cannot be reached. Concurrent calls to [`Asset::get`] share a single request.

#[macro_use]
pub mod metrics;

pub mod asset;
pub mod cache_key;
pub mod config;
pub mod error;
pub mod freshness;
pub mod inflight;
pub mod logging;
pub mod record;
pub mod store;
pub mod transport;
pub mod utils;

pub use asset::{Asset, Assets, Revalidation};
pub use cache_key::CacheKey;
pub use config::{AssetOptions, CacheLocation, Config};
pub use error::AssetError;
pub use freshness::Freshness;
pub use record::CacheRecord;
pub use store::{FsRecordStore, MemoryRecordStore, RecordStore};
pub use transport::{HttpResponse, HttpTransport, Transport, TransportError};
