//! The asset engine: decides per call whether to serve the cached body, revalidate it, or
//! fetch it anew, and keeps at most one request per asset in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use url::Url;

use crate::cache_key::CacheKey;
use crate::config::{AssetOptions, CacheLocation, Config};
use crate::error::AssetError;
use crate::freshness::Freshness;
use crate::inflight::{Claim, InFlight, Pending};
use crate::record::CacheRecord;
use crate::store::{FsRecordStore, RecordStore};
use crate::transport::{HttpResponse, HttpTransport, Transport, TransportError};

/// The outcome shared by all callers waiting for the same request.
type AssetResult = Result<String, AssetError>;

/// The result of asking the origin for the current body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revalidation {
    /// The prior record is still current, or had to be kept because the request failed.
    ///
    /// This carries the prior record unchanged, and never needs to be saved again.
    Unchanged(CacheRecord),
    /// The origin sent a new body.
    Updated(CacheRecord),
}

/// A remote resource, cached on local storage and revalidated with the origin.
///
/// The configuration is fixed at construction. All calls to [`get`](Self::get) that overlap
/// with a running request share the outcome of that request. Requests are spawned on the
/// current tokio runtime.
#[derive(Debug)]
pub struct Asset {
    inner: Arc<AssetInner>,
    in_flight: InFlight<AssetResult>,
}

#[derive(Debug)]
struct AssetInner {
    url: Url,
    key: CacheKey,
    stale_after: Duration,
    serve_stale_on_fail: bool,
    transport: Arc<dyn Transport>,
    /// `None` if caching is disabled.
    store: Option<Arc<dyn RecordStore>>,
}

impl Asset {
    /// Creates an asset with its own HTTP client and a filesystem record store.
    pub fn new(url: Url, options: &AssetOptions, config: &Config) -> Result<Self, TransportError> {
        let transport = Arc::new(HttpTransport::from_config(config)?);
        Ok(Self::with_transport(url, options, config, transport))
    }

    /// Creates an asset using the given `transport` and a filesystem record store.
    ///
    /// The location of the record is resolved with [`AssetOptions::cache_location`].
    pub fn with_transport(
        url: Url,
        options: &AssetOptions,
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let location = options.cache_location(&url, config);
        if options.cache {
            tracing::trace!(
                "Caching asset `{}` at path {}",
                url,
                location.path().display()
            );
        }

        let CacheLocation { root, key } = location;
        let store = options
            .cache
            .then(|| Arc::new(FsRecordStore::new(root)) as Arc<dyn RecordStore>);

        Self::from_parts(url, key, options, transport, store)
    }

    /// Creates an asset from explicit collaborators.
    ///
    /// The `store` is ignored if caching is disabled in `options`.
    pub fn from_parts(
        url: Url,
        key: CacheKey,
        options: &AssetOptions,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn RecordStore>>,
    ) -> Self {
        let inner = AssetInner {
            url,
            key,
            stale_after: options.stale_after,
            serve_stale_on_fail: options.serve_stale_on_fail,
            transport,
            store: store.filter(|_| options.cache),
        };

        Self {
            inner: Arc::new(inner),
            in_flight: InFlight::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.inner.key
    }

    /// Returns the current body of the asset.
    ///
    /// Serves the cached body while it is fresh, and otherwise asks the origin, conditionally
    /// if the cached record has an `ETag`. If the request fails, the previously cached body is
    /// served instead. An error is only returned if there is no cached body to fall back to.
    pub async fn get(&self) -> Result<String, AssetError> {
        if let Some(pending) = self.in_flight.join() {
            metric!(counter("asset.channel.hit") += 1);
            return self.wait(pending).await;
        }

        let record = self.inner.load().await;
        let verdict = Freshness::evaluate(record.as_ref(), Utc::now(), self.inner.stale_after);
        metric!(counter("asset.get") += 1, "verdict" => verdict.as_str());

        match record {
            Some(record) if !verdict.needs_request() => {
                tracing::debug!(url = %self.inner.url, "asset cache is fresh, skipping request");
                Ok(record.body)
            }
            prior => {
                tracing::debug!(
                    url = %self.inner.url,
                    verdict = verdict.as_str(),
                    "requesting asset"
                );
                self.refresh(prior).await
            }
        }
    }

    /// Revalidates `prior` with the origin, or attaches to the request that is already running.
    async fn refresh(&self, prior: Option<CacheRecord>) -> AssetResult {
        let claim = self.in_flight.claim_or_join(|| {
            let inner = Arc::clone(&self.inner);
            async move { inner.refresh(prior).await }
        });

        let pending = match claim {
            Claim::Started(pending) => {
                metric!(counter("asset.channel.miss") += 1);
                pending
            }
            Claim::Joined(pending) => {
                metric!(counter("asset.channel.hit") += 1);
                pending
            }
        };

        self.wait(pending).await
    }

    async fn wait(&self, pending: Pending<AssetResult>) -> AssetResult {
        pending.await.unwrap_or_else(|_cancelled| {
            Err(AssetError::Interrupted {
                url: self.inner.url.clone(),
            })
        })
    }
}

impl AssetInner {
    /// Loads the cached record, treating any storage failure as a cache miss.
    async fn load(&self) -> Option<CacheRecord> {
        let store = self.store.as_ref()?;
        match store.load(&self.key).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    key = %self.key,
                    "failed to load cache record, treating as miss"
                );
                None
            }
        }
    }

    /// Persists a freshly fetched record.
    ///
    /// A failed write is logged, the body is still served.
    async fn save(&self, record: &CacheRecord) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.save(&self.key, record).await {
            Ok(()) => {
                metric!(counter("asset.store.write") += 1, "status" => "ok");
            }
            Err(err) => {
                metric!(counter("asset.store.write") += 1, "status" => "failed");
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    key = %self.key,
                    "failed to save cache record"
                );
            }
        }
    }

    /// The unit of work that runs while an asset is in flight: request, then persist.
    async fn refresh(self: Arc<Self>, prior: Option<CacheRecord>) -> AssetResult {
        match self.request(prior).await? {
            Revalidation::Updated(record) => {
                self.save(&record).await;
                Ok(record.body)
            }
            Revalidation::Unchanged(record) => Ok(record.body),
        }
    }

    /// Asks the origin for the current body, conditionally on the `ETag` of `prior`.
    ///
    /// Failures fall back to `prior` if there is one. Otherwise, the failure is returned.
    async fn request(&self, mut prior: Option<CacheRecord>) -> Result<Revalidation, AssetError> {
        let etag = prior.as_ref().and_then(|record| record.etag.as_deref());
        if prior.is_some() {
            tracing::debug!(url = %self.url, etag, "requesting asset update with cache");
        }

        let response = self.transport.get(&self.url, etag).await;
        let failure = match response {
            Ok(response) => {
                metric!(counter("asset.request") += 1, "status" => response.status.as_str());
                match response.status {
                    StatusCode::NOT_MODIFIED => {
                        if let Some(prior) = prior.take() {
                            tracing::debug!(url = %self.url, "304 - cache is good");
                            return Ok(Revalidation::Unchanged(prior));
                        }
                        AssetError::Status {
                            url: self.url.clone(),
                            status: response.status,
                        }
                    }
                    StatusCode::OK => return Ok(Revalidation::Updated(self.record_from(response))),
                    status => AssetError::Status {
                        url: self.url.clone(),
                        status,
                    },
                }
            }
            Err(err) => {
                metric!(counter("asset.request") += 1, "status" => "error");
                AssetError::Transport {
                    url: self.url.clone(),
                    details: err.to_string(),
                }
            }
        };

        match prior {
            Some(prior) if self.serve_stale_on_fail => {
                metric!(counter("asset.recovered") += 1);
                tracing::warn!(
                    error = &failure as &dyn std::error::Error,
                    "request failure, recovering with cache"
                );
                Ok(Revalidation::Unchanged(prior))
            }
            _ => Err(failure),
        }
    }

    fn record_from(&self, response: HttpResponse) -> CacheRecord {
        let etag = response.etag().map(ToOwned::to_owned);
        let expires = response.expires().map(ToOwned::to_owned);
        metric!(time_raw("asset.body.size") = response.body.len() as u64);

        CacheRecord::new(response.body, etag, Utc::now()).with_expires_header(expires.as_deref())
    }
}

/// Creates [`Asset`]s that share one HTTP client and the process-wide [`Config`].
#[derive(Debug, Clone)]
pub struct Assets {
    config: Config,
    transport: Arc<dyn Transport>,
}

impl Assets {
    pub fn from_config(config: Config) -> Result<Self, TransportError> {
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        Ok(Self { config, transport })
    }

    /// Creates the asset for `url`.
    pub fn asset(&self, url: Url, options: &AssetOptions) -> Asset {
        Asset::with_transport(url, options, &self.config, Arc::clone(&self.transport))
    }
}
