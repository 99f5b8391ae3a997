//! Issuing the actual HTTP requests for assets.

use std::fmt;

use futures::future::BoxFuture;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::config::Config;

/// A transport-level failure: the origin did not produce a complete response.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(#[from] reqwest::Error);

/// The parts of an HTTP response the engine looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    /// Returns the `ETag` validator, if the response carried a valid one.
    pub fn etag(&self) -> Option<&str> {
        self.header(header::ETAG)
    }

    /// Returns the raw `Expires` header.
    pub fn expires(&self) -> Option<&str> {
        self.header(header::EXPIRES)
    }

    fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// Issues `GET` requests, optionally conditional on an `ETag`.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// Requests `url`, sending `If-None-Match: <etag>` when an `etag` is given.
    ///
    /// Any status is a successful response at this level, only failing to get a response at
    /// all is an error.
    fn get<'a>(
        &'a self,
        url: &'a Url,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>>;
}

/// A [`Transport`] using a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a transport with a client configured from `config`.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Ok(Self::new(create_client(config)?))
    }

    async fn fetch(&self, url: &Url, etag: Option<&str>) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(url.clone());
        if let Some(etag) = etag {
            builder = builder.header(header::IF_NONE_MATCH, etag);
        }

        tracing::debug!("Fetching asset from `{}`", url);
        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(
        &'a self,
        url: &'a Url,
        etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        Box::pin(self.fetch(url, etag))
    }
}

/// Creates a [`reqwest::Client`] with the timeouts and user agent from `config`.
pub fn create_client(config: &Config) -> Result<Client, TransportError> {
    let client = reqwest::ClientBuilder::new()
        .gzip(true)
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connect_timeout)
        .timeout(config.max_download_timeout)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .build()?;
    Ok(client)
}
