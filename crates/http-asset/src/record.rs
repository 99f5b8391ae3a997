use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The last known-good copy of an asset, as kept in a record store.
///
/// Records are only ever replaced as a whole. A stored record without a `fetched_at`
/// timestamp does not deserialize, and is treated as a cache miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// The body as last fetched from the origin.
    pub body: String,

    /// The `ETag` validator of the response the body came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// When the body was fetched.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fetched_at: DateTime<Utc>,

    /// The origin-declared expiration from the `Expires` header.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheRecord {
    /// Creates a record for a body fetched at `fetched_at`.
    pub fn new(body: String, etag: Option<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            body,
            etag,
            fetched_at,
            expires_at: None,
        }
    }

    /// Sets the expiration from a raw `Expires` header value.
    ///
    /// Values that are not valid HTTP dates are ignored.
    pub fn with_expires_header(mut self, expires: Option<&str>) -> Self {
        self.expires_at = expires.and_then(parse_expires);
        self
    }
}

/// Parses an `Expires` header value.
pub fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    match httpdate::parse_http_date(value.trim()) {
        Ok(time) => Some(time.into()),
        Err(err) => {
            tracing::debug!(error = &err as &dyn std::error::Error, "Ignoring `Expires: {value}`");
            None
        }
    }
}
