use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::record::CacheRecord;

/// Whether a cached record can be served as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// There is no usable record.
    Missing,
    /// The record is past the expiration declared by the origin.
    Expired,
    /// The record is older than the configured staleness window.
    Stale,
    /// The record can be served without talking to the origin.
    Fresh,
}

impl Freshness {
    /// Computes the verdict for `record` at time `now`.
    ///
    /// A record expires strictly after its `expires_at`, and is stale once its age exceeds
    /// `stale_after`. An explicit expiration takes precedence over staleness.
    pub fn evaluate(
        record: Option<&CacheRecord>,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Self {
        let Some(record) = record else {
            return Self::Missing;
        };

        if record.expires_at.is_some_and(|expires_at| expires_at < now) {
            return Self::Expired;
        }

        // a record fetched "in the future" has a negative age, which is never stale
        let stale = match (now - record.fetched_at).to_std() {
            Ok(age) => age > stale_after,
            Err(_) => false,
        };

        if stale { Self::Stale } else { Self::Fresh }
    }

    /// Whether the origin needs to be asked for the current body.
    pub fn needs_request(self) -> bool {
        !matches!(self, Self::Fresh)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::Stale => "stale",
            Self::Fresh => "fresh",
        }
    }
}
