use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// An error returned from [`Asset::get`](crate::Asset::get).
///
/// This is only ever returned when no cached body could be served instead. The error is
/// `Clone`, as one failed request is reported to all callers that were waiting for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// The origin responded with a status other than `200 OK`.
    #[error("failed to fetch http asset: {status} - \"{url}\"")]
    Status { url: Url, status: StatusCode },
    /// The origin could not be reached, or the response could not be read.
    ///
    /// The attached string contains the underlying transport error.
    #[error("failed to fetch http asset: {details} - \"{url}\"")]
    Transport { url: Url, details: String },
    /// The request was dropped before it produced a result.
    #[error("request for http asset was interrupted - \"{url}\"")]
    Interrupted { url: Url },
}

impl AssetError {
    /// The URL of the asset that failed.
    pub fn url(&self) -> &Url {
        match self {
            Self::Status { url, .. } | Self::Transport { url, .. } | Self::Interrupted { url } => {
                url
            }
        }
    }

    /// The status the origin responded with, if it responded at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
