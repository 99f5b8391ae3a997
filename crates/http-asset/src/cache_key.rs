use std::ffi::OsStr;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

/// Addresses the cache record of one asset inside a record store.
///
/// A key is always a single, safe path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    id: Arc<str>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl CacheKey {
    /// Creates a key from the lowercase hex sha-256 of the `url`.
    pub fn from_url(url: &Url) -> Self {
        let hash = Sha256::digest(url.as_str().as_bytes());
        Self {
            id: hex::encode(hash).into(),
        }
    }

    /// Creates a key from a user-provided identifier.
    pub fn from_id(id: &str) -> Self {
        Self {
            id: safe_path_segment(id).into(),
        }
    }

    /// Creates a key from the file name of an explicit cache path.
    pub(crate) fn from_file_name(name: &OsStr) -> Self {
        Self {
            id: name.to_string_lossy().into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

/// Protect against:
/// * ".."
/// * absolute paths
/// * ":" (not a threat on POSIX filesystems, but confuses OS X Finder)
fn safe_path_segment(s: &str) -> String {
    s.replace(['.', '/', '\\', ':'], "_")
}
