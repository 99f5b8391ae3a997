use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache_key::CacheKey;

/// The name of the directory created below the system temp directory by default.
const DEFAULT_CACHE_DIR_NAME: &str = "http-asset";

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: std::env::var("STATSD_SERVER").ok(),
            prefix: "http_asset".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Process-wide settings shared by all assets.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that holds cache records of assets without an explicit cache location.
    pub cache_dir: PathBuf,

    pub logging: Logging,

    pub metrics: Metrics,

    /// The timeout for establishing a connection to the origin.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Global timeout for one request, including reading the body.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,

    /// The `User-Agent` sent with every request.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME),
            logging: Logging::default(),
            metrics: Metrics::default(),
            connect_timeout: Duration::from_secs(1),
            max_download_timeout: Duration::from_secs(5 * 60),
            user_agent: concat!("http-asset/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

/// Per-asset fetch and caching options.
///
/// The cache location is resolved in this order:
/// 1. an explicit [`cache_path`](Self::cache_path),
/// 2. [`cache_dir`](Self::cache_dir) and/or [`cache_name`](Self::cache_name), where a missing
///    directory falls back to [`Config::cache_dir`] and a missing name to the derived key,
/// 3. [`Config::cache_dir`] joined with the derived key.
///
/// The derived key is the [`id`](Self::id) if one is given, or a hash of the URL otherwise.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssetOptions {
    /// Overrides the hash of the URL as the cache key.
    pub id: Option<String>,

    /// Whether the asset is cached at all.
    pub cache: bool,

    /// The exact file holding the cache record.
    pub cache_path: Option<PathBuf>,

    /// The directory holding the cache record.
    pub cache_dir: Option<PathBuf>,

    /// The file name of the cache record inside the cache directory.
    pub cache_name: Option<String>,

    /// The age after which a cached record is revalidated with the origin.
    #[serde(with = "humantime_serde", alias = "cache_stale")]
    pub stale_after: Duration,

    /// Whether a failed revalidation falls back to the previously cached body.
    pub serve_stale_on_fail: bool,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self {
            id: None,
            cache: true,
            cache_path: None,
            cache_dir: None,
            cache_name: None,
            stale_after: Duration::from_secs(5 * 60),
            serve_stale_on_fail: true,
        }
    }
}

/// Where the cache record of one asset lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheLocation {
    /// The directory of the record store.
    pub root: PathBuf,
    /// The key of the record inside of `root`.
    pub key: CacheKey,
}

impl CacheLocation {
    /// The full path of the record file.
    pub fn path(&self) -> PathBuf {
        self.root.join(self.key.as_str())
    }
}

impl AssetOptions {
    /// Returns the key derived from the `id` override or the `url`.
    pub fn cache_key(&self, url: &Url) -> CacheKey {
        match self.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => CacheKey::from_id(id),
            None => CacheKey::from_url(url),
        }
    }

    /// Resolves the cache location of the asset at `url`.
    pub fn cache_location(&self, url: &Url, config: &Config) -> CacheLocation {
        if let Some(ref path) = self.cache_path {
            if let (Some(root), Some(name)) = (path.parent(), path.file_name()) {
                return CacheLocation {
                    root: root.to_path_buf(),
                    key: CacheKey::from_file_name(name),
                };
            }
            tracing::warn!(
                "Ignoring cache path `{}` without a file name",
                path.display()
            );
        }

        let root = self
            .cache_dir
            .clone()
            .unwrap_or_else(|| config.cache_dir.clone());
        let key = match self.cache_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => CacheKey::from_id(name),
            None => self.cache_key(url),
        };

        CacheLocation { root, key }
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
