//! Default-state reference and fetching
//!
//! The baked-in default snapshot is addressed by a location string: an
//! `http(s)://` URL, a `file://` URL, or a plain filesystem path. It is only
//! trusted after a probe confirms it is reachable and has the expected
//! content type.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Content type every snapshot is served with
pub const SNAPSHOT_CONTENT_TYPE: &str = "application/octet-stream";

/// Locator of a baked-in initial snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultStateReference {
    pub location: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    SNAPSHOT_CONTENT_TYPE.to_string()
}

impl DefaultStateReference {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            content_type: default_content_type(),
        }
    }

    /// Whether a probed content type satisfies this reference
    ///
    /// Media-type parameters (`; charset=...`) are ignored; comparison is
    /// case-insensitive. A missing content type never matches.
    pub fn accepts(&self, content_type: Option<&str>) -> bool {
        content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().eq_ignore_ascii_case(&self.content_type))
            .unwrap_or(false)
    }
}

/// Result of probing a location without downloading it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub content_type: Option<String>,
    pub len: Option<u64>,
}

/// Fetches snapshot bytes from a location
#[async_trait]
pub trait StateFetcher: Send + Sync {
    /// Check that the location is reachable; error if it is not
    async fn probe(&self, location: &str) -> Result<Probe>;

    /// Download the full content
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Fetcher for filesystem paths and `file://` URLs
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher {
    base_dir: Option<PathBuf>,
}

impl LocalFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative locations against `base_dir` instead of the CWD
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = PathBuf::from(location.strip_prefix("file://").unwrap_or(location));
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl StateFetcher for LocalFetcher {
    async fn probe(&self, location: &str) -> Result<Probe> {
        let path = self.resolve(location);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| CoreError::fetch(location, e))?;
        if !metadata.is_file() {
            return Err(CoreError::fetch(location, "not a regular file"));
        }
        Ok(Probe {
            content_type: Some(SNAPSHOT_CONTENT_TYPE.to_string()),
            len: Some(metadata.len()),
        })
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.resolve(location))
            .await
            .map_err(|e| CoreError::fetch(location, e))
    }
}

/// Fetcher for `http://` and `https://` URLs
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StateFetcher for HttpFetcher {
    async fn probe(&self, location: &str) -> Result<Probe> {
        let response = self
            .client
            .head(location)
            .send()
            .await
            .map_err(|e| CoreError::fetch(location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::fetch(location, format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Probe {
            content_type,
            len: response.content_length(),
        })
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| CoreError::fetch(location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::fetch(location, format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CoreError::fetch(location, e))?;
        Ok(body.to_vec())
    }
}

/// Dispatches to [`HttpFetcher`] or [`LocalFetcher`] by URL scheme
#[derive(Debug, Clone, Default)]
pub struct AnyFetcher {
    http: HttpFetcher,
    local: LocalFetcher,
}

impl AnyFetcher {
    pub fn new(http: HttpFetcher, local: LocalFetcher) -> Self {
        Self { http, local }
    }

    fn is_http(location: &str) -> bool {
        location.starts_with("http://") || location.starts_with("https://")
    }
}

#[async_trait]
impl StateFetcher for AnyFetcher {
    async fn probe(&self, location: &str) -> Result<Probe> {
        if Self::is_http(location) {
            self.http.probe(location).await
        } else {
            self.local.probe(location).await
        }
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        if Self::is_http(location) {
            self.http.fetch(location).await
        } else {
            self.local.fetch(location).await
        }
    }
}
