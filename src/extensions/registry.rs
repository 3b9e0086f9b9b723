//! Registry client.
//!
//! The registry serves three things: the catalog (a JSON array of
//! manifests), one release descriptor per extension at its `latest_url`,
//! and the artifact bytes the descriptors point to.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::manifest::{AvailableExtension, LatestRelease};
use crate::error::{FlickError, FlickResult};

/// Remote source of extension manifests and artifacts.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the full catalog of available extensions.
    async fn fetch_catalog(&self) -> FlickResult<Vec<AvailableExtension>>;

    /// Fetch the release descriptor served at `url`.
    async fn fetch_latest(&self, url: &str) -> FlickResult<LatestRelease>;

    /// Download raw artifact bytes.
    async fn download(&self, url: &str) -> FlickResult<Vec<u8>>;
}

/// Registry reached over HTTP(S).
pub struct HttpRegistry {
    client: reqwest::Client,
    catalog_url: String,
}

impl HttpRegistry {
    pub fn new(catalog_url: impl Into<String>, timeout: Duration) -> FlickResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flick/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            catalog_url: catalog_url.into(),
        })
    }

    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    async fn get_bytes(&self, url: &str) -> FlickResult<Vec<u8>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FlickError::NetworkRequest(format!(
                "GET {} failed: {}",
                url,
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        debug!(url = %url, len = bytes.len(), "fetched");
        Ok(bytes.to_vec())
    }

    /// Transport failures map to `NetworkRequest`, bad payloads to `Json`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> FlickResult<T> {
        let bytes = self.get_bytes(url).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn fetch_catalog(&self) -> FlickResult<Vec<AvailableExtension>> {
        self.get_json(&self.catalog_url).await
    }

    async fn fetch_latest(&self, url: &str) -> FlickResult<LatestRelease> {
        self.get_json(url).await
    }

    async fn download(&self, url: &str) -> FlickResult<Vec<u8>> {
        self.get_bytes(url).await
    }
}
