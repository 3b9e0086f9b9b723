//! Extension manifest model.
//!
//! A manifest identifies an extension (`id`) and describes it. The registry
//! advertises manifests in its catalog; each installed extension keeps a copy
//! as `manifest.json` in its directory. The `latest_url` of a manifest points
//! at a [`LatestRelease`] descriptor listing per-platform downloadable assets.

use std::collections::HashMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{FlickError, FlickResult};

/// Descriptive record identifying an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Stable unique identifier; also the name of the install directory.
    pub id: String,

    /// Human-readable display name.
    pub name: String,

    #[serde(default)]
    pub author: String,

    /// Semantic version of this manifest value.
    pub version: Version,

    #[serde(default)]
    pub description: String,

    /// Endpoint serving the [`LatestRelease`] descriptor.
    pub latest_url: String,
}

impl ExtensionManifest {
    /// Validate the manifest for required fields and constraints.
    ///
    /// The id becomes a directory name, so it is restricted to lowercase
    /// alphanumerics, `-` and `_`.
    pub fn validate(&self) -> FlickResult<()> {
        if !is_valid_id(&self.id) {
            return Err(FlickError::Conversion(format!(
                "invalid extension id '{}'",
                self.id
            )));
        }

        if self.name.trim().is_empty() {
            return Err(FlickError::Conversion(format!(
                "extension '{}' requires a name",
                self.id
            )));
        }

        if self.latest_url.trim().is_empty() {
            return Err(FlickError::Conversion(format!(
                "extension '{}' requires a latest_url",
                self.id
            )));
        }

        Ok(())
    }
}

/// A manifest as advertised by the registry catalog. Never persisted.
pub type AvailableExtension = ExtensionManifest;

/// An extension present in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledExtension {
    pub manifest: ExtensionManifest,
    pub icon_path: std::path::PathBuf,
    pub enabled: bool,
}

impl InstalledExtension {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

/// Artifact descriptor served at a manifest's `latest_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestRelease {
    pub version: Version,

    /// Assets keyed by platform (`<os>-<arch>`, e.g. `linux-x86_64`).
    #[serde(default)]
    pub assets: HashMap<String, Asset>,
}

impl LatestRelease {
    pub fn asset_for(&self, platform: &str) -> Option<&Asset> {
        self.assets.get(platform)
    }
}

/// One downloadable artifact and its expected SHA-256 digest (hex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub url: String,
    pub checksum: String,
}

/// Whether `id` is usable as an extension identifier.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
