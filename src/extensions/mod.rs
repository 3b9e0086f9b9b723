//! Extension system for Flick.
//!
//! Extensions are native modules published to a remote registry, installed
//! into a local store and invoked on demand.
//!
//! # Architecture
//!
//! ```text
//! ExtensionManager
//! ├── store: ExtensionStore           (one directory per id)
//! ├── registry: Arc<dyn Registry>     (catalog + release descriptors + artifacts)
//! ├── loader: DynamicLoader           (one load per invocation)
//! └── ledger: Mutex<Ledger>           (config store, serialized with store writes)
//! ```
//!
//! Downloads and checksum verification happen without holding the ledger
//! lock; only the final swap into the store and the config reconciliation do.

pub mod installer;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod store;
pub mod update;

use serde::{Deserialize, Serialize};

pub use installer::{platform_key, ArtifactPayload};
pub use loader::{DynamicLoader, LoadState, LoaderConfig};
pub use manager::ExtensionManager;
pub use manifest::{
    Asset, AvailableExtension, ExtensionManifest, InstalledExtension, LatestRelease,
};
pub use registry::{HttpRegistry, Registry};
pub use store::{ExtensionRecord, ExtensionStore};
pub use update::{update_extensions, UpdateFailure, UpdateReport};

/// Unique identifier for an extension.
pub type ExtensionId = String;

/// Where extension code runs when invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// A short-lived worker process per invocation.
    #[default]
    Process,
    /// Directly inside the host process.
    InProcess,
}
