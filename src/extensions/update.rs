//! Update orchestration for installed extensions.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::manager::ExtensionManager;
use super::registry::Registry;
use crate::error::{FlickResult, WireError};

/// One extension that could not be updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFailure {
    pub id: String,
    pub error: WireError,
}

/// Outcome of [`update_extensions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    /// Ids replaced by a newer version.
    pub updated: Vec<String>,
    /// Ids already at (or ahead of) the version their descriptor serves.
    pub up_to_date: Vec<String>,
    pub failed: Vec<UpdateFailure>,
}

/// Bring every installed extension up to the version its release
/// descriptor serves.
///
/// Each installed extension is checked against its own `latest_url`, which
/// names the version an install would actually put on disk; the catalog
/// listing is not consulted. Only a strictly newer release is installed.
/// Each id is handled on its own and a failure is recorded in the report
/// without stopping the others. Replacement keeps the id, so the extension's
/// enabled flag and position in `ordered` are untouched.
pub async fn update_extensions(manager: &ExtensionManager) -> FlickResult<UpdateReport> {
    let installed = manager.installed().await?;
    let mut report = UpdateReport::default();

    for extension in installed {
        let id = extension.id().to_string();
        let local = &extension.manifest.version;

        let outcome = match manager
            .registry()
            .fetch_latest(&extension.manifest.latest_url)
            .await
        {
            Ok(release) if release.version <= *local => {
                debug!(id = %id, version = %local, remote = %release.version, "extension up to date");
                report.up_to_date.push(id);
                continue;
            }
            Ok(release) => manager.upgrade(&extension.manifest, release).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(updated) => {
                info!(id = %id, version = %updated.manifest.version, "extension updated");
                report.updated.push(id);
            }
            Err(e) => {
                warn!(id = %id, %e, "extension update failed");
                report.failed.push(UpdateFailure {
                    id,
                    error: WireError::from(&e),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{Config, ConfigStore};
    use crate::error::ErrorKind;
    use crate::extensions::installer::platform_key;
    use crate::extensions::registry::fake::FakeRegistry;
    use crate::extensions::{DynamicLoader, ExtensionStore};
    use semver::Version;
    use tempfile::TempDir;

    fn manager(dir: &std::path::Path, registry: Arc<FakeRegistry>) -> ExtensionManager {
        ExtensionManager::new(
            ExtensionStore::new(dir.join("extensions")),
            ConfigStore::open(dir.join("config.json")).unwrap(),
            registry,
            DynamicLoader::default(),
            platform_key(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_preserves_enabled_and_position() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let other = registry.publish("other", "1.0.0", b"other");
        let x = registry.publish("x", "0.1.0", b"x-v1");
        let manager = manager(temp_dir.path(), registry.clone());

        manager.download_and_install(other).await.unwrap();
        manager.download_and_install(x).await.unwrap();
        manager.set_enabled("x", true).await.unwrap();
        let config = Config {
            ordered: vec!["x".to_string(), "other".to_string()],
            ..manager.config().await
        };
        manager.change_config(config, |_, _| Ok(())).await.unwrap();

        registry.publish("x", "0.2.0", b"x-v2");
        let report = update_extensions(&manager).await.unwrap();
        assert_eq!(report.updated, vec!["x"]);
        assert_eq!(report.up_to_date, vec!["other"]);
        assert!(report.failed.is_empty());

        let record = manager.store().get("x").unwrap().unwrap();
        assert_eq!(record.manifest.version, Version::new(0, 2, 0));
        assert_eq!(std::fs::read(record.module_path()).unwrap(), b"x-v2");

        let config = manager.config().await;
        assert_eq!(config.ordered[0], "x");
        assert!(config.is_enabled("x"));
    }

    #[tokio::test]
    async fn test_catalog_bump_without_release_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let x = registry.publish("x", "0.2.0", b"x-v2");
        let manager = manager(temp_dir.path(), registry.clone());
        manager.download_and_install(x).await.unwrap();

        registry.advertise("x", "0.3.0");
        for _ in 0..2 {
            let report = update_extensions(&manager).await.unwrap();
            assert!(report.updated.is_empty());
            assert_eq!(report.up_to_date, vec!["x"]);
        }

        // Catalog ahead, descriptor behind the installed version
        registry.publish("x", "0.1.0", b"x-v1");
        registry.advertise("x", "0.3.0");
        let report = update_extensions(&manager).await.unwrap();
        assert!(report.updated.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.up_to_date, vec!["x"]);

        let record = manager.store().get("x").unwrap().unwrap();
        assert_eq!(record.manifest.version, Version::new(0, 2, 0));
        assert_eq!(std::fs::read(record.module_path()).unwrap(), b"x-v2");
    }

    #[tokio::test]
    async fn test_release_outside_catalog_is_updated() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let x = registry.publish("x", "0.1.0", b"x-v1");
        let manager = manager(temp_dir.path(), registry.clone());
        manager.download_and_install(x).await.unwrap();

        registry.publish("x", "0.2.0", b"x-v2");
        registry.unlist("x");

        let report = update_extensions(&manager).await.unwrap();
        assert_eq!(report.updated, vec!["x"]);
        let record = manager.store().get("x").unwrap().unwrap();
        assert_eq!(record.manifest.version, Version::new(0, 2, 0));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_others() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let a = registry.publish("a", "0.1.0", b"a1");
        let b = registry.publish("b", "0.1.0", b"b1");
        let manager = manager(temp_dir.path(), registry.clone());

        manager.download_and_install(a).await.unwrap();
        manager.download_and_install(b).await.unwrap();

        registry.publish("a", "0.2.0", b"a2");
        registry.corrupt("a");
        registry.publish("b", "0.2.0", b"b2");

        let report = update_extensions(&manager).await.unwrap();
        assert_eq!(report.updated, vec!["b"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, "a");
        assert_eq!(report.failed[0].error.kind, ErrorKind::Checksum);

        let a = manager.store().get("a").unwrap().unwrap();
        assert_eq!(a.manifest.version, Version::new(0, 1, 0));
    }
}
