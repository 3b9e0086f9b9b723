//! Platform collaborators: autostart and host self-update.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::write_atomic;
use crate::error::{FlickError, FlickResult};
use crate::extensions::installer::verify_checksum;
use crate::extensions::Registry;

/// Starts the host together with the operating system.
pub trait AutostartManager: Send + Sync {
    fn set_enabled(&self, enabled: bool) -> FlickResult<()>;
    fn is_enabled(&self) -> bool;
}

/// Cross-platform autostart using auto-launch
pub struct AutoLaunchAutostart {
    auto_launch: auto_launch::AutoLaunch,
}

impl AutoLaunchAutostart {
    pub fn new() -> FlickResult<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|e| FlickError::AutostartConfig(e.to_string()))?
            .to_string_lossy()
            .to_string();

        let auto_launch = auto_launch::AutoLaunchBuilder::new()
            .set_app_name("Flick")
            .set_app_path(&exe_path)
            .build()
            .map_err(|e| FlickError::AutostartConfig(e.to_string()))?;

        Ok(Self { auto_launch })
    }
}

impl AutostartManager for AutoLaunchAutostart {
    fn set_enabled(&self, enabled: bool) -> FlickResult<()> {
        if enabled {
            self.auto_launch
                .enable()
                .map_err(|e| FlickError::AutostartConfig(e.to_string()))
        } else {
            self.auto_launch
                .disable()
                .map_err(|e| FlickError::AutostartConfig(e.to_string()))
        }
    }

    fn is_enabled(&self) -> bool {
        self.auto_launch.is_enabled().unwrap_or(false)
    }
}

/// Stand-in when the OS autostart backend could not be set up.
pub struct UnavailableAutostart {
    reason: String,
}

impl UnavailableAutostart {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AutostartManager for UnavailableAutostart {
    fn set_enabled(&self, _enabled: bool) -> FlickResult<()> {
        Err(FlickError::AutostartConfig(self.reason.clone()))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// The OS autostart backend, or a stand-in reporting why it is unavailable.
pub fn system_autostart() -> Arc<dyn AutostartManager> {
    match AutoLaunchAutostart::new() {
        Ok(autostart) => Arc::new(autostart),
        Err(e) => {
            warn!(%e, "autostart unavailable");
            Arc::new(UnavailableAutostart::new(e.to_string()))
        }
    }
}

/// Result of an app update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AppUpdateStatus {
    UpToDate { version: Version },
    /// A newer build was verified and left for the packaging layer to apply.
    Staged { version: Version, path: PathBuf },
}

/// Updates the host application itself.
#[async_trait]
pub trait AppUpdater: Send + Sync {
    async fn update(&self) -> FlickResult<AppUpdateStatus>;
}

/// Updater reading a release descriptor feed (same shape as extension releases).
pub struct ReleaseFeedUpdater {
    registry: Arc<dyn Registry>,
    feed_url: String,
    current: Version,
    platform: String,
    updates_dir: PathBuf,
}

impl ReleaseFeedUpdater {
    pub fn new(
        registry: Arc<dyn Registry>,
        feed_url: impl Into<String>,
        current: Version,
        platform: impl Into<String>,
        updates_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            feed_url: feed_url.into(),
            current,
            platform: platform.into(),
            updates_dir: updates_dir.into(),
        }
    }
}

#[async_trait]
impl AppUpdater for ReleaseFeedUpdater {
    async fn update(&self) -> FlickResult<AppUpdateStatus> {
        let release = self.registry.fetch_latest(&self.feed_url).await?;
        if release.version <= self.current {
            return Ok(AppUpdateStatus::UpToDate {
                version: self.current.clone(),
            });
        }

        let asset = release
            .asset_for(&self.platform)
            .ok_or_else(|| FlickError::NoAssets(self.platform.clone()))?;
        let bytes = self.registry.download(&asset.url).await?;
        verify_checksum(&bytes, &asset.checksum)?;

        let file_name = asset
            .url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("flick.tar.gz")
            .to_string();
        let path = self
            .updates_dir
            .join(release.version.to_string())
            .join(file_name);

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes)).await??;

        info!(version = %release.version, path = %path.display(), "staged app update");
        Ok(AppUpdateStatus::Staged {
            version: release.version,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::extensions::installer::platform_key;
    use crate::extensions::registry::fake::FakeRegistry;
    use tempfile::TempDir;

    fn updater(registry: Arc<FakeRegistry>, current: &str, dir: &TempDir) -> ReleaseFeedUpdater {
        ReleaseFeedUpdater::new(
            registry,
            FakeRegistry::manifest("flick", "0.0.0").latest_url,
            Version::parse(current).unwrap(),
            platform_key(),
            dir.path().join("updates"),
        )
    }

    #[test]
    fn test_unavailable_autostart_reports_reason() {
        let autostart = UnavailableAutostart::new("no session bus");
        let err = autostart.set_enabled(true).unwrap_err();
        assert_eq!(err, FlickError::AutostartConfig("no session bus".to_string()));
        assert!(!autostart.is_enabled());
    }

    #[tokio::test]
    async fn test_stages_newer_release() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        registry.publish("flick", "0.2.0", b"new build");

        let status = updater(registry, "0.1.0", &temp_dir).update().await.unwrap();
        match status {
            AppUpdateStatus::Staged { version, path } => {
                assert_eq!(version, Version::new(0, 2, 0));
                assert!(path.starts_with(temp_dir.path().join("updates").join("0.2.0")));
                assert!(path.is_file());
            }
            other => panic!("expected staged update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_up_to_date_and_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        registry.publish("flick", "0.2.0", b"build");

        let status = updater(registry.clone(), "0.2.0", &temp_dir)
            .update()
            .await
            .unwrap();
        assert_eq!(
            status,
            AppUpdateStatus::UpToDate {
                version: Version::new(0, 2, 0)
            }
        );

        registry.corrupt("flick");
        let err = updater(registry, "0.1.0", &temp_dir)
            .update()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Checksum);
        assert!(!temp_dir.path().join("updates").exists());
    }
}
