//! Command surface of the host process.
//!
//! [`App`] exposes one typed method per command. [`Request`] and [`Response`]
//! are the serialized forms used by the bridge and the CLI; [`App::handle`]
//! maps one onto the other.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{Config, Settings};
use crate::error::{FlickError, FlickResult, WireError};
use crate::extensions::{
    platform_key, update_extensions, AvailableExtension, ExtensionManager, ExtensionManifest,
    HttpRegistry, InstalledExtension, Registry, UpdateReport,
};
use crate::platform::{AppUpdateStatus, AppUpdater, AutostartManager, ReleaseFeedUpdater};
use crate::shortcut::{CapturedShortcut, KeyEvent, ShortcutBinder, ShortcutRecorder};

/// A command as it crosses the process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Request {
    GetVersion,
    GetInstalledExtensions,
    FetchOnlineExtensions,
    RunExtension { id: String },
    DownloadAndInstallExtension { manifest: ExtensionManifest },
    DeleteExtension { id: String },
    SetEnabled { id: String, enabled: bool },
    UpdateApp,
    UpdateExtensions,
    GetConfig,
    ChangeConfig { config: Config },
    ReadToString { path: PathBuf },
    CaptureKey { code: String, pressed: bool },
}

/// Result of one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Response {
    Ok(Value),
    Error(WireError),
}

impl Response {
    fn from_result<T: Serialize>(result: FlickResult<T>) -> Self {
        match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
            Ok(value) => Response::Ok(value),
            Err(e) => Response::Error(WireError::from(&e)),
        }
    }

    /// Turn the response back into a result on the client side.
    pub fn into_result(self) -> Result<Value, WireError> {
        match self {
            Response::Ok(value) => Ok(value),
            Response::Error(e) => Err(e),
        }
    }
}

/// The running application: extension manager plus its collaborators.
pub struct App {
    manager: Arc<ExtensionManager>,
    binder: Arc<dyn ShortcutBinder>,
    autostart: Arc<dyn AutostartManager>,
    updater: Arc<dyn AppUpdater>,
    recorder: Mutex<ShortcutRecorder>,
}

impl App {
    pub fn new(
        manager: Arc<ExtensionManager>,
        binder: Arc<dyn ShortcutBinder>,
        autostart: Arc<dyn AutostartManager>,
        updater: Arc<dyn AppUpdater>,
    ) -> Self {
        Self {
            manager,
            binder,
            autostart,
            updater,
            recorder: Mutex::new(ShortcutRecorder::new()),
        }
    }

    /// Wire up the app from host settings with the HTTP registry.
    pub fn from_settings(
        settings: &Settings,
        binder: Arc<dyn ShortcutBinder>,
        autostart: Arc<dyn AutostartManager>,
    ) -> FlickResult<Self> {
        let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(
            settings.registry_url.clone(),
            settings.request_timeout(),
        )?);
        let manager = ExtensionManager::open(settings, registry.clone())?;
        let current = Version::parse(env!("CARGO_PKG_VERSION"))?;
        let updater = ReleaseFeedUpdater::new(
            registry,
            settings.app_update_url.clone(),
            current,
            platform_key(),
            settings.updates_dir(),
        );

        Ok(Self::new(
            Arc::new(manager),
            binder,
            autostart,
            Arc::new(updater),
        ))
    }

    pub fn manager(&self) -> &ExtensionManager {
        &self.manager
    }

    /// Apply the persisted shortcut and autostart flag once at startup.
    ///
    /// Failures are logged; the host keeps running without them.
    pub async fn startup(&self) {
        let config = self.manager.config().await;
        let binder = self.binder.clone();
        let autostart = self.autostart.clone();

        let applied = tokio::task::spawn_blocking(move || {
            if let Err(e) = binder.rebind("", &config.shortcut) {
                warn!(shortcut = %config.shortcut, %e, "could not register global shortcut");
            }

            if autostart.is_enabled() != config.autolaunch {
                if let Err(e) = autostart.set_enabled(config.autolaunch) {
                    warn!(%e, "could not apply autostart setting");
                }
            }
        })
        .await;

        if let Err(e) = applied {
            warn!(%e, "startup settings task failed");
        }
    }

    /// Run the extension bound to the global shortcut.
    pub async fn trigger(&self) {
        if let Some(id) = self.manager.trigger_target().await {
            if let Err(e) = self.run_extension(&id).await {
                error!(id = %id, %e, "shortcut action failed");
            }
        }
    }

    pub fn get_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    pub async fn get_installed_extensions(&self) -> FlickResult<Vec<InstalledExtension>> {
        self.manager.installed().await
    }

    pub async fn fetch_online_extensions(&self) -> FlickResult<Vec<AvailableExtension>> {
        self.manager.fetch_online().await
    }

    pub async fn run_extension(&self, id: &str) -> FlickResult<()> {
        self.manager.run(id).await
    }

    pub async fn download_and_install_extension(
        &self,
        manifest: ExtensionManifest,
    ) -> FlickResult<InstalledExtension> {
        self.manager.download_and_install(manifest).await
    }

    pub async fn delete_extension(&self, id: &str) -> FlickResult<()> {
        self.manager.delete(id).await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> FlickResult<Config> {
        self.manager.set_enabled(id, enabled).await
    }

    pub async fn update_app(&self) -> FlickResult<AppUpdateStatus> {
        self.updater.update().await
    }

    pub async fn update_extensions(&self) -> FlickResult<UpdateReport> {
        update_extensions(&self.manager).await
    }

    pub async fn get_config(&self) -> Config {
        self.manager.config().await
    }

    /// Validate and store a new config, moving the global shortcut and the
    /// autostart entry along with it.
    ///
    /// The shortcut is re-bound first; if autostart then fails, the previous
    /// shortcut is restored and nothing is persisted.
    pub async fn change_config(&self, config: Config) -> FlickResult<Config> {
        let binder = self.binder.clone();
        let autostart = self.autostart.clone();

        self.manager
            .change_config(config, move |current, next| {
                let rebound = current.shortcut != next.shortcut;
                if rebound {
                    binder.rebind(&current.shortcut, &next.shortcut)?;
                }

                if current.autolaunch != next.autolaunch {
                    if let Err(e) = autostart.set_enabled(next.autolaunch) {
                        if rebound {
                            if let Err(undo) = binder.rebind(&next.shortcut, &current.shortcut) {
                                warn!(%undo, "could not restore previous shortcut");
                            }
                        }
                        return Err(e);
                    }
                }

                Ok(())
            })
            .await
    }

    pub async fn read_to_string(&self, path: &Path) -> FlickResult<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::read_to_string(&path).map_err(|e| {
                FlickError::FileSystem(format!("failed to read {}: {}", path.display(), e))
            })
        })
        .await?
    }

    /// Feed one raw key event to the shortcut recorder.
    pub fn capture_key(&self, code: String, pressed: bool) -> Option<CapturedShortcut> {
        let event = if pressed {
            KeyEvent::Pressed(code)
        } else {
            KeyEvent::Released(code)
        };

        self.recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .feed(event)
    }

    /// Execute one serialized request.
    pub async fn handle(&self, request: Request) -> Response {
        debug!(?request, "handling request");

        match request {
            Request::GetVersion => Response::from_result(Ok(self.get_version())),
            Request::GetInstalledExtensions => {
                Response::from_result(self.get_installed_extensions().await)
            }
            Request::FetchOnlineExtensions => {
                Response::from_result(self.fetch_online_extensions().await)
            }
            Request::RunExtension { id } => Response::from_result(self.run_extension(&id).await),
            Request::DownloadAndInstallExtension { manifest } => {
                Response::from_result(self.download_and_install_extension(manifest).await)
            }
            Request::DeleteExtension { id } => {
                Response::from_result(self.delete_extension(&id).await)
            }
            Request::SetEnabled { id, enabled } => {
                Response::from_result(self.set_enabled(&id, enabled).await)
            }
            Request::UpdateApp => Response::from_result(self.update_app().await),
            Request::UpdateExtensions => Response::from_result(self.update_extensions().await),
            Request::GetConfig => Response::from_result(Ok(self.get_config().await)),
            Request::ChangeConfig { config } => {
                Response::from_result(self.change_config(config).await)
            }
            Request::ReadToString { path } => {
                Response::from_result(self.read_to_string(&path).await)
            }
            Request::CaptureKey { code, pressed } => {
                Response::from_result(Ok(self.capture_key(code, pressed)))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Collaborator doubles shared by command and bridge tests.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Mutex};

    use async_trait::async_trait;
    use semver::Version;

    use crate::error::{FlickError, FlickResult};
    use crate::platform::{AppUpdateStatus, AppUpdater, AutostartManager};
    use crate::shortcut::ShortcutBinder;

    /// Records rebinds; refuses to register `reject`. With `hold` set, each
    /// rebind first waits for a message on it, like a binder thread would.
    #[derive(Default)]
    pub struct RecordingBinder {
        pub calls: Mutex<Vec<(String, String)>>,
        pub reject: Option<String>,
        pub hold: Option<Mutex<mpsc::Receiver<()>>>,
    }

    impl ShortcutBinder for RecordingBinder {
        fn rebind(&self, old: &str, new: &str) -> FlickResult<()> {
            if let Some(hold) = &self.hold {
                hold.lock().unwrap().recv().map_err(|_| {
                    FlickError::ShortcutRegistration("binder thread is gone".to_string())
                })?;
            }
            if self.reject.as_deref() == Some(new) {
                return Err(FlickError::ShortcutRegistration(format!(
                    "{} is taken",
                    new
                )));
            }
            self.calls
                .lock()
                .unwrap()
                .push((old.to_string(), new.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeAutostart {
        pub enabled: AtomicBool,
        pub broken: bool,
    }

    impl AutostartManager for FakeAutostart {
        fn set_enabled(&self, enabled: bool) -> FlickResult<()> {
            if self.broken {
                return Err(FlickError::AutostartConfig("login items unavailable".into()));
            }
            self.enabled.store(enabled, Ordering::SeqCst);
            Ok(())
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
    }

    pub struct NoopUpdater;

    #[async_trait]
    impl AppUpdater for NoopUpdater {
        async fn update(&self) -> FlickResult<AppUpdateStatus> {
            Ok(AppUpdateStatus::UpToDate {
                version: Version::new(0, 1, 0),
            })
        }
    }
}
