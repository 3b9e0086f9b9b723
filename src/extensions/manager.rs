//! Extension lifecycle: install, delete, enable, run.
//!
//! The manager owns the single writer lock. Every change to the store's
//! membership and the matching config reconciliation happen inside one
//! critical section, so no caller ever observes an installed id missing from
//! `ordered` or a deleted id still referenced by it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::installer::{self, platform_key, ArtifactPayload};
use super::loader::{DynamicLoader, LoaderConfig};
use super::manifest::{AvailableExtension, ExtensionManifest, InstalledExtension, LatestRelease};
use super::registry::Registry;
use super::store::{ExtensionRecord, ExtensionStore};
use crate::config::{Config, ConfigStore, Settings};
use crate::error::{FlickError, FlickResult};

/// State guarded by the writer lock.
struct Ledger {
    config: ConfigStore,
}

impl Ledger {
    /// Run `f` against a copy of the config store on the blocking pool and
    /// keep the copy only if `f` succeeds.
    async fn update<T, F>(&mut self, f: F) -> FlickResult<T>
    where
        F: FnOnce(&mut ConfigStore) -> FlickResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut config = self.config.clone();
        let (config, value) = blocking(move || {
            let value = f(&mut config)?;
            Ok((config, value))
        })
        .await?;
        self.config = config;
        Ok(value)
    }
}

/// Installs in flight, and a per-id counter bumped by every delete.
#[derive(Debug, Default)]
struct Inflight {
    epochs: HashMap<String, u64>,
    active: HashMap<String, usize>,
}

impl Inflight {
    fn epoch(&self, id: &str) -> u64 {
        self.epochs.get(id).copied().unwrap_or(0)
    }
}

fn lock_inflight(inflight: &StdMutex<Inflight>) -> MutexGuard<'_, Inflight> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of one running install. Dropping it ends the registration.
struct InstallTicket {
    id: String,
    epoch: u64,
    inflight: Arc<StdMutex<Inflight>>,
}

impl InstallTicket {
    /// Whether a delete of the same id started after this install did.
    fn cancelled(&self) -> bool {
        lock_inflight(&self.inflight).epoch(&self.id) != self.epoch
    }
}

impl Drop for InstallTicket {
    fn drop(&mut self) {
        let mut inflight = lock_inflight(&self.inflight);
        if let Some(count) = inflight.active.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                inflight.active.remove(&self.id);
            }
        }
    }
}

fn not_newer(id: &str, offered: &semver::Version, installed: &semver::Version) -> FlickError {
    FlickError::Conversion(format!(
        "release {} of '{}' is not newer than installed {}",
        offered, id, installed
    ))
}

async fn blocking<T, F>(f: F) -> FlickResult<T>
where
    F: FnOnce() -> FlickResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Owner of the extension store, the config store and the loader.
pub struct ExtensionManager {
    store: ExtensionStore,
    registry: Arc<dyn Registry>,
    loader: DynamicLoader,
    platform: String,
    ledger: Mutex<Ledger>,
    inflight: Arc<StdMutex<Inflight>>,
}

impl ExtensionManager {
    /// Open the manager on the directories named by `settings`.
    pub fn open(settings: &Settings, registry: Arc<dyn Registry>) -> FlickResult<Self> {
        let store = ExtensionStore::new(settings.extensions_dir());
        let config = ConfigStore::open(settings.config_path())?;
        let loader = DynamicLoader::new(LoaderConfig {
            isolation: settings.isolation,
            worker_exe: None,
            timeout: settings.request_timeout(),
        });

        Self::new(store, config, registry, loader, platform_key())
    }

    /// Assemble a manager. Clears interrupted writes and reconciles the
    /// config against what is installed.
    pub fn new(
        store: ExtensionStore,
        mut config: ConfigStore,
        registry: Arc<dyn Registry>,
        loader: DynamicLoader,
        platform: String,
    ) -> FlickResult<Self> {
        store.ensure_root()?;
        store.sweep()?;
        if config.reconcile(&store.ids()?)? {
            info!(path = %config.path().display(), "repaired config at startup");
        }

        Ok(Self {
            store,
            registry,
            loader,
            platform,
            ledger: Mutex::new(Ledger { config }),
            inflight: Arc::new(StdMutex::new(Inflight::default())),
        })
    }

    pub fn store(&self) -> &ExtensionStore {
        &self.store
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    async fn store_ids(&self) -> FlickResult<Vec<String>> {
        let store = self.store.clone();
        blocking(move || store.ids()).await
    }

    fn to_installed(record: ExtensionRecord, config: &Config) -> InstalledExtension {
        InstalledExtension {
            icon_path: record.icon_path(),
            enabled: config.is_enabled(&record.manifest.id),
            manifest: record.manifest,
        }
    }

    /// Snapshot of installed extensions.
    pub async fn installed(&self) -> FlickResult<Vec<InstalledExtension>> {
        // Under the lock so a replacement in progress is never seen half-swapped.
        let ledger = self.ledger.lock().await;
        let store = self.store.clone();
        let records = blocking(move || store.list()).await?;

        let config = ledger.config.get();
        Ok(records
            .into_iter()
            .map(|record| Self::to_installed(record, config))
            .collect())
    }

    /// Fetch the registry catalog.
    pub async fn fetch_online(&self) -> FlickResult<Vec<AvailableExtension>> {
        let catalog = self.registry.fetch_catalog().await?;
        debug!(count = catalog.len(), "fetched registry catalog");
        Ok(catalog)
    }

    fn begin_install(&self, id: &str) -> InstallTicket {
        let mut inflight = lock_inflight(&self.inflight);
        *inflight.active.entry(id.to_string()).or_insert(0) += 1;
        InstallTicket {
            id: id.to_string(),
            epoch: inflight.epoch(id),
            inflight: self.inflight.clone(),
        }
    }

    /// Bump the delete epoch of `id`; returns whether installs were running.
    fn cancel_installs(&self, id: &str) -> bool {
        let mut inflight = lock_inflight(&self.inflight);
        *inflight.epochs.entry(id.to_string()).or_insert(0) += 1;
        inflight.active.get(id).copied().unwrap_or(0) > 0
    }

    /// Forget the delete epoch of `id` once no install of it is running.
    fn settle_delete(&self, id: &str) {
        let mut inflight = lock_inflight(&self.inflight);
        if !inflight.active.contains_key(id) {
            inflight.epochs.remove(id);
        }
    }

    /// Download, verify and install (or replace) the extension described by
    /// `manifest`.
    ///
    /// Any failure before the final swap leaves the store and the config as
    /// they were. A delete of the same id issued while this runs wins.
    pub async fn download_and_install(
        &self,
        manifest: ExtensionManifest,
    ) -> FlickResult<InstalledExtension> {
        manifest.validate()?;
        let ticket = self.begin_install(&manifest.id);
        info!(id = %manifest.id, "installing extension");

        let (manifest, payload) =
            installer::fetch_verified(self.registry.as_ref(), &manifest, &self.platform).await?;

        self.commit_install(ticket, manifest, payload, false).await
    }

    /// Replace the installed `current` with `release`.
    ///
    /// Refuses a release that is not strictly newer than the installed
    /// version, both before downloading and again at commit time.
    pub async fn upgrade(
        &self,
        current: &ExtensionManifest,
        release: LatestRelease,
    ) -> FlickResult<InstalledExtension> {
        if release.version <= current.version {
            return Err(not_newer(&current.id, &release.version, &current.version));
        }

        let ticket = self.begin_install(&current.id);
        info!(id = %current.id, from = %current.version, to = %release.version, "upgrading extension");

        let (manifest, payload) =
            installer::fetch_release(self.registry.as_ref(), current, release, &self.platform)
                .await?;

        self.commit_install(ticket, manifest, payload, true).await
    }

    async fn commit_install(
        &self,
        ticket: InstallTicket,
        manifest: ExtensionManifest,
        payload: ArtifactPayload,
        require_newer: bool,
    ) -> FlickResult<InstalledExtension> {
        let mut ledger = self.ledger.lock().await;
        if ticket.cancelled() {
            info!(id = %manifest.id, "install cancelled by delete");
            return Err(FlickError::FileSystem(format!(
                "install of '{}' cancelled by delete",
                manifest.id
            )));
        }

        let store = self.store.clone();
        let record = blocking(move || {
            if require_newer {
                if let Some(existing) = store.get(&manifest.id)? {
                    if manifest.version <= existing.manifest.version {
                        return Err(not_newer(
                            &manifest.id,
                            &manifest.version,
                            &existing.manifest.version,
                        ));
                    }
                }
            }
            store.install_or_replace(&manifest, &payload.module, payload.icon.as_deref())
        })
        .await?;

        let ids = self.store_ids().await?;
        ledger.update(move |config| config.reconcile(&ids)).await?;

        info!(id = %record.manifest.id, version = %record.manifest.version, "extension installed");
        Ok(Self::to_installed(record, ledger.config.get()))
    }

    /// Remove an installed extension and every config reference to it.
    pub async fn delete(&self, id: &str) -> FlickResult<()> {
        let cancelled = self.cancel_installs(id);

        let mut ledger = self.ledger.lock().await;
        let store = self.store.clone();
        let target = id.to_string();
        let removed = blocking(move || store.delete(&target)).await;

        let ids = self.store_ids().await?;
        ledger.update(move |config| config.reconcile(&ids)).await?;
        self.settle_delete(id);

        match removed {
            Ok(()) => {
                info!(id = %id, "extension deleted");
                Ok(())
            }
            // Nothing on disk yet, but the pending install will not land.
            Err(_) if cancelled => {
                info!(id = %id, "delete cancelled a pending install");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Enable or disable an installed extension. No-op if already in that state.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> FlickResult<Config> {
        let mut ledger = self.ledger.lock().await;
        let ids = self.store_ids().await?;
        if !ids.iter().any(|known| known == id) {
            return Err(FlickError::Conversion(format!(
                "unknown extension id '{}'",
                id
            )));
        }

        let current = ledger.config.get().clone();
        if current.is_enabled(id) == enabled {
            return Ok(current);
        }

        let mut next = current;
        if enabled {
            next.enabled.push(id.to_string());
        } else {
            next.enabled.retain(|e| e != id);
        }

        let next = ledger
            .update(move |config| {
                let next = config.prepare(next, &ids)?;
                config.commit(next.clone())?;
                Ok(next)
            })
            .await?;
        debug!(id = %id, enabled, "toggled extension");
        Ok(next)
    }

    /// Invoke an installed extension once.
    pub async fn run(&self, id: &str) -> FlickResult<()> {
        let store = self.store.clone();
        let lookup = id.to_string();
        let record = blocking(move || store.get(&lookup))
            .await?
            .ok_or_else(|| FlickError::Conversion(format!("unknown extension id '{}'", id)))?;

        let loader = self.loader.clone();
        let id = id.to_string();
        blocking(move || loader.invoke(&id, &record.module_path())).await
    }

    /// Current reconciled config.
    pub async fn config(&self) -> Config {
        self.ledger.lock().await.config.get().clone()
    }

    /// Validate, apply and persist a new config.
    ///
    /// `apply` receives the current and the reconciled candidate config and
    /// performs the external side effects (hotkey, autostart). It runs on
    /// the blocking pool, so it may wait. If it fails, nothing is persisted.
    /// Calls are applied one at a time in arrival order.
    pub async fn change_config<F>(&self, candidate: Config, apply: F) -> FlickResult<Config>
    where
        F: FnOnce(&Config, &Config) -> FlickResult<()> + Send + 'static,
    {
        let mut ledger = self.ledger.lock().await;
        let ids = self.store_ids().await?;
        let next = ledger
            .update(move |config| {
                let next = config.prepare(candidate, &ids)?;
                apply(config.get(), &next)?;
                config.commit(next.clone())?;
                Ok(next)
            })
            .await?;

        info!(
            autolaunch = next.autolaunch,
            shortcut = %next.shortcut,
            enabled = next.enabled.len(),
            "config changed"
        );
        Ok(next)
    }

    /// The extension a shortcut press runs: the first enabled one in order.
    pub async fn trigger_target(&self) -> Option<String> {
        let ledger = self.ledger.lock().await;
        let config = ledger.config.get();
        let target = config
            .ordered
            .iter()
            .find(|id| config.is_enabled(id))
            .cloned();
        if target.is_none() {
            warn!("shortcut pressed but no extension is enabled");
        }
        target
    }
}
