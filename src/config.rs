//! Configuration for Flick.
//!
//! Two layers live here:
//! - [`Config`]: the user's choices (autolaunch, shortcut, enabled and ordered
//!   extensions), persisted as `config.json` and owned by [`ConfigStore`].
//! - [`Settings`]: host settings (registry endpoints, data directory, isolation
//!   mode) read from an optional `flick.toml`, overridable from the environment.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FlickError, FlickResult};
use crate::extensions::Isolation;
use crate::shortcut::keys;

/// Default registry catalog.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.flick.dev/catalog.json";

/// Default release descriptor for the host application.
pub const DEFAULT_APP_UPDATE_URL: &str = "https://registry.flick.dev/app/latest.json";

pub const DEFAULT_SHORTCUT: &str = "CommandOrControl+Shift+Space";

/// User configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Start with the operating system.
    pub autolaunch: bool,
    /// Global shortcut in registration form (`Control+Shift+Space`); empty = unset.
    pub shortcut: String,
    /// Enabled extension ids. Always a subset of `ordered`.
    pub enabled: Vec<String>,
    /// Every installed extension id, in the user's order.
    pub ordered: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autolaunch: false,
            shortcut: DEFAULT_SHORTCUT.to_string(),
            enabled: Vec::new(),
            ordered: Vec::new(),
        }
    }
}

impl Config {
    /// Reject references to unknown extensions and malformed shortcuts.
    pub fn validate(&self, installed: &[String]) -> FlickResult<()> {
        let known: HashSet<&str> = installed.iter().map(String::as_str).collect();

        if let Some(id) = self
            .ordered
            .iter()
            .chain(self.enabled.iter())
            .find(|id| !known.contains(id.as_str()))
        {
            return Err(FlickError::Conversion(format!(
                "unknown extension id '{}'",
                id
            )));
        }

        if !keys::is_valid_binding(&self.shortcut) {
            return Err(FlickError::Conversion(format!(
                "'{}' is not a valid shortcut (needs a modifier and a non-modifier key)",
                self.shortcut
            )));
        }

        Ok(())
    }

    /// Repair id references against the installed set.
    ///
    /// Stale ids are pruned, duplicates dropped, installed ids missing from
    /// `ordered` appended, and `enabled` restricted to `ordered`.
    pub fn reconciled(mut self, installed: &[String]) -> Self {
        let known: HashSet<&str> = installed.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        self.ordered
            .retain(|id| known.contains(id.as_str()) && seen.insert(id.clone()));
        for id in installed {
            if !seen.contains(id) {
                seen.insert(id.clone());
                self.ordered.push(id.clone());
            }
        }

        let mut enabled_seen = HashSet::new();
        self.enabled
            .retain(|id| seen.contains(id) && enabled_seen.insert(id.clone()));

        self
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.iter().any(|e| e == id)
    }
}

/// Owner of the persisted [`Config`].
///
/// Not synchronized by itself; the extension manager keeps it behind the
/// same lock as extension store writes.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    current: Config,
}

impl ConfigStore {
    /// Load the config at `path`, writing defaults if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> FlickResult<Self> {
        let path = path.into();

        let current = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            let config = Config::default();
            write_atomic(&path, &serde_json::to_vec_pretty(&config)?)?;
            info!(path = %path.display(), "wrote default config");
            config
        };

        Ok(Self { path, current })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &Config {
        &self.current
    }

    /// Validate and reconcile a candidate without storing it.
    pub fn prepare(&self, candidate: Config, installed: &[String]) -> FlickResult<Config> {
        candidate.validate(installed)?;
        Ok(candidate.reconciled(installed))
    }

    /// Persist `config` and make it current.
    pub fn commit(&mut self, config: Config) -> FlickResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(&config)?)?;
        self.current = config;
        Ok(())
    }

    /// Re-apply the id invariants after the installed set changed.
    ///
    /// Returns whether anything had to be repaired.
    pub fn reconcile(&mut self, installed: &[String]) -> FlickResult<bool> {
        let repaired = self.current.clone().reconciled(installed);
        if repaired == self.current {
            return Ok(false);
        }

        info!(
            before = ?self.current.ordered,
            after = ?repaired.ordered,
            "reconciled config against installed extensions"
        );
        self.commit(repaired)?;
        Ok(true)
    }
}

/// Write `data` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> FlickResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| FlickError::FileSystem(e.error.to_string()))?;
    Ok(())
}

/// Host settings (`flick.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Registry catalog endpoint.
    pub registry_url: String,
    /// Release descriptor endpoint for the host itself.
    pub app_update_url: String,
    /// Override for the data directory (config, extensions, updates).
    pub data_dir: Option<PathBuf>,
    /// How extension modules are executed.
    pub isolation: Isolation,
    /// Timeout for registry requests and extension invocations.
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            app_update_url: DEFAULT_APP_UPDATE_URL.to_string(),
            data_dir: None,
            isolation: Isolation::default(),
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn settings_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("flick")
            .join("flick.toml")
    }

    /// Load settings from file (defaults if absent), then apply environment overrides.
    pub fn load() -> FlickResult<Self> {
        let path = Self::settings_path();
        let mut settings = if path.exists() {
            Self::from_toml_str(&fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };

        settings.apply_env();
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> FlickResult<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("FLICK_REGISTRY_URL") {
            self.registry_url = url;
        }
        if let Ok(dir) = std::env::var("FLICK_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if self.request_timeout_secs == 0 {
            warn!("request_timeout_secs must be positive, using 30");
            self.request_timeout_secs = 30;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("flick"))
                .unwrap_or_else(|| PathBuf::from(".flick"))
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir().join("config.json")
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.data_dir().join("extensions")
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.data_dir().join("updates")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate(&[]).is_ok());
    }

    #[test]
    fn test_reconcile_prunes_and_appends() {
        let config = Config {
            ordered: ids(&["gone", "b", "a", "b"]),
            enabled: ids(&["gone", "a", "a"]),
            ..Default::default()
        };

        let repaired = config.reconciled(&ids(&["a", "b", "c"]));
        assert_eq!(repaired.ordered, ids(&["b", "a", "c"]));
        assert_eq!(repaired.enabled, ids(&["a"]));
    }

    #[test]
    fn test_validate_rejects_unknown_ids() {
        let installed = ids(&["a"]);

        let config = Config {
            ordered: ids(&["a", "b"]),
            ..Default::default()
        };
        assert!(config.validate(&installed).is_err());

        let config = Config {
            enabled: ids(&["b"]),
            ..Default::default()
        };
        assert!(config.validate(&installed).is_err());
    }

    #[test]
    fn test_validate_shortcut_rule() {
        let mut config = Config {
            shortcut: "Control+A".to_string(),
            ..Default::default()
        };
        assert!(config.validate(&[]).is_ok());

        config.shortcut = String::new();
        assert!(config.validate(&[]).is_ok());

        config.shortcut = "A+B".to_string();
        assert!(config.validate(&[]).is_err());

        config.shortcut = "Shift".to_string();
        assert!(config.validate(&[]).is_err());
    }

    #[test]
    fn test_store_writes_defaults_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let mut store = ConfigStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.get(), &Config::default());

        let next = store
            .prepare(
                Config {
                    autolaunch: true,
                    ordered: ids(&["a"]),
                    ..Default::default()
                },
                &ids(&["a", "b"]),
            )
            .unwrap();
        assert_eq!(next.ordered, ids(&["a", "b"]));
        store.commit(next.clone()).unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get(), &next);
    }

    #[test]
    fn test_store_rejects_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ConfigStore::open(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Json);
    }

    #[test]
    fn test_store_reconcile_reports_changes() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(temp_dir.path().join("config.json")).unwrap();

        assert!(store.reconcile(&ids(&["a"])).unwrap());
        assert!(!store.reconcile(&ids(&["a"])).unwrap());
        assert!(store.reconcile(&[]).unwrap());
        assert!(store.get().ordered.is_empty());
    }

    #[test]
    fn test_settings_from_toml() {
        let settings = Settings::from_toml_str(
            r#"
registry_url = "http://localhost:8080/catalog.json"
isolation = "in-process"
"#,
        )
        .unwrap();

        assert_eq!(settings.registry_url, "http://localhost:8080/catalog.json");
        assert_eq!(settings.isolation, Isolation::InProcess);
        assert_eq!(settings.app_update_url, DEFAULT_APP_UPDATE_URL);
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    fn test_settings_paths_follow_data_dir() {
        let settings = Settings {
            data_dir: Some(PathBuf::from("/srv/flick")),
            ..Default::default()
        };
        assert_eq!(settings.config_path(), PathBuf::from("/srv/flick/config.json"));
        assert_eq!(settings.extensions_dir(), PathBuf::from("/srv/flick/extensions"));
    }
}
