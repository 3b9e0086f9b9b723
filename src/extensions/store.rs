//! On-disk registry of installed extensions.
//!
//! One directory per extension id under the store root:
//!
//! ```text
//! extensions/
//! ├── create_secure_password/
//! │   ├── manifest.json
//! │   ├── icon.svg
//! │   └── lib.so            (lib.dylib / lib.dll)
//! └── .staging-XXXX/        (in-progress writes, never listed)
//! ```
//!
//! Writes are staged into a hidden sibling directory and swapped into place
//! with `rename`, so a record is either fully the old one or fully the new one.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::manifest::{is_valid_id, ExtensionManifest};
use crate::error::{FlickError, FlickResult};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ICON_FILE: &str = "icon.svg";

#[cfg(target_os = "windows")]
pub const MODULE_FILE: &str = "lib.dll";
#[cfg(target_os = "macos")]
pub const MODULE_FILE: &str = "lib.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const MODULE_FILE: &str = "lib.so";

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

/// One installed extension as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRecord {
    pub manifest: ExtensionManifest,
    pub dir: PathBuf,
}

impl ExtensionRecord {
    pub fn icon_path(&self) -> PathBuf {
        self.dir.join(ICON_FILE)
    }

    pub fn module_path(&self) -> PathBuf {
        self.dir.join(MODULE_FILE)
    }
}

/// Handle to the extensions directory. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct ExtensionStore {
    root: PathBuf,
}

impl ExtensionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Create the store root if it does not exist yet.
    pub fn ensure_root(&self) -> FlickResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            FlickError::FileSystem(format!(
                "failed to create extensions directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Snapshot of every installed extension, sorted by id.
    pub fn list(&self) -> FlickResult<Vec<ExtensionRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.starts_with('.') || !path.is_dir() {
                continue;
            }

            match Self::read_record(&path) {
                Ok(record) if record.manifest.id == name => records.push(record),
                Ok(record) => warn!(
                    dir = %path.display(),
                    manifest_id = %record.manifest.id,
                    "skipping extension whose manifest id does not match its directory"
                ),
                Err(e) => warn!(dir = %path.display(), %e, "skipping unreadable extension"),
            }
        }

        records.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        Ok(records)
    }

    /// Ids of every installed extension, sorted.
    pub fn ids(&self) -> FlickResult<Vec<String>> {
        Ok(self.list()?.into_iter().map(|r| r.manifest.id).collect())
    }

    /// Look up a single record.
    pub fn get(&self, id: &str) -> FlickResult<Option<ExtensionRecord>> {
        if !is_valid_id(id) {
            return Ok(None);
        }

        let dir = self.dir_for(id);
        if !dir.join(MANIFEST_FILE).exists() {
            return Ok(None);
        }

        Self::read_record(&dir).map(Some)
    }

    fn read_record(dir: &Path) -> FlickResult<ExtensionRecord> {
        let data = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: ExtensionManifest = serde_json::from_str(&data)?;
        Ok(ExtensionRecord {
            manifest,
            dir: dir.to_path_buf(),
        })
    }

    /// Write a new or replacement record for `manifest.id`.
    ///
    /// The module bytes must already be verified by the caller. On any error
    /// the previous record, if any, is left untouched.
    pub fn install_or_replace(
        &self,
        manifest: &ExtensionManifest,
        module: &[u8],
        icon: Option<&[u8]>,
    ) -> FlickResult<ExtensionRecord> {
        manifest.validate()?;
        self.ensure_root()?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)?;

        fs::write(
            staging.path().join(MANIFEST_FILE),
            serde_json::to_vec_pretty(manifest)?,
        )?;
        fs::write(staging.path().join(MODULE_FILE), module)?;
        if let Some(icon) = icon {
            fs::write(staging.path().join(ICON_FILE), icon)?;
        }

        let target = self.dir_for(&manifest.id);
        if target.exists() {
            // Park the old record inside a trash dir; dropping the TempDir
            // removes it once the new record is in place.
            let trash = tempfile::Builder::new()
                .prefix(TRASH_PREFIX)
                .tempdir_in(&self.root)?;
            let parked = trash.path().join(&manifest.id);
            fs::rename(&target, &parked)?;

            if let Err(e) = fs::rename(staging.path(), &target) {
                if let Err(restore) = fs::rename(&parked, &target) {
                    warn!(id = %manifest.id, %restore, "failed to restore previous extension");
                }
                return Err(FlickError::FileSystem(format!(
                    "failed to swap in extension '{}': {}",
                    manifest.id, e
                )));
            }
        } else {
            fs::rename(staging.path(), &target)?;
        }

        debug!(id = %manifest.id, version = %manifest.version, "extension record written");

        Ok(ExtensionRecord {
            manifest: manifest.clone(),
            dir: target,
        })
    }

    /// Remove the record for `id`. Fails with `FileSystem` if it does not exist.
    pub fn delete(&self, id: &str) -> FlickResult<()> {
        let target = self.dir_for(id);
        if !is_valid_id(id) || !target.join(MANIFEST_FILE).exists() {
            return Err(FlickError::FileSystem(format!(
                "extension '{}' is not installed",
                id
            )));
        }

        let trash = tempfile::Builder::new()
            .prefix(TRASH_PREFIX)
            .tempdir_in(&self.root)?;
        fs::rename(&target, trash.path().join(id))?;
        trash.close()?;

        debug!(id = %id, "extension record removed");
        Ok(())
    }

    /// Remove leftovers of interrupted writes.
    pub fn sweep(&self) -> FlickResult<()> {
        if !self.root.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX) {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(dir = %name, %e, "failed to remove stale staging directory");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use tempfile::TempDir;

    fn manifest(id: &str, version: &str) -> ExtensionManifest {
        ExtensionManifest {
            id: id.to_string(),
            name: id.to_uppercase(),
            author: "tests".to_string(),
            version: Version::parse(version).unwrap(),
            description: String::new(),
            latest_url: format!("https://example.com/{}/latest.json", id),
        }
    }

    #[test]
    fn test_install_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExtensionStore::new(temp_dir.path().join("extensions"));

        store
            .install_or_replace(&manifest("qr", "0.1.0"), b"module", Some(b"<svg/>"))
            .unwrap();
        store
            .install_or_replace(&manifest("password", "1.0.0"), b"module", None)
            .unwrap();

        let ids = store.ids().unwrap();
        assert_eq!(ids, vec!["password", "qr"]);

        let qr = store.get("qr").unwrap().unwrap();
        assert_eq!(fs::read(qr.module_path()).unwrap(), b"module");
        assert_eq!(fs::read(qr.icon_path()).unwrap(), b"<svg/>");
    }

    #[test]
    fn test_replace_swaps_whole_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExtensionStore::new(temp_dir.path());

        store
            .install_or_replace(&manifest("qr", "0.1.0"), b"old", Some(b"old-icon"))
            .unwrap();
        store
            .install_or_replace(&manifest("qr", "0.2.0"), b"new", None)
            .unwrap();

        let record = store.get("qr").unwrap().unwrap();
        assert_eq!(record.manifest.version, Version::new(0, 2, 0));
        assert_eq!(fs::read(record.module_path()).unwrap(), b"new");
        // The old icon does not leak into the new record
        assert!(!record.icon_path().exists());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_manifest_leaves_previous_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExtensionStore::new(temp_dir.path());

        store
            .install_or_replace(&manifest("qr", "0.1.0"), b"old", None)
            .unwrap();

        let mut bad = manifest("qr", "0.2.0");
        bad.name = String::new();
        assert!(store.install_or_replace(&bad, b"new", None).is_err());

        let record = store.get("qr").unwrap().unwrap();
        assert_eq!(record.manifest.version, Version::new(0, 1, 0));
        assert_eq!(fs::read(record.module_path()).unwrap(), b"old");
    }

    #[test]
    fn test_delete_twice() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExtensionStore::new(temp_dir.path());

        store
            .install_or_replace(&manifest("qr", "0.1.0"), b"m", None)
            .unwrap();

        assert!(store.delete("qr").is_ok());
        let err = store.delete("qr").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FileSystem);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_skips_hidden_and_foreign_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExtensionStore::new(temp_dir.path());

        store
            .install_or_replace(&manifest("qr", "0.1.0"), b"m", None)
            .unwrap();
        fs::create_dir_all(temp_dir.path().join(".staging-abc")).unwrap();
        fs::create_dir_all(temp_dir.path().join("no-manifest")).unwrap();
        fs::write(temp_dir.path().join("stray.txt"), "x").unwrap();

        assert_eq!(store.ids().unwrap(), vec!["qr"]);

        store.sweep().unwrap();
        assert!(!temp_dir.path().join(".staging-abc").exists());
    }

    #[test]
    fn test_get_rejects_traversal_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = ExtensionStore::new(temp_dir.path().join("extensions"));
        assert!(store.get("../etc").unwrap().is_none());
        assert!(store.delete("../etc").is_err());
    }
}
