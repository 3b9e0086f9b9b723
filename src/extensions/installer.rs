//! Downloader/installer: resolve, download, verify and unpack artifacts.
//!
//! Nothing in this module touches the extension store. It produces verified
//! payloads; the manager decides when to commit them.

use std::io::{Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::{Archive, Builder, Header};
use tracing::{debug, warn};

use super::manifest::{ExtensionManifest, LatestRelease};
use super::registry::Registry;
use super::store::{ICON_FILE, MODULE_FILE};
use crate::error::{FlickError, FlickResult};

/// Platform key used in release descriptors, e.g. `linux-x86_64`.
pub fn platform_key() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{}-{}", os, std::env::consts::ARCH)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compare the digest of `bytes` against `expected` (hex, any case).
pub fn verify_checksum(bytes: &[u8], expected: &str) -> FlickResult<()> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(FlickError::Checksum {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

/// Contents of a verified artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPayload {
    pub module: Vec<u8>,
    pub icon: Option<Vec<u8>>,
}

/// Extract the module and optional icon from a `.tar.gz` artifact.
///
/// Entries are matched by file name; directories inside the archive are
/// ignored. Nothing is written to disk.
pub fn unpack_archive(bytes: &[u8]) -> FlickResult<ArtifactPayload> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));

    let mut module = None;
    let mut icon = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        if name == MODULE_FILE {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            module = Some(data);
        } else if name == ICON_FILE {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            icon = Some(data);
        } else {
            debug!(entry = %path.display(), "ignoring archive entry");
        }
    }

    let module = module.ok_or_else(|| {
        FlickError::FileSystem(format!("artifact does not contain {}", MODULE_FILE))
    })?;

    Ok(ArtifactPayload { module, icon })
}

/// Pack a module and optional icon into a `.tar.gz` artifact.
pub fn build_archive(module: &[u8], icon: Option<&[u8]>) -> FlickResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

    {
        let mut builder = Builder::new(&mut encoder);
        append_file(&mut builder, MODULE_FILE, module)?;
        if let Some(icon) = icon {
            append_file(&mut builder, ICON_FILE, icon)?;
        }
        builder.finish()?;
    }

    Ok(encoder.finish()?)
}

fn append_file<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    data: &[u8],
) -> FlickResult<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, Path::new(name), data)?;
    Ok(())
}

/// Resolve, download and verify the platform artifact for `manifest`.
///
/// Returns the manifest as it should be installed (carrying the descriptor's
/// version) together with the unpacked payload.
pub async fn fetch_verified(
    registry: &dyn Registry,
    manifest: &ExtensionManifest,
    platform: &str,
) -> FlickResult<(ExtensionManifest, ArtifactPayload)> {
    manifest.validate()?;

    let release: LatestRelease = registry.fetch_latest(&manifest.latest_url).await?;
    fetch_release(registry, manifest, release, platform).await
}

/// Download and verify the platform artifact of an already resolved `release`.
pub async fn fetch_release(
    registry: &dyn Registry,
    manifest: &ExtensionManifest,
    release: LatestRelease,
    platform: &str,
) -> FlickResult<(ExtensionManifest, ArtifactPayload)> {
    let asset = release
        .asset_for(platform)
        .ok_or_else(|| FlickError::NoAssets(platform.to_string()))?;

    debug!(id = %manifest.id, version = %release.version, url = %asset.url, "downloading artifact");
    let bytes = registry.download(&asset.url).await?;

    if let Err(e) = verify_checksum(&bytes, &asset.checksum) {
        warn!(id = %manifest.id, %e, "discarding download");
        return Err(e);
    }

    let payload = unpack_archive(&bytes)?;

    let mut installed = manifest.clone();
    installed.version = release.version;
    Ok((installed, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::extensions::registry::fake::FakeRegistry;

    #[test]
    fn test_platform_key_shape() {
        let key = platform_key();
        let (os, arch) = key.split_once('-').unwrap();
        assert!(!os.is_empty());
        assert!(!arch.is_empty());
        assert_ne!(os, "macos");
    }

    #[test]
    fn test_checksum_is_case_insensitive() {
        let digest = sha256_hex(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(verify_checksum(b"abc", &digest.to_uppercase()).is_ok());

        let err = verify_checksum(b"abd", &digest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Checksum);
    }

    #[test]
    fn test_archive_contents() {
        let archive = build_archive(b"\x7fELF", Some(b"<svg/>")).unwrap();
        let payload = unpack_archive(&archive).unwrap();
        assert_eq!(payload.module, b"\x7fELF");
        assert_eq!(payload.icon.as_deref(), Some(&b"<svg/>"[..]));

        let no_icon = unpack_archive(&build_archive(b"m", None).unwrap()).unwrap();
        assert!(no_icon.icon.is_none());
    }

    #[test]
    fn test_archive_without_module() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        {
            let mut builder = Builder::new(&mut encoder);
            append_file(&mut builder, "README.md", b"hello").unwrap();
            builder.finish().unwrap();
        }
        let bytes = encoder.finish().unwrap();

        let err = unpack_archive(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileSystem);
    }

    #[tokio::test]
    async fn test_fetch_verified_uses_descriptor_version() {
        let registry = FakeRegistry::new();
        registry.publish("qr", "0.3.0", b"module");
        let stale = FakeRegistry::manifest("qr", "0.1.0");

        let (manifest, payload) = fetch_verified(&registry, &stale, &platform_key())
            .await
            .unwrap();
        assert_eq!(manifest.version, semver::Version::new(0, 3, 0));
        assert_eq!(payload.module, b"module");
    }

    #[tokio::test]
    async fn test_fetch_verified_errors() {
        let registry = FakeRegistry::new();
        let manifest = registry.publish("qr", "0.1.0", b"module");

        let err = fetch_verified(&registry, &manifest, "plan9-mips")
            .await
            .unwrap_err();
        assert_eq!(err, FlickError::NoAssets("plan9-mips".to_string()));

        registry.corrupt("qr");
        let err = fetch_verified(&registry, &manifest, &platform_key())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Checksum);
    }
}
