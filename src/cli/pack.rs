//! Pack command for `flick pack`.
//!
//! Produces the release artifact a registry serves for one platform and
//! prints the asset entry to paste into the release descriptor.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use crate::extensions::installer::{build_archive, sha256_hex};
use crate::extensions::{platform_key, Asset};

/// Pack `module` (and `icon`) into `output`.
pub fn run_pack(module: &Path, icon: Option<&Path>, output: &Path) -> Result<()> {
    let module_bytes =
        fs::read(module).with_context(|| format!("Failed to read {}", module.display()))?;
    let icon_bytes = icon
        .map(|path| fs::read(path).with_context(|| format!("Failed to read {}", path.display())))
        .transpose()?;

    let archive = build_archive(&module_bytes, icon_bytes.as_deref())?;
    fs::write(output, &archive)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let asset = Asset {
        url: format!("https://<your-host>/{}", file_name),
        checksum: sha256_hex(&archive),
    };

    println!(
        "{} Packed {} ({} bytes)",
        style("✓").green().bold(),
        style(output.display()).bold(),
        archive.len()
    );
    println!();
    println!("{}", style("Release descriptor asset:").cyan());
    println!(
        "\"{}\": {}",
        platform_key(),
        serde_json::to_string_pretty(&asset)?
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::installer::unpack_archive;
    use tempfile::TempDir;

    #[test]
    fn test_pack_produces_installable_archive() {
        let temp_dir = TempDir::new().unwrap();
        let module = temp_dir.path().join("lib.so");
        let icon = temp_dir.path().join("icon.svg");
        let output = temp_dir.path().join("out.tar.gz");
        fs::write(&module, b"\x7fELF").unwrap();
        fs::write(&icon, b"<svg/>").unwrap();

        run_pack(&module, Some(&icon), &output).unwrap();

        let payload = unpack_archive(&fs::read(&output).unwrap()).unwrap();
        assert_eq!(payload.module, b"\x7fELF");
        assert_eq!(payload.icon.unwrap(), b"<svg/>");
    }

    #[test]
    fn test_pack_missing_module() {
        let temp_dir = TempDir::new().unwrap();
        let result = run_pack(
            &temp_dir.path().join("missing.so"),
            None,
            &temp_dir.path().join("out.tar.gz"),
        );
        assert!(result.is_err());
    }
}
