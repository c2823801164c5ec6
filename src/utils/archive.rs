//! Archive creation and GPG encryption

use super::executor::CommandExecutor;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info};

/// Produces the archive file for a run
pub trait Archiver: Send + Sync {
    /// Write an archive of `sources` to `target`
    fn create(&self, sources: &[PathBuf], target: &Path) -> Result<()>;
}

/// Writes a gzip compressed tarball
///
/// Every source directory is stored under its own base name, so
/// `/backup/data/file` ends up as `backup/data/file` in the archive.
#[derive(Debug, Clone, Copy)]
pub struct TarArchiver {
    level: Compression,
}

impl TarArchiver {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for TarArchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Archiver for TarArchiver {
    fn create(&self, sources: &[PathBuf], target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let file = File::create(target)
            .with_context(|| format!("Failed to create archive {:?}", target))?;
        let encoder = GzEncoder::new(BufWriter::new(file), self.level);
        let mut tar = Builder::new(encoder);
        tar.follow_symlinks(false);

        for source in sources {
            let name = archive_name(source);
            debug!("Adding {:?} to archive as {:?}", source, name);

            if source.is_dir() {
                tar.append_dir_all(&name, source)
                    .with_context(|| format!("Failed to add directory {:?} to archive", source))?;
            } else {
                tar.append_path_with_name(source, &name)
                    .with_context(|| format!("Failed to add file {:?} to archive", source))?;
            }
        }

        let mut writer = tar
            .into_inner()
            .context("Failed to finish tar stream")?
            .finish()
            .context("Failed to finish gzip stream")?;
        writer.flush().context("Failed to flush archive")?;

        info!("Created backup archive {:?}", target);
        Ok(())
    }
}

fn archive_name(source: &Path) -> PathBuf {
    source
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("backup"))
}

/// Encrypt `file` symmetrically with gpg
///
/// Returns the path of the `.gpg` file. The unencrypted input is removed.
pub fn encrypt_with_gpg(
    executor: &dyn CommandExecutor,
    file: &Path,
    passphrase_file: &Path,
) -> Result<PathBuf> {
    let mut encrypted = file.as_os_str().to_owned();
    encrypted.push(".gpg");
    let encrypted = PathBuf::from(encrypted);

    let passphrase = passphrase_file.to_string_lossy();
    let output = encrypted.to_string_lossy();
    let input = file.to_string_lossy();

    executor
        .run_command(
            "gpg",
            &[
                "--batch",
                "--yes",
                "--pinentry-mode",
                "loopback",
                "--symmetric",
                "--cipher-algo",
                "AES256",
                "--passphrase-file",
                &passphrase,
                "--output",
                &output,
                &input,
            ],
            None,
        )
        .with_context(|| format!("Failed to encrypt {:?}", file))?;

    fs::remove_file(file)
        .with_context(|| format!("Failed to remove unencrypted archive {:?}", file))?;

    info!("Encrypted backup archive to {:?}", encrypted);
    Ok(encrypted)
}
