//! Extraction of downloaded tar archives.
//!
//! An archive `dir/out.tgz` is replaced by the directory `dir/out` holding its
//! content. Only the archive's own extension is stripped, so `out.tar.gz`
//! becomes `out.tar`.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
}

fn has_tar_header(block: &[u8]) -> bool {
    block.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &block[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
}

/// Detects a tar archive from the file content, whatever its name.
pub fn archive_kind(path: &Path) -> Result<Option<ArchiveKind>> {
    let mut head = Vec::with_capacity(512);
    File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?
        .take(512)
        .read_to_end(&mut head)?;

    if head.starts_with(&GZIP_MAGIC) {
        let mut inner = Vec::with_capacity(512);
        let decoder = GzDecoder::new(BufReader::new(File::open(path)?));
        // A gzip stream that is not a tar archive stays as is.
        if decoder.take(512).read_to_end(&mut inner).is_err() {
            return Ok(None);
        }
        return Ok(has_tar_header(&inner).then_some(ArchiveKind::TarGz));
    }
    Ok(has_tar_header(&head).then_some(ArchiveKind::Tar))
}

/// The directory an archive is extracted into.
pub fn extraction_target(archive: &Path) -> PathBuf {
    archive.with_extension("")
}

/// Replaces `archive` by a directory holding its content.
///
/// Returns `Ok(None)` when the file is not a tar archive. Fails without
/// touching anything when the target path is already taken, for instance by
/// a sibling archive differing only in its extension.
pub fn extract_in_place(archive: &Path) -> Result<Option<PathBuf>> {
    let Some(kind) = archive_kind(archive)? else {
        return Ok(None);
    };

    let target = extraction_target(archive);
    if target.exists() {
        bail!(
            "cannot extract {}: {} already exists",
            archive.display(),
            target.display()
        );
    }
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("archive path has no file name")?;
    let staging = archive.with_file_name(format!(".{}.extracting", file_name));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let reader = BufReader::new(File::open(archive)?);
    let unpacked = match kind {
        ArchiveKind::Tar => tar::Archive::new(reader).unpack(&staging),
        ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(reader)).unpack(&staging),
    };
    if let Err(e) = unpacked {
        let _ = fs::remove_dir_all(&staging);
        return Err(e).with_context(|| format!("cannot extract {}", archive.display()));
    }

    fs::rename(&staging, &target)?;
    fs::remove_file(archive)?;

    tracing::debug!("Extracted {} into {}", archive.display(), target.display());
    Ok(Some(target))
}
