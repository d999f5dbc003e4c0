//! Reading of package archives.
//!
//! A package archive is a gzipped tar with one directory per payload entry.
//! Each entry directory holds a `pathname` file with the payload's internal
//! path, the payload itself as `data`, a `data.meta` sidecar carrying the
//! reference identifier, and optionally a bundled `preview.png`. The archive
//! root may carry an `.icon.png` with an archive-level preview.

use crate::config::ArchiveConfig;
use crate::error::{PackratError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::warn;

/// One payload entry as laid out in an extracted archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Entry directory under the extraction root.
    pub dir: PathBuf,
    /// Internal path recorded by the packer.
    pub internal_path: String,
    /// Reference identifier from the sidecar, if present.
    pub ref_id: Option<String>,
    /// Payload file; `None` for directory placeholders.
    pub data: Option<PathBuf>,
    pub data_size: i64,
    /// Bundled preview image, if present.
    pub preview: Option<PathBuf>,
}

/// Unpack a `.pkg` archive into `target`, blocking the current thread.
pub fn extract_archive_sync(archive_path: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|e| PackratError::io_with_path(e, archive_path))?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);
    archive
        .unpack(target)
        .map_err(|e| PackratError::ExtractionFailed {
            archive: archive_path.to_path_buf(),
            message: e.to_string(),
        })?;
    Ok(())
}

/// Unpack a `.pkg` archive into `target` on the blocking pool.
pub async fn extract_archive(archive_path: &Path, target: &Path) -> Result<()> {
    let archive_path = archive_path.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archive_sync(&archive_path, &target))
        .await
        .map_err(|e| PackratError::Other(format!("Extraction task failed: {e}")))?
}

/// Enumerate the payload entries of an extracted archive.
///
/// Entry directories without a readable `pathname` are skipped with a
/// warning; a malformed entry never fails the whole archive.
pub fn enumerate_entries(extraction_root: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();

    let read_dir = std::fs::read_dir(extraction_root)
        .map_err(|e| PackratError::io_with_path(e, extraction_root))?;
    for dir_entry in read_dir {
        let dir_entry = dir_entry.map_err(|e| PackratError::io_with_path(e, extraction_root))?;
        let dir = dir_entry.path();
        if !dir.is_dir() {
            continue;
        }

        let pathname_file = dir.join(ArchiveConfig::PATHNAME_FILE);
        let internal_path = match std::fs::read_to_string(&pathname_file) {
            Ok(content) => match content.lines().next() {
                Some(line) if !line.trim().is_empty() => line.trim().to_string(),
                _ => {
                    warn!("Entry {} has an empty pathname, skipping", dir.display());
                    continue;
                }
            },
            Err(_) => {
                warn!("Entry {} has no pathname file, skipping", dir.display());
                continue;
            }
        };

        let data_path = dir.join(ArchiveConfig::DATA_FILE);
        let (data, data_size) = match std::fs::metadata(&data_path) {
            Ok(meta) if meta.is_file() => (Some(data_path), meta.len() as i64),
            _ => (None, 0),
        };

        let preview_path = dir.join(ArchiveConfig::PREVIEW_FILE);
        let preview = preview_path.is_file().then_some(preview_path);

        let ref_id = ref_from_sidecar(&dir.join(ArchiveConfig::META_FILE));

        entries.push(ArchiveEntry {
            dir,
            internal_path,
            ref_id,
            data,
            data_size,
            preview,
        });
    }

    entries.sort_by(|a, b| a.internal_path.cmp(&b.internal_path));
    Ok(entries)
}

/// The archive-level preview image at the extraction root, if bundled.
pub fn icon_path(extraction_root: &Path) -> Option<PathBuf> {
    let icon = extraction_root.join(ArchiveConfig::ICON_FILE);
    icon.is_file().then_some(icon)
}

/// Pull the reference identifier out of an entry sidecar.
fn ref_from_sidecar(meta_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(meta_path).ok()?;
    for line in content.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(ArchiveConfig::REF_LINE_PREFIX) {
            let id = rest.trim();
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

/// Whether a directory entry looks like a package archive.
pub fn is_package_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ArchiveConfig::PACKAGE_EXT))
}
