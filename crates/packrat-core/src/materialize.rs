//! Materialization: making indexed payloads available as plain files.
//!
//! Archive-backed packages are unpacked into a per-package directory under
//! `Extracted/` and reused from there until the cache is cleared. Packages
//! backed by a source directory are already plain files on disk, so
//! materialization is a passthrough that touches nothing.

use crate::archive;
use crate::config::{ArchiveConfig, BatchConfig, StorageConfig};
use crate::error::{PackratError, Result};
use crate::store::{Package, PackageFile, PackageOrigin};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Marker written into a cache directory once extraction completed. A cache
/// directory without it is a leftover from an interrupted run.
const COMPLETE_MARKER: &str = ".complete";

/// Manages the extraction cache under the storage root.
pub struct Materializer {
    storage_root: PathBuf,
}

impl Materializer {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn extract_root(&self) -> PathBuf {
        self.storage_root.join(StorageConfig::EXTRACT_DIR_NAME)
    }

    pub fn preview_root(&self) -> PathBuf {
        self.storage_root.join(StorageConfig::PREVIEW_DIR_NAME)
    }

    /// Cache directory of one package, keyed by its primary key so renames
    /// never orphan a cache.
    pub fn cache_dir(&self, package: &Package) -> PathBuf {
        self.extract_root().join(package.id.to_string())
    }

    /// Whether the package's payloads are currently available as plain files
    /// without further work.
    pub fn is_materialized(&self, package: &Package) -> bool {
        match package.origin {
            PackageOrigin::DirectorySource => true,
            _ => self.cache_dir(package).join(COMPLETE_MARKER).is_file(),
        }
    }

    /// Make the package's payloads available and return the directory that
    /// holds them.
    ///
    /// Source-directory packages pass through to their location without any
    /// filesystem work. Archive packages whose archive has gone missing
    /// return `Ok(None)`; that is a degradation, not an error.
    pub async fn ensure_materialized(&self, package: &Package) -> Result<Option<PathBuf>> {
        if package.origin == PackageOrigin::DirectorySource {
            return Ok(package.location.as_ref().map(PathBuf::from));
        }

        let archive_path = match package.location.as_deref() {
            Some(location) => PathBuf::from(location),
            None => return Ok(None),
        };
        if !archive_path.is_file() {
            debug!(
                "Archive for package {} is not available: {}",
                package.safe_name,
                archive_path.display()
            );
            return Ok(None);
        }

        let cache = self.cache_dir(package);
        if cache.join(COMPLETE_MARKER).is_file() {
            return Ok(Some(cache));
        }

        // leftover from an interrupted extraction
        if cache.exists() {
            self.remove_dir_with_retries(&cache).await;
        }

        tokio::fs::create_dir_all(&cache)
            .await
            .map_err(|e| PackratError::io_with_path(e, &cache))?;
        archive::extract_archive(&archive_path, &cache).await?;
        tokio::fs::write(cache.join(COMPLETE_MARKER), b"")
            .await
            .map_err(|e| PackratError::io_with_path(e, &cache))?;

        debug!("Extracted {} to {}", archive_path.display(), cache.display());
        Ok(Some(cache))
    }

    /// Make a single file available under its real name and return that
    /// path, or `Ok(None)` when the backing archive is unavailable.
    ///
    /// Archive payloads sit in the cache under opaque entry names; the first
    /// materialization copies them (sidecar included) into the cache's
    /// `Content/` tree under their internal path. The copy is idempotent.
    pub async fn ensure_file_materialized(
        &self,
        package: &Package,
        file: &PackageFile,
    ) -> Result<Option<PathBuf>> {
        if package.origin == PackageOrigin::DirectorySource {
            let path = PathBuf::from(&file.path);
            return Ok(path.is_file().then_some(path));
        }

        let Some(cache) = self.ensure_materialized(package).await? else {
            return Ok(None);
        };
        let payload = cache.join(&file.source_path);
        if !payload.is_file() {
            return Ok(None);
        }

        let dest = cache
            .join(StorageConfig::CONTENT_DIR_NAME)
            .join(&file.path);
        self.copy_payload(&payload, &dest, file).await?;
        Ok(Some(dest))
    }

    /// Copy a file's payload (and its sidecar, when present) into
    /// `target_root/Content/` under the file's internal path.
    pub async fn copy_to(
        &self,
        package: &Package,
        file: &PackageFile,
        target_root: &Path,
    ) -> Result<Option<PathBuf>> {
        let Some(payload) = self.ensure_file_materialized(package, file).await? else {
            return Ok(None);
        };

        let dest = target_root
            .join(StorageConfig::CONTENT_DIR_NAME)
            .join(&file.path);
        self.copy_payload(&payload, &dest, file).await?;
        Ok(Some(dest))
    }

    /// Idempotent payload copy: an existing target of the expected size is
    /// left alone. The sidecar travels along as `<name>.meta`.
    async fn copy_payload(&self, payload: &Path, dest: &Path, file: &PackageFile) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PackratError::io_with_path(e, parent))?;
        }

        let already_there = match tokio::fs::metadata(dest).await {
            Ok(meta) => meta.len() as i64 == file.size_bytes,
            Err(_) => false,
        };
        if already_there {
            return Ok(());
        }

        tokio::fs::copy(payload, dest)
            .await
            .map_err(|e| PackratError::io_with_path(e, dest))?;

        if let Some(sidecar) = sidecar_of(payload, file).filter(|p| p.is_file()) {
            let meta_dest = dest.with_file_name(format!("{}.meta", file.file_name));
            tokio::fs::copy(&sidecar, &meta_dest)
                .await
                .map_err(|e| PackratError::io_with_path(e, &meta_dest))?;
        }
        Ok(())
    }

    /// Total on-disk size of the extraction cache.
    pub fn cache_size(&self) -> u64 {
        WalkDir::new(self.extract_root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }

    /// Drop the whole extraction cache. Directories that cannot be removed
    /// are left behind after retries; the next extraction rebuilds them.
    pub async fn clear_cache(&self) {
        let root = self.extract_root();
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            self.remove_dir_with_retries(&entry.path()).await;
        }
    }

    /// Drop one package's cache directory.
    pub async fn remove_cache_for(&self, package: &Package) {
        let cache = self.cache_dir(package);
        if cache.exists() {
            self.remove_dir_with_retries(&cache).await;
        }
    }

    /// Best-effort recursive delete with retries; virus scanners and preview
    /// readers briefly hold files open.
    async fn remove_dir_with_retries(&self, dir: &Path) {
        for attempt in 1..=BatchConfig::CACHE_DELETE_RETRIES {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) => {
                    if attempt == BatchConfig::CACHE_DELETE_RETRIES {
                        warn!(
                            "Could not remove cache directory {} after {} attempts: {}",
                            dir.display(),
                            attempt,
                            e
                        );
                        return;
                    }
                    tokio::time::sleep(BatchConfig::CACHE_DELETE_BACKOFF).await;
                }
            }
        }
    }
}

/// Locate the sidecar next to a payload, whichever layout the payload is
/// in: raw entry form (`data` + `data.meta`) or already under `Content/`
/// with its real name.
fn sidecar_of(payload: &Path, file: &PackageFile) -> Option<PathBuf> {
    let name = payload.file_name()?.to_str()?;
    if name == ArchiveConfig::DATA_FILE {
        Some(payload.with_file_name(ArchiveConfig::META_FILE))
    } else {
        Some(payload.with_file_name(format!("{}.meta", file.file_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PackageState;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use tempfile::TempDir;

    fn build_archive(temp: &TempDir, name: &str, entries: &[(&str, &str, &[u8])]) -> PathBuf {
        let staging = temp.path().join(format!("{name}-staging"));
        for (dir, internal_path, data) in entries {
            crate::archive::tests::write_entry(
                &staging,
                dir,
                internal_path,
                None,
                Some(data),
                false,
            );
        }
        let archive_path = temp.path().join(format!("{name}.pkg"));
        let file = File::create(&archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", &staging).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
        archive_path
    }

    fn archive_package(id: i64, location: &Path) -> Package {
        Package {
            id,
            safe_name: format!("pkg{id}"),
            origin: PackageOrigin::CustomArchive,
            location: Some(location.to_string_lossy().to_string()),
            state: PackageState::Done,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_directory_source_passthrough() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path().join("storage"));

        let package = Package {
            id: 1,
            safe_name: "loose".to_string(),
            origin: PackageOrigin::DirectorySource,
            location: Some("/media/library".to_string()),
            ..Default::default()
        };

        let result = materializer.ensure_materialized(&package).await.unwrap();
        assert_eq!(result, Some(PathBuf::from("/media/library")));
        // passthrough must not create the cache tree
        assert!(!materializer.extract_root().exists());
    }

    #[tokio::test]
    async fn test_extract_and_reuse() {
        let temp = TempDir::new().unwrap();
        let archive = build_archive(&temp, "Demo", &[("e1", "Assets/a.txt", b"hello")]);
        let materializer = Materializer::new(temp.path().join("storage"));
        let package = archive_package(7, &archive);

        let cache = materializer
            .ensure_materialized(&package)
            .await
            .unwrap()
            .unwrap();
        assert!(materializer.is_materialized(&package));

        // a second call reuses the cache instead of re-extracting
        let sentinel = cache.join("sentinel");
        std::fs::write(&sentinel, b"x").unwrap();
        let again = materializer
            .ensure_materialized(&package)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cache, again);
        assert!(sentinel.is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extraction_proceeds_over_undeletable_cache() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let archive = build_archive(&temp, "Demo", &[("e1", "Assets/a.txt", b"hello")]);
        let materializer = Materializer::new(temp.path().join("storage"));
        let package = archive_package(11, &archive);

        // leftover cache without a completion marker, holding a subdirectory
        // the delete retries cannot get rid of
        let cache = materializer.cache_dir(&package);
        let locked = cache.join("locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join("held"), b"x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // permission bits do not bind the superuser; nothing to exercise then
        if std::fs::remove_file(locked.join("held")).is_ok() {
            return;
        }

        let result = materializer.ensure_materialized(&package).await.unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        // the delete gave up, extraction went ahead over the directory
        assert_eq!(result.unwrap(), cache);
        assert!(materializer.is_materialized(&package));
        assert_eq!(std::fs::read(cache.join("e1/data")).unwrap(), b"hello");
        assert!(locked.join("held").is_file());
    }

    #[tokio::test]
    async fn test_missing_archive_degrades_to_none() {
        let temp = TempDir::new().unwrap();
        let materializer = Materializer::new(temp.path().join("storage"));
        let package = archive_package(3, &temp.path().join("gone.pkg"));

        assert!(materializer
            .ensure_materialized(&package)
            .await
            .unwrap()
            .is_none());
        assert!(!materializer.is_materialized(&package));
    }

    #[tokio::test]
    async fn test_file_materialization_and_copy() {
        let temp = TempDir::new().unwrap();
        let archive = build_archive(&temp, "Demo", &[("e1", "Assets/a.txt", b"hello")]);
        let materializer = Materializer::new(temp.path().join("storage"));
        let package = archive_package(9, &archive);

        let file = PackageFile {
            id: 1,
            package_id: 9,
            path: "Assets/a.txt".to_string(),
            source_path: "e1/data".to_string(),
            file_name: "a.txt".to_string(),
            size_bytes: 5,
            file_type: "txt".to_string(),
            ..Default::default()
        };

        let payload = materializer
            .ensure_file_materialized(&package, &file)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read(&payload).unwrap(), b"hello");

        let target = temp.path().join("project");
        let dest = materializer
            .copy_to(&package, &file, &target)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dest, target.join("Content").join("Assets/a.txt"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        // idempotent: the second copy leaves the existing file alone
        let before = std::fs::metadata(&dest).unwrap().modified().unwrap();
        materializer.copy_to(&package, &file, &target).await.unwrap();
        let after = std::fs::metadata(&dest).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_clear_cache_and_size() {
        let temp = TempDir::new().unwrap();
        let archive = build_archive(&temp, "Demo", &[("e1", "Assets/a.txt", b"hello")]);
        let materializer = Materializer::new(temp.path().join("storage"));
        let package = archive_package(5, &archive);

        materializer.ensure_materialized(&package).await.unwrap();
        assert!(materializer.cache_size() > 0);

        materializer.clear_cache().await;
        assert!(!materializer.is_materialized(&package));
        assert_eq!(materializer.cache_size(), 0);
    }
}
