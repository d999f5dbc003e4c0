//! Archive-tree indexing.
//!
//! Runs in two passes. Discovery walks the tree, registers every archive and
//! decides per package whether anything changed since the last run. Content
//! indexing then extracts the changed packages and records their payload
//! entries. Both passes yield to the runtime at fixed intervals and check
//! the cancellation token, so a run can be stopped between batches without
//! leaving broken records: everything already persisted stays valid.

use crate::archive;
use crate::cancel::CancellationToken;
use crate::config::{ArchiveConfig, BatchConfig, FolderSpec, IndexOptions};
use crate::error::Result;
use crate::indexer::progress::ProgressHandle;
use crate::materialize::Materializer;
use crate::media;
use crate::store::{
    display_category_from_safe, safe_name, Package, PackageFile, PackageOrigin, PackageState,
    PreviewState, Store,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub struct PackageIndexer {
    store: Arc<Store>,
    materializer: Arc<Materializer>,
    options: IndexOptions,
    progress: ProgressHandle,
    cancel: CancellationToken,
}

impl PackageIndexer {
    pub fn new(
        store: Arc<Store>,
        materializer: Arc<Materializer>,
        options: IndexOptions,
        progress: ProgressHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            materializer,
            options,
            progress,
            cancel,
        }
    }

    /// Index one archive-tree root: discovery, then content extraction for
    /// everything discovery marked as changed.
    pub async fn index_tree(&self, folder: &FolderSpec) -> Result<()> {
        let root = Path::new(&folder.location);
        if !root.is_dir() {
            warn!("Scan root {} does not exist, skipping", folder.location);
            return Ok(());
        }

        self.discover(root, folder.vendor_layout).await?;
        if self.options.index_package_contents {
            self.index_contents().await?;
        }
        Ok(())
    }

    /// Pass 1: register archives and flag new or changed packages.
    async fn discover(&self, root: &Path, vendor_layout: bool) -> Result<()> {
        let archives: Vec<_> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| archive::is_package_archive(p))
            .collect();

        info!("Discovered {} archives under {}", archives.len(), root.display());
        self.progress.start(archives.len());

        for (i, path) in archives.iter().enumerate() {
            self.cancel.check()?;
            self.progress
                .tick_main(path.file_name().and_then(|n| n.to_str()).unwrap_or(""));

            if let Err(e) = self.discover_archive(path, vendor_layout) {
                warn!("Could not register {}: {}", path.display(), e);
            }

            if (i + 1) % BatchConfig::PACKAGE_BREAK_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    fn discover_archive(&self, path: &Path, vendor_layout: bool) -> Result<()> {
        let size = std::fs::metadata(path)
            .map_err(|e| crate::error::PackratError::io_with_path(e, path))?
            .len() as i64;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let safe = safe_name(&stem);
        let location = path.to_string_lossy().to_string();

        let existing = self.store.find_package_by_safe_name(&safe)?;
        if let Some(ref existing) = existing {
            let unchanged = existing.state == PackageState::Done
                && existing.size_bytes == size
                && existing.location.as_deref() == Some(location.as_str());
            if unchanged {
                debug!("Package {} is unchanged, skipping", safe);
                return Ok(());
            }
        }

        let mut package = existing.unwrap_or_default();
        package.safe_name = safe;
        package.display_name = Some(stem);
        package.origin = PackageOrigin::CustomArchive;
        package.location = Some(location);
        package.size_bytes = size;
        package.state = PackageState::InProcess;
        // stale remote details must be re-fetched once content changed
        package.change_token = None;

        if vendor_layout {
            if let Some(category) = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
            {
                package.safe_category = Some(category.to_string());
                package.display_category = Some(display_category_from_safe(category));
            }
            if let Some(publisher) = path
                .parent()
                .and_then(|p| p.parent())
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
            {
                package.safe_publisher = Some(publisher.to_string());
                package.display_publisher = Some(publisher.to_string());
            }
        }

        self.store.upsert_package(&mut package)?;
        Ok(())
    }

    /// Pass 2: extract every in-process package and index its entries.
    pub async fn index_contents(&self) -> Result<()> {
        let pending = self
            .store
            .packages_in_state(PackageState::InProcess, true)?;
        self.progress.start(pending.len());

        for mut package in pending {
            self.cancel.check()?;
            self.progress.tick_main(package.display_name().to_string());
            self.index_package(&mut package).await?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn index_package(&self, package: &mut Package) -> Result<()> {
        let Some(cache) = self.materializer.ensure_materialized(package).await? else {
            // archive currently unavailable; stays in-process for a later run
            warn!("Package {} is not materializable, skipping", package.safe_name);
            return Ok(());
        };

        let entries = archive::enumerate_entries(&cache)?;
        let payloads: Vec<_> = entries.into_iter().filter(|e| e.data.is_some()).collect();
        self.progress.start_sub(payloads.len());

        for (i, entry) in payloads.iter().enumerate() {
            self.cancel.check()?;
            self.progress.tick_sub(entry.internal_path.clone());

            let source_path = entry
                .dir
                .strip_prefix(&cache)
                .unwrap_or(&entry.dir)
                .join(ArchiveConfig::DATA_FILE)
                .to_string_lossy()
                .to_string();

            let mut file = PackageFile {
                package_id: package.id,
                path: entry.internal_path.clone(),
                source_path,
                file_name: PackageFile::name_of(&entry.internal_path),
                ref_id: entry.ref_id.clone(),
                size_bytes: entry.data_size,
                file_type: PackageFile::type_of(&entry.internal_path),
                ..Default::default()
            };
            self.store.upsert_file(&mut file)?;

            if self.options.gather_extended_metadata {
                if let Some(data) = entry.data.as_deref() {
                    let info = media::probe(data, &file.file_type);
                    if info != media::MediaInfo::default() {
                        file.width = info.width;
                        file.height = info.height;
                        file.duration_seconds = info.duration_seconds;
                        self.store.upsert_file(&mut file)?;
                    }
                }
            }

            if self.options.extract_previews {
                if let Some(preview) = entry.preview.as_deref() {
                    if let Err(e) = self.capture_bundled_preview(&mut file, preview).await {
                        debug!("Could not capture preview for {}: {}", file.path, e);
                    }
                }
            }

            if (i + 1) % BatchConfig::FILE_BREAK_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }
        }

        if let Some(icon) = archive::icon_path(&cache) {
            if let Ok(name) = self.capture_package_icon(package.id, &icon).await {
                package.preview_image = Some(name);
            }
        }

        package.state = PackageState::Done;
        self.store.upsert_package(package)?;
        info!(
            "Indexed package {} with {} files",
            package.safe_name,
            payloads.len()
        );

        // release the cache right away; a later materialization re-extracts
        self.materializer.remove_cache_for(package).await;
        Ok(())
    }

    /// Copy a bundled per-entry preview into the preview directory. Custom
    /// previews set by the user are never overwritten.
    async fn capture_bundled_preview(&self, file: &mut PackageFile, preview: &Path) -> Result<()> {
        if file.preview_state == PreviewState::Custom {
            return Ok(());
        }
        let preview_root = self.materializer.preview_root();
        tokio::fs::create_dir_all(&preview_root)
            .await
            .map_err(|e| crate::error::PackratError::io_with_path(e, &preview_root))?;

        let name = format!("{}.png", file.id);
        tokio::fs::copy(preview, preview_root.join(&name))
            .await
            .map_err(|e| crate::error::PackratError::io_with_path(e, preview))?;

        file.preview_file = Some(name);
        file.preview_state = PreviewState::Generated;
        self.store.upsert_file(file)?;
        Ok(())
    }

    async fn capture_package_icon(&self, package_id: i64, icon: &Path) -> Result<String> {
        let preview_root = self.materializer.preview_root();
        tokio::fs::create_dir_all(&preview_root)
            .await
            .map_err(|e| crate::error::PackratError::io_with_path(e, &preview_root))?;

        let name = format!("pkg-{package_id}.png");
        tokio::fs::copy(icon, preview_root.join(&name))
            .await
            .map_err(|e| crate::error::PackratError::io_with_path(e, icon))?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_entry;
    use crate::error::PackratError;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn pack(staging: &Path, archive_path: &Path) {
        let file = File::create(archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", staging).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn build_demo_archive(temp: &TempDir, name: &str) -> PathBuf {
        let staging = temp.path().join(format!("{name}-staging"));
        write_entry(
            &staging,
            "e1",
            "Assets/Mats/wood.mat",
            Some("aa11"),
            Some(b"%PKG v1\n  ref: bb22\n"),
            false,
        );
        write_entry(
            &staging,
            "e2",
            "Assets/Tex/wood.png",
            Some("bb22"),
            Some(b"pixels"),
            true,
        );
        write_entry(&staging, "e3", "Assets/readme.txt", None, Some(b"hi"), false);
        write_entry(&staging, "e4", "Assets/Mats", None, None, false);

        let archives = temp.path().join("archives");
        std::fs::create_dir_all(&archives).unwrap();
        let archive_path = archives.join(format!("{name}.pkg"));
        pack(&staging, &archive_path);
        archive_path
    }

    fn indexer(temp: &TempDir) -> (Arc<Store>, PackageIndexer) {
        let store = Arc::new(Store::open(temp.path().join("index.sqlite")).unwrap());
        let materializer = Arc::new(Materializer::new(temp.path().join("storage")));
        let indexer = PackageIndexer::new(
            store.clone(),
            materializer,
            IndexOptions::default(),
            ProgressHandle::new(),
            CancellationToken::new(),
        );
        (store, indexer)
    }

    #[tokio::test]
    async fn test_full_index_run() {
        let temp = TempDir::new().unwrap();
        let archive = build_demo_archive(&temp, "Demo Pack");
        let (store, indexer) = indexer(&temp);

        let folder = FolderSpec::archives(archive.parent().unwrap().to_string_lossy());
        indexer.index_tree(&folder).await.unwrap();

        let pkg = store.find_package_by_safe_name("Demo Pack").unwrap().unwrap();
        assert_eq!(pkg.state, PackageState::Done);
        assert_eq!(pkg.origin, PackageOrigin::CustomArchive);

        // the directory placeholder entry is not indexed
        let files = store.files_for_package(pkg.id).unwrap();
        assert_eq!(files.len(), 3);

        let mat = files.iter().find(|f| f.file_type == "mat").unwrap();
        assert_eq!(mat.ref_id.as_deref(), Some("aa11"));
        assert_eq!(mat.file_name, "wood.mat");
        assert!(mat.size_bytes > 0);

        // bundled preview captured
        let png = files.iter().find(|f| f.file_type == "png").unwrap();
        assert_eq!(png.preview_state, PreviewState::Generated);
        assert!(png.preview_file.is_some());
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let archive = build_demo_archive(&temp, "Demo");
        let (store, indexer) = indexer(&temp);
        let folder = FolderSpec::archives(archive.parent().unwrap().to_string_lossy());

        indexer.index_tree(&folder).await.unwrap();
        let pkg = store.find_package_by_safe_name("Demo").unwrap().unwrap();
        let ids_before: Vec<i64> = store
            .files_for_package(pkg.id)
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();

        indexer.index_tree(&folder).await.unwrap();
        let pkg_after = store.find_package_by_safe_name("Demo").unwrap().unwrap();
        let ids_after: Vec<i64> = store
            .files_for_package(pkg_after.id)
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();

        assert_eq!(pkg.id, pkg_after.id);
        assert_eq!(ids_before, ids_after);
    }

    #[tokio::test]
    async fn test_changed_archive_is_reindexed() {
        let temp = TempDir::new().unwrap();
        let archive = build_demo_archive(&temp, "Demo");
        let (store, indexer) = indexer(&temp);
        let folder = FolderSpec::archives(archive.parent().unwrap().to_string_lossy());

        indexer.index_tree(&folder).await.unwrap();
        let mut pkg = store.find_package_by_safe_name("Demo").unwrap().unwrap();
        pkg.change_token = Some("etag-1".to_string());
        store.upsert_package(&mut pkg).unwrap();

        // grow the archive so discovery sees a size change
        let staging = temp.path().join("Demo-staging");
        write_entry(&staging, "e5", "Assets/extra.txt", None, Some(b"more"), false);
        pack(&staging, &archive);

        indexer.index_tree(&folder).await.unwrap();
        let pkg = store.find_package_by_safe_name("Demo").unwrap().unwrap();
        assert_eq!(pkg.state, PackageState::Done);
        // invalidated on the state transition
        assert!(pkg.change_token.is_none());
        assert_eq!(store.files_for_package(pkg.id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_vendor_layout_recovers_publisher() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("staging");
        write_entry(&staging, "e1", "Assets/a.txt", None, Some(b"x"), false);

        let root = temp.path().join("vendor");
        let nested = root.join("Pine Studio").join("ScenesEnvironments");
        std::fs::create_dir_all(&nested).unwrap();
        pack(&staging, &nested.join("Forest.pkg"));

        let (store, indexer) = indexer(&temp);
        let folder = FolderSpec {
            vendor_layout: true,
            ..FolderSpec::archives(root.to_string_lossy())
        };
        indexer.index_tree(&folder).await.unwrap();

        let pkg = store.find_package_by_safe_name("Forest").unwrap().unwrap();
        assert_eq!(pkg.display_publisher.as_deref(), Some("Pine Studio"));
        assert_eq!(
            pkg.display_category.as_deref(),
            Some("Scenes/Environments")
        );
    }

    #[tokio::test]
    async fn test_missing_root_warns_and_continues() {
        let temp = TempDir::new().unwrap();
        let (_store, indexer) = indexer(&temp);
        let folder = FolderSpec::archives(temp.path().join("nope").to_string_lossy());
        assert!(indexer.index_tree(&folder).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let temp = TempDir::new().unwrap();
        let archive = build_demo_archive(&temp, "Demo");
        let store = Arc::new(Store::open(temp.path().join("index.sqlite")).unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let indexer = PackageIndexer::new(
            store,
            Arc::new(Materializer::new(temp.path().join("storage"))),
            IndexOptions::default(),
            ProgressHandle::new(),
            cancel,
        );
        let folder = FolderSpec::archives(archive.parent().unwrap().to_string_lossy());
        assert!(matches!(
            indexer.index_tree(&folder).await,
            Err(PackratError::IndexingCancelled)
        ));
    }
}
