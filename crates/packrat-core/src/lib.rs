//! packrat-core: indexing and search for packaged media archives.
//!
//! The crate indexes trees of package archives and loose media folders into
//! a local SQLite database, materializes archived payloads on demand,
//! resolves reference-based dependencies between indexed files and answers
//! filtered, paged searches over the result.
//!
//! [`Inventory`] is the service context that wires the pieces together; the
//! individual components are usable on their own for hosts that need finer
//! control.

pub mod archive;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod deps;
pub mod error;
pub mod indexer;
pub mod materialize;
pub mod media;
pub mod preview;
pub mod search;
pub mod store;

pub use cancel::CancellationToken;
pub use catalog::{CatalogClient, CatalogPackage, CatalogSync, SyncStats};
pub use config::{FolderSpec, IndexOptions, MediaKind, ScanKind, StorageConfig};
pub use deps::{DependencyGraph, DependencyResolver, DependencyState};
pub use error::{PackratError, Result};
pub use indexer::{IndexProgress, MediaIndexer, PackageIndexer, ProgressHandle};
pub use materialize::Materializer;
pub use preview::{PreviewBackend, PreviewQueue};
pub use search::{FileHit, SearchFilter, SearchPage, SortField};
pub use store::{Package, PackageFile, PackageState, Store, Tag};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Service context owning the store, the extraction cache and the shared
/// run state. One instance per storage root.
pub struct Inventory {
    options: IndexOptions,
    store: Arc<Store>,
    materializer: Arc<Materializer>,
    progress: ProgressHandle,
    cancel: CancellationToken,
    preview_queue: Option<Arc<PreviewQueue>>,
}

impl Inventory {
    /// Open (or create) the inventory under the given storage root.
    pub fn open(storage_root: impl Into<PathBuf>, options: IndexOptions) -> Result<Self> {
        let storage_root = storage_root.into();
        let store = Arc::new(Store::open(storage_root.join(StorageConfig::DB_FILE_NAME))?);
        let materializer = Arc::new(Materializer::new(&storage_root));
        info!("Opened inventory at {}", storage_root.display());

        Ok(Self {
            options,
            store,
            materializer,
            progress: ProgressHandle::new(),
            cancel: CancellationToken::new(),
            preview_queue: None,
        })
    }

    /// Attach a preview backend. Without one, media scans index metadata but
    /// generate no previews.
    pub fn with_preview_backend(mut self, backend: Arc<dyn PreviewBackend>) -> Self {
        let storage_root = self
            .store
            .db_path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        self.preview_queue = Some(Arc::new(PreviewQueue::new(
            storage_root,
            self.store.clone(),
            backend,
        )));
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn materializer(&self) -> &Arc<Materializer> {
        &self.materializer
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Snapshot of the current (or last) index run.
    pub fn progress(&self) -> IndexProgress {
        self.progress.snapshot()
    }

    /// Request cancellation of the running index operation. Takes effect at
    /// the next batch boundary.
    pub fn cancel_indexing(&self) {
        self.cancel.cancel();
    }

    /// Index all enabled scan roots, archives before media.
    pub async fn start_indexing(&self, folders: &[FolderSpec]) -> Result<()> {
        self.cancel.reset();
        let result = self.run_indexers(folders).await;
        self.progress.finish();
        result
    }

    async fn run_indexers(&self, folders: &[FolderSpec]) -> Result<()> {
        let package_indexer = PackageIndexer::new(
            self.store.clone(),
            self.materializer.clone(),
            self.options.clone(),
            self.progress.clone(),
            self.cancel.clone(),
        );
        for folder in folders.iter().filter(|f| f.enabled) {
            if folder.scan_kind == ScanKind::ArchiveTree {
                package_indexer.index_tree(folder).await?;
            }
        }

        let media_indexer = MediaIndexer::new(
            self.store.clone(),
            self.options.clone(),
            self.progress.clone(),
            self.cancel.clone(),
            self.preview_queue.clone(),
        );
        for folder in folders.iter().filter(|f| f.enabled) {
            if folder.scan_kind == ScanKind::MediaTree {
                media_indexer.index_tree(folder).await?;
            }
        }
        Ok(())
    }

    /// Search the index. The configured excluded extensions apply on top of
    /// whatever the filter already excludes.
    pub fn search(&self, filter: &SearchFilter) -> Result<SearchPage> {
        let mut effective = filter.clone();
        for ext in self.options.excluded_extension_list() {
            if !effective.excluded_extensions.contains(&ext) {
                effective.excluded_extensions.push(ext);
            }
        }
        self.store.search(&effective)
    }

    /// Materialize a package and return the directory holding its payloads.
    pub async fn ensure_materialized(&self, package_id: i64) -> Result<Option<PathBuf>> {
        let package = self
            .store
            .find_package(package_id)?
            .ok_or(PackratError::PackageNotFound(package_id))?;
        self.materializer.ensure_materialized(&package).await
    }

    /// Materialize a single file and return its plain-file path.
    pub async fn ensure_file_materialized(&self, file_id: i64) -> Result<Option<PathBuf>> {
        let (package, file) = self.load_file(file_id)?;
        self.materializer
            .ensure_file_materialized(&package, &file)
            .await
    }

    /// Copy a file (plus dependencies when requested) into a target
    /// directory's content tree. Script-type dependencies only travel along
    /// when `with_scripts` is set.
    pub async fn copy_to(
        &self,
        file_id: i64,
        target_root: &std::path::Path,
        with_dependencies: bool,
        with_scripts: bool,
    ) -> Result<Option<PathBuf>> {
        let (package, file) = self.load_file(file_id)?;
        let dest = self.materializer.copy_to(&package, &file, target_root).await?;
        if dest.is_none() {
            return Ok(None);
        }

        if with_dependencies {
            let graph = self.resolve_dependencies(file_id).await?;
            for dep in &graph.files {
                if !with_scripts && dep.file_type == config::SCRIPT_TYPE {
                    continue;
                }
                self.materializer.copy_to(&package, dep, target_root).await?;
            }
        }
        Ok(dest)
    }

    /// Resolve the transitive dependencies of one indexed file.
    pub async fn resolve_dependencies(&self, file_id: i64) -> Result<DependencyGraph> {
        let (package, file) = self.load_file(file_id)?;
        DependencyResolver::new(&self.store, &self.materializer)
            .resolve(&package, &file, &self.cancel)
            .await
    }

    /// Merge the remote catalog's ownership list into the index.
    pub async fn sync_catalog(&self, client: &dyn CatalogClient) -> Result<SyncStats> {
        CatalogSync::new(&self.store, client).sync(&self.cancel).await
    }

    /// Refresh remote details for known packages, honoring change tokens.
    pub async fn refresh_catalog_details(&self, client: &dyn CatalogClient) -> Result<SyncStats> {
        CatalogSync::new(&self.store, client)
            .refresh_details(&self.cancel)
            .await
    }

    /// Flag a package's files for preview regeneration and, when a backend
    /// is attached, work through the backlog immediately.
    pub async fn regenerate_previews(&self, package_id: i64) -> Result<usize> {
        let flagged = self.store.schedule_preview_regeneration(package_id)?;
        self.process_preview_backlog().await?;
        Ok(flagged)
    }

    /// Feed every file flagged for regeneration through the preview queue.
    pub async fn process_preview_backlog(&self) -> Result<()> {
        let Some(queue) = self.preview_queue.as_deref() else {
            return Ok(());
        };

        for file in self.store.files_needing_preview()? {
            self.cancel.check()?;
            let Some(package) = self.store.find_package(file.package_id)? else {
                continue;
            };
            if let Some(source) = self
                .materializer
                .ensure_file_materialized(&package, &file)
                .await?
            {
                queue.register(&file, &source).await?;
            }
            if queue.pending_count().await > config::BatchConfig::PREVIEW_HIGH_WATER {
                queue.drain(config::BatchConfig::PREVIEW_DRAIN_TO).await?;
            }
        }
        queue.drain(0).await
    }

    /// Total on-disk size of the extraction cache.
    pub fn cache_size(&self) -> u64 {
        self.materializer.cache_size()
    }

    /// Drop the extraction cache; indexed records are unaffected.
    pub async fn clear_cache(&self) {
        self.materializer.clear_cache().await;
    }

    fn load_file(&self, file_id: i64) -> Result<(Package, PackageFile)> {
        let file = self
            .store
            .find_file(file_id)?
            .ok_or(PackratError::PackageFileNotFound(file_id))?;
        let package = self
            .store
            .find_package(file.package_id)?
            .ok_or(PackratError::PackageNotFound(file.package_id))?;
        Ok((package, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let temp = TempDir::new().unwrap();
        let inventory = Inventory::open(temp.path(), IndexOptions::default()).unwrap();
        assert!(temp.path().join(StorageConfig::DB_FILE_NAME).exists());
        assert!(!inventory.progress().running);
    }

    #[tokio::test]
    async fn test_search_applies_configured_exclusions() {
        let temp = TempDir::new().unwrap();
        let options = IndexOptions {
            excluded_extensions: "txt".to_string(),
            ..Default::default()
        };
        let inventory = Inventory::open(temp.path(), options).unwrap();

        let mut pkg = Package {
            safe_name: "p".to_string(),
            ..Default::default()
        };
        inventory.store().upsert_package(&mut pkg).unwrap();
        for (path, ftype) in [("a.txt", "txt"), ("b.png", "png")] {
            let mut file = PackageFile {
                package_id: pkg.id,
                path: path.to_string(),
                file_name: path.to_string(),
                file_type: ftype.to_string(),
                ..Default::default()
            };
            inventory.store().upsert_file(&mut file).unwrap();
        }

        let page = inventory.search(&SearchFilter::default()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].file_type, "png");
    }

    #[tokio::test]
    async fn test_unknown_ids_error() {
        let temp = TempDir::new().unwrap();
        let inventory = Inventory::open(temp.path(), IndexOptions::default()).unwrap();

        assert!(matches!(
            inventory.ensure_materialized(404).await,
            Err(PackratError::PackageNotFound(404))
        ));
        assert!(matches!(
            inventory.resolve_dependencies(404).await,
            Err(PackratError::PackageFileNotFound(404))
        ));
    }
}
