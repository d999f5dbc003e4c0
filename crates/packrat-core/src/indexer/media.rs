//! Media-tree indexing.
//!
//! Loose media files are indexed under the synthetic no-package owner with
//! their absolute on-disk path. Which files qualify comes from the folder's
//! media kind, or from custom glob patterns when the kind is `Pattern`.

use crate::cancel::CancellationToken;
use crate::config::{type_group, BatchConfig, FolderSpec, IndexOptions, MediaKind};
use crate::error::{PackratError, Result};
use crate::indexer::progress::ProgressHandle;
use crate::media;
use crate::preview::PreviewQueue;
use crate::store::{PackageFile, Store};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub struct MediaIndexer {
    store: Arc<Store>,
    options: IndexOptions,
    progress: ProgressHandle,
    cancel: CancellationToken,
    /// Present when the host wired up a preview backend.
    preview_queue: Option<Arc<PreviewQueue>>,
}

impl MediaIndexer {
    pub fn new(
        store: Arc<Store>,
        options: IndexOptions,
        progress: ProgressHandle,
        cancel: CancellationToken,
        preview_queue: Option<Arc<PreviewQueue>>,
    ) -> Self {
        Self {
            store,
            options,
            progress,
            cancel,
            preview_queue,
        }
    }

    /// Index one media-tree root.
    pub async fn index_tree(&self, folder: &FolderSpec) -> Result<()> {
        let root = Path::new(&folder.location);
        if !root.is_dir() {
            warn!("Scan root {} does not exist, skipping", folder.location);
            return Ok(());
        }

        let matcher = build_matcher(folder)?;
        let owner = self.store.ensure_no_package()?;

        let files: Vec<_> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.file_name()
                    .map(|name| matcher.is_match(name))
                    .unwrap_or(false)
            })
            .collect();

        info!("Found {} media files under {}", files.len(), root.display());
        self.progress.start(files.len());

        for (i, path) in files.iter().enumerate() {
            self.cancel.check()?;
            self.progress
                .tick_main(path.file_name().and_then(|n| n.to_str()).unwrap_or(""));

            if let Err(e) = self.index_media_file(owner.id, path, folder).await {
                warn!("Could not index {}: {}", path.display(), e);
            }

            if (i + 1) % BatchConfig::MEDIA_BREAK_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }

            if let Some(queue) = self.preview_queue.as_deref() {
                if queue.pending_count().await > BatchConfig::PREVIEW_HIGH_WATER {
                    queue.drain(BatchConfig::PREVIEW_DRAIN_TO).await?;
                }
            }
        }

        // finish outstanding previews before the run reports done
        if let Some(queue) = self.preview_queue.as_deref() {
            queue.drain(0).await?;
        }
        Ok(())
    }

    async fn index_media_file(
        &self,
        owner_id: i64,
        path: &Path,
        folder: &FolderSpec,
    ) -> Result<()> {
        let size = std::fs::metadata(path)
            .map_err(|e| PackratError::io_with_path(e, path))?
            .len() as i64;
        let location = path.to_string_lossy().to_string();

        // unchanged files keep their record, previews included
        if let Some(existing) = self.store.find_file_by_path(owner_id, &location)? {
            if existing.size_bytes == size {
                return Ok(());
            }
        }

        let mut file = PackageFile {
            package_id: owner_id,
            path: location.clone(),
            file_name: PackageFile::name_of(&location),
            file_type: PackageFile::type_of(&location),
            size_bytes: size,
            ..Default::default()
        };
        self.store.upsert_file(&mut file)?;

        if self.options.gather_extended_metadata {
            let info = media::probe(path, &file.file_type);
            if info != media::MediaInfo::default() {
                file.width = info.width;
                file.height = info.height;
                file.duration_seconds = info.duration_seconds;
                self.store.upsert_file(&mut file)?;
            }
        }

        if folder.create_previews {
            if let Some(queue) = self.preview_queue.as_deref() {
                queue.register(&file, path).await?;
            }
        }
        Ok(())
    }
}

/// Compile a folder's media selection into a glob matcher over file names.
fn build_matcher(folder: &FolderSpec) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    let mut add = |pattern: &str| -> Result<()> {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| PackratError::Config {
                message: format!("Invalid media pattern '{pattern}': {e}"),
            })?;
        builder.add(glob);
        Ok(())
    };

    if folder.media_kind == MediaKind::Pattern {
        let patterns = folder.pattern.as_deref().unwrap_or_default();
        for pattern in patterns.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            add(pattern)?;
        }
    } else {
        for group in folder.media_kind.groups() {
            for ext in type_group(group).unwrap_or(&[]) {
                add(&format!("*.{ext}"))?;
            }
        }
    }

    builder.build().map_err(|e| PackratError::Config {
        message: format!("Could not build media matcher: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::tests::CountingBackend;
    use crate::store::NO_PACKAGE;
    use tempfile::TempDir;

    fn seed_tree(temp: &TempDir) -> std::path::PathBuf {
        let root = temp.path().join("media");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        image::RgbImage::new(6, 3).save(root.join("photo.png")).unwrap();
        std::fs::write(root.join("sub").join("clip.WAV"), b"RIFF").unwrap();
        std::fs::write(root.join("notes.txt"), b"text").unwrap();
        root
    }

    fn media_indexer(temp: &TempDir, queue: Option<Arc<PreviewQueue>>) -> (Arc<Store>, MediaIndexer) {
        let store = Arc::new(Store::open(temp.path().join("index.sqlite")).unwrap());
        let indexer = MediaIndexer::new(
            store.clone(),
            IndexOptions::default(),
            ProgressHandle::new(),
            CancellationToken::new(),
            queue,
        );
        (store, indexer)
    }

    #[tokio::test]
    async fn test_kind_filter_and_metadata() {
        let temp = TempDir::new().unwrap();
        let root = seed_tree(&temp);
        let (store, indexer) = media_indexer(&temp, None);

        let folder = FolderSpec::media(root.to_string_lossy(), MediaKind::All);
        indexer.index_tree(&folder).await.unwrap();

        let owner = store.find_package_by_safe_name(NO_PACKAGE).unwrap().unwrap();
        let files = store.files_for_package(owner.id).unwrap();
        // txt is not media; the extension match is case-insensitive
        assert_eq!(files.len(), 2);

        let photo = files.iter().find(|f| f.file_type == "png").unwrap();
        assert_eq!(photo.width, Some(6));
        assert_eq!(photo.height, Some(3));
    }

    #[tokio::test]
    async fn test_pattern_kind() {
        let temp = TempDir::new().unwrap();
        let root = seed_tree(&temp);
        let (store, indexer) = media_indexer(&temp, None);

        let folder = FolderSpec {
            media_kind: MediaKind::Pattern,
            pattern: Some("*.txt; photo.*".to_string()),
            ..FolderSpec::media(root.to_string_lossy(), MediaKind::Pattern)
        };
        indexer.index_tree(&folder).await.unwrap();

        let owner = store.find_package_by_safe_name(NO_PACKAGE).unwrap().unwrap();
        let names: Vec<String> = store
            .files_for_package(owner.id)
            .unwrap()
            .iter()
            .map(|f| f.file_name.clone())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"notes.txt".to_string()));
        assert!(names.contains(&"photo.png".to_string()));
    }

    #[tokio::test]
    async fn test_rescan_keeps_records() {
        let temp = TempDir::new().unwrap();
        let root = seed_tree(&temp);
        let (store, indexer) = media_indexer(&temp, None);
        let folder = FolderSpec::media(root.to_string_lossy(), MediaKind::Images);

        indexer.index_tree(&folder).await.unwrap();
        let owner = store.find_package_by_safe_name(NO_PACKAGE).unwrap().unwrap();
        let before = store.files_for_package(owner.id).unwrap();

        indexer.index_tree(&folder).await.unwrap();
        let after = store.files_for_package(owner.id).unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].id, after[0].id);
    }

    #[tokio::test]
    async fn test_previews_generated_when_requested() {
        let temp = TempDir::new().unwrap();
        let root = seed_tree(&temp);

        let store = Arc::new(Store::open(temp.path().join("index.sqlite")).unwrap());
        let queue = Arc::new(PreviewQueue::new(
            temp.path().join("storage"),
            store.clone(),
            CountingBackend::after(0),
        ));
        let indexer = MediaIndexer::new(
            store.clone(),
            IndexOptions::default(),
            ProgressHandle::new(),
            CancellationToken::new(),
            Some(queue.clone()),
        );

        let folder = FolderSpec {
            create_previews: true,
            ..FolderSpec::media(root.to_string_lossy(), MediaKind::Images)
        };
        indexer.index_tree(&folder).await.unwrap();

        assert_eq!(queue.pending_count().await, 0);
        let owner = store.find_package_by_safe_name(NO_PACKAGE).unwrap().unwrap();
        let files = store.files_for_package(owner.id).unwrap();
        assert!(files.iter().all(|f| f.preview_file.is_some()));
    }
}
