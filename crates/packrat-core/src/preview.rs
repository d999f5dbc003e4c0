//! Preview generation.
//!
//! Rendering previews needs an engine the core does not embed, so the actual
//! rendering sits behind [`PreviewBackend`]. The queue stages a private copy
//! of every source file, polls the backend cooperatively and persists the
//! outcome. Indexers drain the queue down to a low water mark whenever it
//! grows past [`BatchConfig::PREVIEW_HIGH_WATER`], and fully at the end of a
//! run.

use crate::config::{BatchConfig, StorageConfig};
use crate::error::{PackratError, Result};
use crate::media;
use crate::store::{PackageFile, PreviewState, Store};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One queued preview request. The staged copy belongs to the queue and is
/// deleted when the request leaves it.
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub file_id: i64,
    pub file_type: String,
    /// Private copy of the source under the staging directory.
    pub staged: PathBuf,
    attempts: u32,
}

/// Renders preview images. `render` returns `Ok(false)` while the preview is
/// not ready yet; the queue polls again later.
#[async_trait]
pub trait PreviewBackend: Send + Sync {
    async fn render(&self, request: &PreviewRequest, output: &Path) -> Result<bool>;
}

/// Staging queue in front of a [`PreviewBackend`].
pub struct PreviewQueue {
    storage_root: PathBuf,
    store: Arc<Store>,
    backend: Arc<dyn PreviewBackend>,
    pending: Mutex<VecDeque<PreviewRequest>>,
}

impl PreviewQueue {
    pub fn new(
        storage_root: impl Into<PathBuf>,
        store: Arc<Store>,
        backend: Arc<dyn PreviewBackend>,
    ) -> Self {
        Self {
            storage_root: storage_root.into(),
            store,
            backend,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn staging_root(&self) -> PathBuf {
        self.storage_root
            .join(StorageConfig::PREVIEW_STAGING_DIR_NAME)
    }

    fn preview_root(&self) -> PathBuf {
        self.storage_root.join(StorageConfig::PREVIEW_DIR_NAME)
    }

    /// File name of a file's preview under the preview directory.
    pub fn preview_file_name(file_id: i64) -> String {
        format!("{file_id}.png")
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Stage a copy of `source` and enqueue a request for it. The original
    /// can disappear (cache clears, ejected media) without losing the job.
    pub async fn register(&self, file: &PackageFile, source: &Path) -> Result<()> {
        let staging = self.staging_root();
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| PackratError::io_with_path(e, &staging))?;

        let staged = staging.join(format!("{}.{}", file.id, file.file_type));
        tokio::fs::copy(source, &staged)
            .await
            .map_err(|e| PackratError::io_with_path(e, source))?;

        self.pending.lock().await.push_back(PreviewRequest {
            file_id: file.id,
            file_type: file.file_type.clone(),
            staged,
            attempts: 0,
        });
        Ok(())
    }

    /// Poll the backend until at most `keep_at_most` requests remain.
    ///
    /// A request that stays unready for [`BatchConfig::PREVIEW_MAX_ATTEMPTS`]
    /// polls completes without a preview. Backend errors drop the request
    /// with a warning; they never abort the drain.
    pub async fn drain(&self, keep_at_most: usize) -> Result<()> {
        let preview_root = self.preview_root();
        tokio::fs::create_dir_all(&preview_root)
            .await
            .map_err(|e| PackratError::io_with_path(e, &preview_root))?;

        loop {
            let mut request = {
                let mut pending = self.pending.lock().await;
                if pending.len() <= keep_at_most {
                    return Ok(());
                }
                match pending.pop_front() {
                    Some(request) => request,
                    None => return Ok(()),
                }
            };
            request.attempts += 1;

            let output = preview_root.join(Self::preview_file_name(request.file_id));
            match self.backend.render(&request, &output).await {
                Ok(true) => {
                    self.complete(&request, &output).await?;
                }
                Ok(false) if request.attempts < BatchConfig::PREVIEW_MAX_ATTEMPTS => {
                    self.pending.lock().await.push_back(request);
                    tokio::task::yield_now().await;
                }
                Ok(false) => {
                    debug!(
                        "Giving up on preview for file {} after {} polls",
                        request.file_id, request.attempts
                    );
                    self.discard(&request).await;
                }
                Err(e) => {
                    warn!("Preview backend failed for file {}: {}", request.file_id, e);
                    self.discard(&request).await;
                }
            }
        }
    }

    /// Persist a finished preview and the metadata probed from the staged
    /// copy, then release the staging file.
    async fn complete(&self, request: &PreviewRequest, _output: &Path) -> Result<()> {
        if let Some(mut file) = self.store.find_file(request.file_id)? {
            let info = media::probe(&request.staged, &request.file_type);
            if file.width.is_none() {
                file.width = info.width;
            }
            if file.height.is_none() {
                file.height = info.height;
            }
            if file.duration_seconds.is_none() {
                file.duration_seconds = info.duration_seconds;
            }
            file.preview_file = Some(Self::preview_file_name(request.file_id));
            file.preview_state = PreviewState::Generated;
            self.store.upsert_file(&mut file)?;
        }
        self.discard(request).await;
        Ok(())
    }

    async fn discard(&self, request: &PreviewRequest) {
        if let Err(e) = tokio::fs::remove_file(&request.staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(
                    "Could not remove staged preview source {}: {}",
                    request.staged.display(),
                    e
                );
            }
        }
    }
}
