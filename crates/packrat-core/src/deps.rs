//! Dependency resolution for indexed files.
//!
//! Text-based payload formats embed the reference identifiers of the files
//! they use. Resolution walks those references with an explicit worklist and
//! a visited set, so reference cycles terminate and deep chains cannot
//! overflow the stack. Identifiers are only ever looked up inside the owning
//! package; equal identifiers in other packages are unrelated files.

use crate::cancel::CancellationToken;
use crate::config::{ArchiveConfig, SCAN_DEPENDENCIES, SCRIPT_TYPE};
use crate::error::Result;
use crate::materialize::Materializer;
use crate::store::{Package, PackageFile, Store, NO_PACKAGE};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Outcome of a resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyState {
    #[default]
    Unknown,
    /// The file's format does not carry references.
    NotPossible,
    /// Walk completed; the graph is trustworthy.
    Done,
    /// The backing data was unavailable.
    Failed,
}

/// The resolved transitive closure of one file's references, excluding the
/// file itself.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub state: DependencyState,
    pub files: Vec<PackageFile>,
    pub total_size: i64,
}

impl DependencyGraph {
    fn with_state(state: DependencyState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// The script subset; hosts treat these differently on import.
    pub fn scripts(&self) -> impl Iterator<Item = &PackageFile> {
        self.files.iter().filter(|f| f.file_type == SCRIPT_TYPE)
    }

    pub fn non_scripts(&self) -> impl Iterator<Item = &PackageFile> {
        self.files.iter().filter(|f| f.file_type != SCRIPT_TYPE)
    }
}

fn ref_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(ArchiveConfig::REF_PATTERN).unwrap_or_else(|_| unreachable!())
    })
}

/// Whether the file's type can embed references at all.
pub fn is_scannable(file: &PackageFile) -> bool {
    SCAN_DEPENDENCIES.contains(&file.file_type.as_str())
}

pub struct DependencyResolver<'a> {
    store: &'a Store,
    materializer: &'a Materializer,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(store: &'a Store, materializer: &'a Materializer) -> Self {
        Self {
            store,
            materializer,
        }
    }

    /// Resolve the transitive dependencies of one file.
    ///
    /// Loose media owned by the synthetic no-package entry has no reference
    /// namespace and resolves to `NotPossible` immediately.
    pub async fn resolve(
        &self,
        package: &Package,
        file: &PackageFile,
        cancel: &CancellationToken,
    ) -> Result<DependencyGraph> {
        if package.safe_name == NO_PACKAGE || !is_scannable(file) {
            return Ok(DependencyGraph::with_state(DependencyState::NotPossible));
        }

        let mut graph = DependencyGraph::with_state(DependencyState::Done);
        let mut visited: HashSet<(i64, String)> = HashSet::new();
        if let Some(own_ref) = file.ref_id.as_deref() {
            visited.insert((file.package_id, own_ref.to_string()));
        }

        let mut worklist: Vec<PackageFile> = vec![file.clone()];
        let mut first = true;

        while let Some(current) = worklist.pop() {
            cancel.check()?;

            let Some(path) = self
                .materializer
                .ensure_file_materialized(package, &current)
                .await?
            else {
                if first {
                    return Ok(DependencyGraph::with_state(DependencyState::Failed));
                }
                debug!("Dependency {} is not materializable, skipping", current.path);
                first = false;
                continue;
            };

            let refs = match scan_refs(&path) {
                Some(refs) => refs,
                None if first => {
                    return Ok(DependencyGraph::with_state(DependencyState::NotPossible))
                }
                None => {
                    first = false;
                    continue;
                }
            };
            first = false;

            for ref_id in refs {
                let key = (current.package_id, ref_id.clone());
                if !visited.insert(key) {
                    continue;
                }
                match self.store.find_file_by_ref(current.package_id, &ref_id)? {
                    Some(dep) => {
                        // every resolved dependency lands in the cache, even
                        // ones whose format is never scanned further
                        if self
                            .materializer
                            .ensure_file_materialized(package, &dep)
                            .await?
                            .is_none()
                        {
                            debug!("Dependency {} is not materializable", dep.path);
                        }
                        // recorded before the recursion step; a back-reference
                        // to it later hits the visited set instead of looping
                        graph.total_size += dep.size_bytes;
                        if is_scannable(&dep) {
                            worklist.push(dep.clone());
                        }
                        graph.files.push(dep);
                    }
                    None => {
                        debug!(
                            "Reference {} in {} does not resolve within package {}",
                            ref_id, current.path, package.safe_name
                        );
                    }
                }
            }
        }

        graph.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(graph)
    }
}

/// Read a payload and return the embedded reference identifiers, or `None`
/// when the file is not in the text format.
fn scan_refs(path: &Path) -> Option<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not read {} for scanning: {}", path.display(), e);
            return None;
        }
    };
    if !content.starts_with(ArchiveConfig::TEXT_MARKER) {
        return None;
    }

    let mut refs = Vec::new();
    for cap in ref_regex().captures_iter(&content) {
        if let Some(m) = cap.get(1) {
            if !m.as_str().is_empty() {
                refs.push(m.as_str().to_string());
            }
        }
    }
    Some(refs)
}
