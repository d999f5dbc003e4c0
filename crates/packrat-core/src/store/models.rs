//! Persisted record types.
//!
//! These are the mutable entities the indexers write. Search results use the
//! separate read-only [`crate::search::FileHit`] projection.

use serde::{Deserialize, Serialize};

/// Safe name of the synthetic owner for loose media files.
pub const NO_PACKAGE: &str = "-none-";

/// Where an indexed package came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PackageOrigin {
    /// A logical source directory; files are already plain on disk.
    #[default]
    DirectorySource = 0,
    /// An archive found in a custom folder.
    CustomArchive = 1,
    /// An archive known to the remote catalog.
    RemoteCatalogPackage = 2,
}

impl PackageOrigin {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => PackageOrigin::CustomArchive,
            2 => PackageOrigin::RemoteCatalogPackage,
            _ => PackageOrigin::DirectorySource,
        }
    }
}

/// Processing state of a package. Only ever advances `New -> InProcess -> Done`;
/// a re-scan resets to `InProcess` when size or location changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PackageState {
    #[default]
    New = 0,
    InProcess = 1,
    Done = 2,
}

impl PackageState {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => PackageState::InProcess,
            2 => PackageState::Done,
            _ => PackageState::New,
        }
    }
}

/// Preview lifecycle of a package file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PreviewState {
    #[default]
    Unset = 0,
    Generated = 1,
    NeedsRegeneration = 2,
    Custom = 3,
}

impl PreviewState {
    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => PreviewState::Generated,
            2 => PreviewState::NeedsRegeneration,
            3 => PreviewState::Custom,
            _ => PreviewState::Unset,
        }
    }
}

/// What a tag assignment points at. Only packages for now; the column keeps
/// the schema open for file-level tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TagTarget {
    #[default]
    Package = 0,
}

/// One indexed archive or logical source directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,
    /// Normalized identity key, unique per source. Matching/dedup key.
    pub safe_name: String,
    pub display_name: Option<String>,
    pub safe_publisher: Option<String>,
    pub display_publisher: Option<String>,
    pub safe_category: Option<String>,
    pub display_category: Option<String>,
    pub origin: PackageOrigin,
    /// On-disk location of the archive (or source directory).
    pub location: Option<String>,
    pub size_bytes: i64,
    pub state: PackageState,
    /// Opaque token from the remote catalog; cleared to force a re-fetch.
    pub change_token: Option<String>,
    /// Remote catalog key, 0 when unknown locally.
    pub foreign_id: i64,
    /// File name of the captured archive-level preview image.
    pub preview_image: Option<String>,
    /// Raw lifecycle state reported by the remote catalog.
    pub official_state: Option<String>,
    pub version: Option<String>,
    /// Removes the package from search without deleting data.
    pub exclude: bool,
}

impl Package {
    /// The synthetic owner row for loose media files.
    pub fn no_package() -> Self {
        Self {
            safe_name: NO_PACKAGE.to_string(),
            origin: PackageOrigin::DirectorySource,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.safe_name)
    }
}

/// One payload entry of a package, or one loose media file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageFile {
    pub id: i64,
    pub package_id: i64,
    /// Internal path as the archive records it (or the on-disk path for
    /// loose media).
    pub path: String,
    /// Path of the payload inside the extraction cache, relative to the
    /// package's cache directory. Empty for loose media.
    pub source_path: String,
    pub file_name: String,
    /// Stable reference identifier from the sidecar. Unique only within the
    /// owning package; collisions across packages are expected.
    pub ref_id: Option<String>,
    pub size_bytes: i64,
    /// Lower-cased extension.
    pub file_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_seconds: Option<f64>,
    /// File name of the generated preview image under `Previews/`.
    pub preview_file: Option<String>,
    pub preview_state: PreviewState,
}

impl PackageFile {
    /// Lower-cased extension of a path, empty when absent.
    pub fn type_of(path: &str) -> String {
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }

    /// Plain file name of a path.
    pub fn name_of(path: &str) -> String {
        std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string()
    }
}

/// A user-defined label. Unique case-insensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// Set when the tag was imported from the remote catalog. Only ever
    /// upgraded, never cleared by imports.
    pub from_external_catalog: bool,
}

/// Binds a tag to a target entity. Unique per (tag, target kind, target id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagAssignment {
    pub id: i64,
    pub tag_id: i64,
    pub target_kind: TagTarget,
    pub target_id: i64,
}

/// Aggregated per-package overview for listings: package plus file count and
/// summed uncompressed size.
#[derive(Debug, Clone)]
pub struct PackageOverview {
    pub package: Package,
    pub file_count: i64,
    pub uncompressed_size: i64,
}

/// Derive a normalized, filesystem-safe identity key from a display name.
///
/// Strips everything outside `[a-zA-Z0-9 -]` and collapses runs of
/// whitespace, matching what the packer does when writing archives to disk.
pub fn safe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_space = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_space = false;
        } else if c.is_whitespace() {
            if !last_space && !out.is_empty() {
                out.push(' ');
            }
            last_space = true;
        }
        // other characters are dropped entirely
    }
    out.trim().to_string()
}

/// Split CamelCase into a `/`-separated display category, e.g.
/// `ScenesEnvironments` -> `Scenes/Environments`.
pub fn display_category_from_safe(safe: &str) -> String {
    let mut out = String::with_capacity(safe.len() + 4);
    let chars: Vec<char> = safe.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && c.is_ascii_uppercase() && chars[i - 1].is_ascii_lowercase() {
            out.push('/');
        }
        out.push(*c);
    }
    out
}
