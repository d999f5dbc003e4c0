//! Configuration value types and system constants.
//!
//! Loading and saving configuration is the host's job; the indexers consume
//! these types read-only. Constants follow the grouped-struct pattern used
//! across the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage layout and batch tuning.
pub struct StorageConfig;

impl StorageConfig {
    pub const DB_FILE_NAME: &'static str = "packrat.sqlite";
    pub const PREVIEW_DIR_NAME: &'static str = "Previews";
    pub const EXTRACT_DIR_NAME: &'static str = "Extracted";
    pub const PREVIEW_STAGING_DIR_NAME: &'static str = "PreviewStaging";
    /// Stable subdirectory materialized payloads are copied into.
    pub const CONTENT_DIR_NAME: &'static str = "Content";
}

/// Batch sizing and retry tuning for the indexers and the materializer.
pub struct BatchConfig;

impl BatchConfig {
    /// Yield to the runtime every N packages during discovery.
    pub const PACKAGE_BREAK_INTERVAL: usize = 50;
    /// Yield every N payload entries during content indexing.
    pub const FILE_BREAK_INTERVAL: usize = 10;
    /// Yield every N files during media scans.
    pub const MEDIA_BREAK_INTERVAL: usize = 30;
    /// Attempts to delete a stale extraction directory before giving up.
    pub const CACHE_DELETE_RETRIES: u32 = 5;
    /// Back-off between stale-cache delete attempts.
    pub const CACHE_DELETE_BACKOFF: Duration = Duration::from_millis(500);
    /// Preview requests in flight before the indexers apply back-pressure.
    pub const PREVIEW_HIGH_WATER: usize = 100;
    /// Queue size the indexers drain down to when over the high water mark.
    pub const PREVIEW_DRAIN_TO: usize = 10;
    /// Poll rounds a preview request survives before completing as "no preview".
    pub const PREVIEW_MAX_ATTEMPTS: u32 = 50;
}

/// The fixed archive layout.
pub struct ArchiveConfig;

impl ArchiveConfig {
    /// Extension of package archives (gzipped tar).
    pub const PACKAGE_EXT: &'static str = "pkg";
    /// Per-entry file holding the payload's internal path.
    pub const PATHNAME_FILE: &'static str = "pathname";
    /// Per-entry payload file; entries without one are directory placeholders.
    pub const DATA_FILE: &'static str = "data";
    /// Per-entry sidecar carrying the reference identifier.
    pub const META_FILE: &'static str = "data.meta";
    /// Per-entry bundled preview image.
    pub const PREVIEW_FILE: &'static str = "preview.png";
    /// Archive-level preview at the extraction root.
    pub const ICON_FILE: &'static str = ".icon.png";
    /// Marker that identifies a text-based, dependency-scannable payload.
    pub const TEXT_MARKER: &'static str = "%PKG";
    /// Token pattern for embedded reference identifiers.
    pub const REF_PATTERN: &'static str = "ref: (?:([a-z0-9]*))";
    /// Sidecar line prefix carrying the reference identifier.
    pub const REF_LINE_PREFIX: &'static str = "ref: ";
}

/// File types whose content may embed reference identifiers. Everything
/// else is skipped by the dependency resolver without reading it.
pub const SCAN_DEPENDENCIES: &[&str] = &[
    "node", "mat", "graph", "chain", "rig", "surface", "cubemap", "compose",
];

/// Type used for the "script" split of a dependency graph.
pub const SCRIPT_TYPE: &str = "script";

/// Extension groups for content-type filters and search dropdowns.
pub const TYPE_GROUPS: &[(&str, &[&str])] = &[
    ("Audio", &["wav", "mp3", "ogg", "aiff", "aif", "mod", "it", "s3m", "xm"]),
    (
        "Images",
        &[
            "png", "jpg", "jpeg", "bmp", "tga", "tif", "tiff", "psd", "svg", "webp", "ico", "exr",
            "gif", "hdr",
        ],
    ),
    ("Video", &["mp4"]),
    ("Models", &["fbx", "obj", "blend", "dae", "3ds", "gltf", "glb"]),
    ("Scripts", &[SCRIPT_TYPE]),
    ("Documents", &["md", "txt", "json", "rtf", "pdf", "html", "xml"]),
];

/// Look up the extensions of a named type group.
pub fn type_group(name: &str) -> Option<&'static [&'static str]> {
    TYPE_GROUPS
        .iter()
        .find(|(group, _)| *group == name)
        .map(|(_, exts)| *exts)
}

/// Whether a lower-cased extension belongs to the named group.
pub fn is_type_in_group(ext: &str, group: &str) -> bool {
    type_group(group).is_some_and(|exts| exts.contains(&ext))
}

/// What a media-tree scan should pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MediaKind {
    /// Audio, image and model groups together.
    #[default]
    All,
    Audio,
    Images,
    Models,
    /// Only files matching [`FolderSpec::pattern`].
    Pattern,
}

impl MediaKind {
    /// The type groups this kind expands to (empty for `Pattern`).
    pub fn groups(&self) -> &'static [&'static str] {
        match self {
            MediaKind::All => &["Audio", "Images", "Models"],
            MediaKind::Audio => &["Audio"],
            MediaKind::Images => &["Images"],
            MediaKind::Models => &["Models"],
            MediaKind::Pattern => &[],
        }
    }
}

/// How a configured folder is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanKind {
    /// Recursively index `*.pkg` archives.
    ArchiveTree,
    /// Recursively index loose media files.
    MediaTree,
}

/// A configured scan root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSpec {
    pub location: String,
    pub enabled: bool,
    pub scan_kind: ScanKind,
    /// Content-type filter for media trees.
    #[serde(default)]
    pub media_kind: MediaKind,
    /// Custom `;`-separated glob patterns, used when `media_kind` is `Pattern`.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Whether media scans enqueue preview generation for new files.
    #[serde(default)]
    pub create_previews: bool,
    /// Whether the archive tree follows the vendor download layout
    /// (category/publisher recoverable from parent directories).
    #[serde(default)]
    pub vendor_layout: bool,
}

impl FolderSpec {
    /// Convenience constructor for an archive tree root.
    pub fn archives(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            enabled: true,
            scan_kind: ScanKind::ArchiveTree,
            media_kind: MediaKind::All,
            pattern: None,
            create_previews: false,
            vendor_layout: false,
        }
    }

    /// Convenience constructor for a media tree root.
    pub fn media(location: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            location: location.into(),
            enabled: true,
            scan_kind: ScanKind::MediaTree,
            media_kind: kind,
            pattern: None,
            create_previews: false,
            vendor_layout: false,
        }
    }
}

/// Indexing toggles consumed from the host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Run pass 2 (extract archives and index payload entries).
    pub index_package_contents: bool,
    /// Capture width/height/duration during indexing.
    pub gather_extended_metadata: bool,
    /// Copy bundled preview images out of archives.
    pub extract_previews: bool,
    /// Extensions excluded from every search, `;`-separated.
    pub excluded_extensions: String,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            index_package_contents: true,
            gather_extended_metadata: true,
            extract_previews: true,
            excluded_extensions: String::new(),
        }
    }
}

impl IndexOptions {
    /// Excluded extensions as a cleaned-up list.
    pub fn excluded_extension_list(&self) -> Vec<String> {
        self.excluded_extensions
            .split(';')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}
