//! Persistence layer: record types and the SQLite-backed [`Store`].

mod db;
mod models;

pub use db::Store;
pub use models::{
    display_category_from_safe, safe_name, Package, PackageFile, PackageOrigin, PackageOverview,
    PackageState, PreviewState, Tag, TagAssignment, TagTarget, NO_PACKAGE,
};
