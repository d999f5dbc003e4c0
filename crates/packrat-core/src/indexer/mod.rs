//! Indexers: archive trees and loose media trees.

mod media;
mod package;
mod progress;

pub use media::MediaIndexer;
pub use package::PackageIndexer;
pub use progress::{IndexProgress, ProgressHandle};
