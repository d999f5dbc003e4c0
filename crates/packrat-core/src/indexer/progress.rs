//! Progress reporting for index runs.
//!
//! Indexers write through a shared handle; observers take cheap snapshots
//! whenever they want to render state. There is no callback surface.

use std::sync::{Arc, Mutex};

/// Point-in-time snapshot of a running (or finished) index run.
#[derive(Debug, Clone, Default)]
pub struct IndexProgress {
    pub running: bool,
    /// Outer loop: packages or scan roots.
    pub main_count: usize,
    pub main_progress: usize,
    pub current_main: String,
    /// Inner loop: entries within the current package.
    pub sub_count: usize,
    pub sub_progress: usize,
    pub current_sub: String,
}

/// Cloneable writer/reader handle over the shared progress state.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<Mutex<IndexProgress>>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut IndexProgress)) {
        if let Ok(mut inner) = self.inner.lock() {
            f(&mut inner);
        }
    }

    pub fn snapshot(&self) -> IndexProgress {
        self.inner
            .lock()
            .map(|inner| inner.clone())
            .unwrap_or_default()
    }

    pub fn start(&self, main_count: usize) {
        self.update(|p| {
            *p = IndexProgress {
                running: true,
                main_count,
                ..Default::default()
            };
        });
    }

    pub fn tick_main(&self, label: impl Into<String>) {
        let label = label.into();
        self.update(|p| {
            p.main_progress += 1;
            p.current_main = label;
            p.sub_count = 0;
            p.sub_progress = 0;
            p.current_sub.clear();
        });
    }

    pub fn start_sub(&self, sub_count: usize) {
        self.update(|p| {
            p.sub_count = sub_count;
            p.sub_progress = 0;
        });
    }

    pub fn tick_sub(&self, label: impl Into<String>) {
        let label = label.into();
        self.update(|p| {
            p.sub_progress += 1;
            p.current_sub = label;
        });
    }

    pub fn finish(&self) {
        self.update(|p| {
            p.running = false;
            p.current_main.clear();
            p.current_sub.clear();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_isolated_from_handle() {
        let handle = ProgressHandle::new();
        handle.start(3);
        handle.tick_main("first");

        let snap = handle.snapshot();
        handle.tick_main("second");

        assert_eq!(snap.main_progress, 1);
        assert_eq!(snap.current_main, "first");
        assert_eq!(handle.snapshot().main_progress, 2);
    }

    #[test]
    fn test_tick_main_resets_sub() {
        let handle = ProgressHandle::new();
        handle.start(2);
        handle.tick_main("a");
        handle.start_sub(10);
        handle.tick_sub("x");
        assert_eq!(handle.snapshot().sub_progress, 1);

        handle.tick_main("b");
        let snap = handle.snapshot();
        assert_eq!(snap.sub_count, 0);
        assert_eq!(snap.sub_progress, 0);

        handle.finish();
        assert!(!handle.snapshot().running);
    }
}
