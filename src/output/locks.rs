//! Path-keyed exclusive locks for output artifacts

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hands out one mutex per output path.
///
/// Writers hold the guard for the whole read-merge-write cycle of a file, so
/// concurrent merges into the same artifact are serialized while merges into
/// different artifacts proceed in parallel.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `path`, created on first use
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = normalize(path);
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key).or_default())
    }

    /// Run `f` while holding the lock for `path`
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(path);
        let _guard: MutexGuard<'_, ()> = lock.lock();
        f()
    }

    /// Number of distinct paths seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Absolute form of a path so `out/a.json` and `./out/a.json` share a lock
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_path_shares_lock() {
        let registry = LockRegistry::new();
        let a = registry.lock_for(Path::new("out/test-raw.json"));
        let b = registry.lock_for(Path::new("./out/test-raw.json"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        let c = registry.lock_for(Path::new("out/lint-raw.json"));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_with_lock_serializes_writers() {
        let registry = Arc::new(LockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    registry.with_lock(Path::new("shared.csv"), || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
