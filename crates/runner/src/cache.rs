//! Per-exercise toolchain reuse with sliding idle eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::toolchain::Toolchain;

/// A cached toolchain plus the lock serializing Prep/Build on it.
pub struct CachedToolchain {
    toolchain: Arc<dyn Toolchain>,
    build_lock: tokio::sync::Mutex<()>,
}

impl CachedToolchain {
    pub fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    /// Held for the whole Prep -> Build sequence. Eviction skips an entry
    /// whose lock is taken.
    pub async fn lock_build(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.build_lock.lock().await
    }
}

struct Entry {
    cached: Arc<CachedToolchain>,
    /// Bumped on every access; a timer only evicts the generation it was armed for.
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    idle: Duration,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values() {
            entry.timer.abort();
        }
    }
}

#[derive(Clone)]
pub struct ToolchainCache {
    inner: Arc<Inner>,
}

impl ToolchainCache {
    pub fn new(idle: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                idle,
            }),
        }
    }

    /// Hit: restart the entry's idle timer and return it.
    pub fn load(&self, key: &str) -> Option<Arc<CachedToolchain>> {
        let mut entries = self.inner.entries();
        let entry = entries.get_mut(key)?;
        self.rearm(key, entry);
        Some(entry.cached.clone())
    }

    /// Insert `toolchain` under `key` and start its timer. If another caller
    /// won the race for the same key, its entry is returned instead (and its
    /// timer restarted); `toolchain` has not touched disk yet and is dropped.
    pub fn add(&self, key: &str, toolchain: Arc<dyn Toolchain>) -> Arc<CachedToolchain> {
        let mut entries = self.inner.entries();
        if let Some(entry) = entries.get_mut(key) {
            self.rearm(key, entry);
            return entry.cached.clone();
        }

        let cached = Arc::new(CachedToolchain {
            toolchain,
            build_lock: tokio::sync::Mutex::new(()),
        });
        let timer = self.spawn_timer(key.to_string(), cached.clone(), 0);
        entries.insert(
            key.to_string(),
            Entry {
                cached: cached.clone(),
                generation: 0,
                timer,
            },
        );
        debug!(key, "toolchain cached");
        cached
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and clean its workspace. Used at shutdown.
    pub async fn clear(&self) {
        let drained: Vec<(String, Entry)> = self.inner.entries().drain().collect();
        for (key, entry) in drained {
            entry.timer.abort();
            let _guard = entry.cached.lock_build().await;
            if let Err(e) = entry.cached.toolchain().clean().await {
                warn!(key = %key, error = %e, "toolchain cleanup failed");
            }
        }
    }

    fn rearm(&self, key: &str, entry: &mut Entry) {
        entry.timer.abort();
        entry.generation += 1;
        entry.timer = self.spawn_timer(key.to_string(), entry.cached.clone(), entry.generation);
    }

    fn spawn_timer(
        &self,
        key: String,
        cached: Arc<CachedToolchain>,
        generation: u64,
    ) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let idle = self.inner.idle;
        // Deadline is fixed now, not when the task is first polled.
        let deadline = Instant::now() + idle;
        tokio::spawn(evict_when_idle(inner, key, cached, generation, deadline, idle))
    }
}

enum Eviction<'a> {
    /// The entry was accessed, replaced, or removed since this timer was armed.
    Stale,
    /// A build holds the lock; try again after another idle interval.
    Busy,
    /// Removed from the map; the guard keeps builds out while cleaning.
    Evicted(tokio::sync::MutexGuard<'a, ()>),
}

fn try_evict<'a>(
    inner: &Inner,
    key: &str,
    cached: &'a Arc<CachedToolchain>,
    generation: u64,
) -> Eviction<'a> {
    let mut entries = inner.entries();
    let current = entries
        .get(key)
        .is_some_and(|e| e.generation == generation && Arc::ptr_eq(&e.cached, cached));
    if !current {
        return Eviction::Stale;
    }
    match cached.build_lock.try_lock() {
        Ok(guard) => {
            entries.remove(key);
            Eviction::Evicted(guard)
        }
        Err(_) => Eviction::Busy,
    }
}

async fn evict_when_idle(
    inner: Weak<Inner>,
    key: String,
    cached: Arc<CachedToolchain>,
    generation: u64,
    mut deadline: Instant,
    idle: Duration,
) {
    let guard = loop {
        tokio::time::sleep_until(deadline).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match try_evict(&inner, &key, &cached, generation) {
            Eviction::Stale => return,
            Eviction::Busy => {
                debug!(key = %key, "toolchain busy, postponing eviction");
                deadline = Instant::now() + idle;
            }
            Eviction::Evicted(guard) => break guard,
        }
    };

    info!(key = %key, workspace = %cached.toolchain().workspace().display(), "evicting idle toolchain");
    if let Err(e) = cached.toolchain().clean().await {
        warn!(key = %key, error = %e, "toolchain cleanup failed");
    }
    drop(guard);
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use box_common::SourceBundle;

    use super::*;
    use crate::toolchain::{BuildOutcome, ToolchainError};

    const IDLE: Duration = Duration::from_secs(600);

    /// Workspace is a real directory so eviction is observable on disk.
    struct DirToolchain {
        root: PathBuf,
        cleaned: Arc<AtomicUsize>,
        clean_done: Arc<tokio::sync::Notify>,
    }

    impl DirToolchain {
        fn new(root: PathBuf) -> (Arc<Self>, Arc<AtomicUsize>, Arc<tokio::sync::Notify>) {
            std::fs::create_dir_all(&root).unwrap();
            let cleaned = Arc::new(AtomicUsize::new(0));
            let done = Arc::new(tokio::sync::Notify::new());
            let tc = Arc::new(Self {
                root,
                cleaned: cleaned.clone(),
                clean_done: done.clone(),
            });
            (tc, cleaned, done)
        }
    }

    #[async_trait]
    impl Toolchain for DirToolchain {
        fn language(&self) -> &str {
            "fake"
        }

        fn workspace(&self) -> &Path {
            &self.root
        }

        async fn prep(&self, _: &SourceBundle) -> Result<(), ToolchainError> {
            Ok(())
        }

        async fn build(&self, _: &SourceBundle) -> Result<BuildOutcome, ToolchainError> {
            Ok(BuildOutcome::Success { binary: Vec::new() })
        }

        async fn clean(&self) -> Result<(), ToolchainError> {
            std::fs::remove_dir_all(&self.root).ok();
            self.cleaned.fetch_add(1, Ordering::SeqCst);
            self.clean_done.notify_one();
            Ok(())
        }
    }

    /// Let spawned timer tasks observe the current (paused) clock.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn miss_then_hit_returns_same_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(IDLE);
        assert!(cache.load("ex").is_none());

        let (tc, _, _) = DirToolchain::new(dir.path().join("ex"));
        let added = cache.add("ex", tc);
        let loaded = cache.load("ex").unwrap();
        assert!(Arc::ptr_eq(&added, &loaded));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn add_for_existing_key_returns_winner() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(IDLE);
        let (first, _, _) = DirToolchain::new(dir.path().join("a"));
        let (second, _, _) = DirToolchain::new(dir.path().join("b"));

        let a = cache.add("ex", first);
        let b = cache.add("ex", second);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.toolchain().workspace(), dir.path().join("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn accessed_within_interval_is_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(IDLE);
        let (tc, cleaned, _) = DirToolchain::new(dir.path().join("ex"));
        cache.add("ex", tc);

        for _ in 0..6 {
            tokio::time::advance(IDLE - Duration::from_secs(1)).await;
            settle().await;
            assert!(cache.load("ex").is_some());
        }
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("ex").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entry_is_evicted_and_workspace_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(IDLE);
        let (tc, cleaned, done) = DirToolchain::new(dir.path().join("ex"));
        cache.add("ex", tc);

        tokio::time::advance(IDLE + Duration::from_secs(1)).await;
        done.notified().await;

        assert!(cache.load("ex").is_none());
        assert!(cache.is_empty());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("ex").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_waits_for_running_build() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(IDLE);
        let (tc, cleaned, done) = DirToolchain::new(dir.path().join("ex"));
        let cached = cache.add("ex", tc);

        let guard = cached.lock_build().await;
        tokio::time::advance(IDLE + Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 1);

        drop(guard);
        tokio::time::advance(IDLE).await;
        done.notified().await;
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cleans_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolchainCache::new(IDLE);
        let (a, a_cleaned, _) = DirToolchain::new(dir.path().join("a"));
        let (b, b_cleaned, _) = DirToolchain::new(dir.path().join("b"));
        cache.add("a", a);
        cache.add("b", b);

        cache.clear().await;
        assert!(cache.is_empty());
        assert_eq!(a_cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(b_cleaned.load(Ordering::SeqCst), 1);
    }
}
