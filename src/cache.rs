//! The shared, process-wide bounded LRU cache over parsed
//! template trees and compiled code fragments.
//!
//! A `Lazy<Mutex<...>>` global, same shape as a plain regex/split cache,
//! but backed by the `lru` crate so table size can actually be bounded
//! and trimmed, which a bare `HashMap` cannot give us.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::fragment::CompiledFragment;
use crate::ir::Node;

const DEFAULT_HIGHWATER: usize = 10_000;
const DEFAULT_LOWWATER: usize = 5_000;

/// Cache key for a parsed template tree: content fingerprint of the raw
/// source bytes.
pub type TemplateKey = u64;

/// Cache key for a compiled fragment: `(hash(source), namespace)`
///.
pub type FragmentKey = (u64, String);

fn huge_cap() -> NonZeroUsize {
    // lru::LruCache requires a nonzero capacity; the table is actually
    // bounded by our own watermark logic in `trim_locked`, not by the
    // crate's internal cap, so this is just "large enough to never be
    // the limiting factor" for the watermark defaults above.
    NonZeroUsize::new(1 << 20).unwrap()
}

struct Table<V> {
    lru: Mutex<LruCache<u64, V>>,
}

impl<V: Clone> Table<V> {
    fn new() -> Self {
        Table {
            lru: Mutex::new(LruCache::new(huge_cap())),
        }
    }

    /// Returns the cached or freshly built value, plus whether the call
    /// was a cache hit (used by callers to feed `Tracer::trace_cache_hit`
    /// / `trace_cache_miss`).
    fn get_or_insert(&self, key: u64, build: impl FnOnce() -> V, high: usize, low: usize) -> (V, bool) {
        {
            let mut guard = self.lru.lock();
            if let Some(v) = guard.get(&key) {
                return (v.clone(), true);
            }
        }
        let value = build();
        let mut guard = self.lru.lock();
        guard.put(key, value.clone());
        Self::trim_locked(&mut guard, high, low);
        (value, false)
    }

    fn trim_locked(guard: &mut LruCache<u64, V>, high: usize, low: usize) {
        // Trim once the table *reaches* the high watermark, not merely
        // exceeds it, then pop down to the low watermark.
        if guard.len() >= high {
            while guard.len() > low {
                guard.pop_lru();
            }
        }
    }

    fn trim(&self, high: usize, low: usize) {
        let mut guard = self.lru.lock();
        Self::trim_locked(&mut guard, high, low);
    }

    fn clear(&self) {
        self.lru.lock().clear();
    }

    fn len(&self) -> usize {
        self.lru.lock().len()
    }
}

/// The process-wide cache: two independent tables sharing one
/// high-/low-watermark pair.
pub struct Cache {
    templates: Table<Arc<Vec<Node>>>,
    fragments: Table<Arc<CompiledFragment>>,
    highwater: AtomicUsize,
    lowwater: AtomicUsize,
}

impl Cache {
    fn new() -> Self {
        Cache {
            templates: Table::new(),
            fragments: Table::new(),
            highwater: AtomicUsize::new(DEFAULT_HIGHWATER),
            lowwater: AtomicUsize::new(DEFAULT_LOWWATER),
        }
    }

    fn watermarks(&self) -> (usize, usize) {
        (
            self.highwater.load(Ordering::Relaxed),
            self.lowwater.load(Ordering::Relaxed),
        )
    }

    /// Returns `(tree, hit)`.
    pub fn get_or_insert_template(
        &self,
        key: TemplateKey,
        build: impl FnOnce() -> Arc<Vec<Node>>,
    ) -> (Arc<Vec<Node>>, bool) {
        let (high, low) = self.watermarks();
        self.templates.get_or_insert(key, build, high, low)
    }

    /// Returns `(fragment, hit)`.
    pub fn get_or_insert_fragment(
        &self,
        key: &FragmentKey,
        build: impl FnOnce() -> Arc<CompiledFragment>,
    ) -> (Arc<CompiledFragment>, bool) {
        let (high, low) = self.watermarks();
        let hashed = fragment_key_hash(key);
        self.fragments.get_or_insert(hashed, build, high, low)
    }

    pub fn highwatermark(&self) -> usize {
        self.highwater.load(Ordering::Relaxed)
    }

    pub fn set_highwatermark(&self, v: usize) {
        self.highwater.store(v, Ordering::Relaxed);
        let (high, low) = self.watermarks();
        self.templates.trim(high, low);
        self.fragments.trim(high, low);
    }

    pub fn lowwatermark(&self) -> usize {
        self.lowwater.load(Ordering::Relaxed)
    }

    pub fn set_lowwatermark(&self, v: usize) {
        self.lowwater.store(v, Ordering::Relaxed);
        let (high, low) = self.watermarks();
        self.templates.trim(high, low);
        self.fragments.trim(high, low);
    }

    pub fn clear_all(&self) {
        self.templates.clear();
        self.fragments.clear();
    }

    pub fn sizes(&self) -> (usize, usize) {
        (self.templates.len(), self.fragments.len())
    }
}

fn fragment_key_hash(key: &FragmentKey) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut h);
    h.finish()
}

pub fn content_hash(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut h);
    h.finish()
}

/// The single process-wide cache instance.
pub static GLOBAL_CACHE: Lazy<Cache> = Lazy::new(Cache::new);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn trims_to_lowwater_on_overflow() {
        let cache = Cache::new();
        cache.set_highwatermark(3);
        cache.set_lowwatermark(1);
        for i in 0..4u64 {
            cache.get_or_insert_template(i, || Arc::new(vec![]));
        }
        assert_eq!(cache.sizes().0, 2);
    }

    #[test]
    fn hit_returns_without_rebuilding() {
        let cache = Cache::new();
        let calls = StdAtomicUsize::new(0);
        let mut hits = 0;
        for _ in 0..5 {
            let (_, hit) = cache.get_or_insert_template(1, || {
                calls.fetch_add(1, Ordering::Relaxed);
                Arc::new(vec![])
            });
            if hit {
                hits += 1;
            }
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(hits, 4);
    }
}
