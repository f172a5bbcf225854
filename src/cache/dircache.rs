//! Directory-listing cache with freshness validation.
//!
//! Each cached listing remembers the backing directory's modification
//! time at population. A lookup re-reads the current mtime at full
//! resolution; any difference means the directory changed behind the
//! mount, so the entry is evicted and the caller must re-enumerate (and
//! drop the filecache entries of the listed children, which the stale
//! result hands back for exactly that purpose).
//!
//! The cache is bounded to [`DIRCACHE_CAPACITY`] directories with
//! least-recently-used eviction.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use filetime::FileTime;
use lru::LruCache;

use super::dirlist::DirList;

/// Maximum number of directories kept cached.
pub const DIRCACHE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct CachedDir {
    list: DirList,
    mtime: FileTime,
}

/// Outcome of a dircache lookup.
#[derive(Debug)]
pub enum DirLookup {
    /// The cached listing is still fresh.
    Hit(DirList),
    /// The backing directory changed; the entry was evicted. Carries the
    /// names of the previously listed children so the caller can
    /// invalidate their filecache entries.
    Stale(Vec<String>),
    /// Nothing cached for this path.
    Miss,
}

/// Bounded path → listing cache.
#[derive(Debug)]
pub struct DirCache {
    inner: Mutex<LruCache<String, CachedDir>>,
}

impl Default for DirCache {
    fn default() -> Self {
        Self::with_capacity(DIRCACHE_CAPACITY)
    }
}

impl DirCache {
    /// Creates a cache with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache bounded to `capacity` directories.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Reads the current full-resolution mtime of a directory.
    pub fn probe_mtime(backing: &Path) -> Option<FileTime> {
        let meta = std::fs::metadata(backing).ok()?;
        Some(FileTime::from_last_modification_time(&meta))
    }

    /// Looks up `path`, validating against the backing directory.
    pub fn lookup(&self, path: &str, backing: &Path) -> DirLookup {
        let current = Self::probe_mtime(backing);
        let mut inner = self.inner.lock().unwrap();
        let fresh = match inner.get(path) {
            None => return DirLookup::Miss,
            Some(cached) => Some(cached.mtime) == current,
        };
        if fresh {
            DirLookup::Hit(inner.get(path).unwrap().list.clone())
        } else {
            let cached = inner.pop(path).unwrap();
            DirLookup::Stale(cached.list.names())
        }
    }

    /// Stores a freshly populated listing.
    ///
    /// `mtime` must be the backing directory's mtime read *before* the
    /// population walk started, so that concurrent modification makes
    /// the entry stale rather than silently current.
    pub fn insert(&self, path: &str, list: DirList, mtime: FileTime) {
        self.inner
            .lock()
            .unwrap()
            .put(path.to_string(), CachedDir { list, mtime });
    }

    /// Drops a single directory.
    pub fn invalidate(&self, path: &str) {
        self.inner.lock().unwrap().pop(path);
    }

    /// Drops every cached listing.
    pub fn invalidate_all(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Number of cached listings.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
