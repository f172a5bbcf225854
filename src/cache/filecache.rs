//! Virtual path to archive-member resolution cache.
//!
//! The filecache answers "what is behind this path": an archive member
//! (with its full [`FileEntry`] metadata), a plain file of the underlying
//! directory, or the mount point itself seen through the source tree (a
//! self-loop that must never be descended into).
//!
//! A single read/write lock protects the table. Readers that need the
//! entry beyond the lookup clone the `Arc` out; invalidation drops the
//! table reference while in-flight reads keep working on their clone.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::entry::{FileEntry, parent_dir_hash};

/// What a virtual path resolves to.
#[derive(Debug, Clone)]
pub enum PathResolution {
    /// An archive member with resolved metadata.
    Archive(Arc<FileEntry>),
    /// The path exists in the underlying directory, not in any archive.
    Local,
    /// The path would re-enter the mount point (source contains the
    /// mount); resolving it further would loop.
    Loop,
}

impl PathResolution {
    /// Returns the archive entry, if this resolution is one.
    pub fn archive(&self) -> Option<&Arc<FileEntry>> {
        match self {
            PathResolution::Archive(e) => Some(e),
            _ => None,
        }
    }
}

/// Thread-safe path → resolution map.
#[derive(Debug, Default)]
pub struct FileCache {
    map: RwLock<HashMap<String, PathResolution>>,
}

impl FileCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a path up, cloning the resolution out of the lock.
    pub fn resolve(&self, path: &str) -> Option<PathResolution> {
        self.map.read().unwrap().get(path).cloned()
    }

    /// Looks up an archive entry, skipping the sentinels.
    pub fn get(&self, path: &str) -> Option<Arc<FileEntry>> {
        match self.resolve(path)? {
            PathResolution::Archive(e) => Some(e),
            _ => None,
        }
    }

    /// Inserts or replaces an archive entry.
    pub fn insert(&self, entry: FileEntry) -> Arc<FileEntry> {
        let arc = Arc::new(entry);
        self.map
            .write()
            .unwrap()
            .insert(arc.name.clone(), PathResolution::Archive(arc.clone()));
        arc
    }

    /// Marks a path as living on the underlying filesystem.
    pub fn insert_local(&self, path: &str) {
        self.map
            .write()
            .unwrap()
            .insert(path.to_string(), PathResolution::Local);
    }

    /// Marks a path as a mount-point self-loop.
    pub fn insert_loop(&self, path: &str) {
        self.map
            .write()
            .unwrap()
            .insert(path.to_string(), PathResolution::Loop);
    }

    /// Replaces an entry only while the current occupant satisfies
    /// `permit` (or the slot is empty). Returns the entry now in place.
    ///
    /// The enumerator uses this to let real headers overwrite synthetic
    /// force-dir entries but never the other way around.
    pub fn insert_if<F>(&self, entry: FileEntry, permit: F) -> Arc<FileEntry>
    where
        F: Fn(&PathResolution) -> bool,
    {
        let mut map = self.map.write().unwrap();
        if let Some(existing) = map.get(&entry.name) {
            if !permit(existing) {
                // Keep the occupant; hand back whichever entry now
                // answers for the path.
                return match existing {
                    PathResolution::Archive(e) => e.clone(),
                    _ => Arc::new(entry),
                };
            }
        }
        let arc = Arc::new(entry);
        map.insert(arc.name.clone(), PathResolution::Archive(arc.clone()));
        arc
    }

    /// Copies a source entry's metadata under a new virtual path.
    ///
    /// Used for filecopy redirects and configured aliases: the copy
    /// shares everything but its name (and the parent hash derived
    /// from it).
    pub fn copy(&self, src: &FileEntry, dst: &str) -> Arc<FileEntry> {
        let mut copy = src.clone();
        copy.name = dst.to_string();
        copy.dir_hash = parent_dir_hash(dst);
        self.insert(copy)
    }

    /// Archive entries whose parent directory is `dir`, in no
    /// particular order.
    pub fn children_of(&self, dir: &str) -> Vec<Arc<FileEntry>> {
        let hash = crc32fast::hash(dir.as_bytes());
        self.map
            .read()
            .unwrap()
            .iter()
            .filter_map(|(path, res)| match res {
                PathResolution::Archive(e)
                    if e.dir_hash == hash && parent_of(path) == dir =>
                {
                    Some(e.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Removes a single path.
    pub fn invalidate(&self, path: &str) {
        self.map.write().unwrap().remove(path);
    }

    /// Removes a directory and everything beneath it.
    pub fn invalidate_prefix(&self, dir: &str) {
        let hash = crc32fast::hash(dir.as_bytes());
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        self.map.write().unwrap().retain(|path, res| {
            if path == dir || path.starts_with(&prefix) {
                return false;
            }
            // Direct children carry the parent hash even when the path
            // prefix check is bypassed by a sentinel entry.
            if let PathResolution::Archive(e) = res {
                if e.dir_hash == hash && parent_of(path) == dir {
                    return false;
                }
            }
            true
        });
    }

    /// Drops every cached resolution.
    pub fn invalidate_all(&self) {
        self.map.write().unwrap().clear();
    }

    /// Number of cached resolutions.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}
