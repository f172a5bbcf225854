//! Ordered, de-duplicated directory listings.
//!
//! A listing is appended to while a directory is being scanned, then
//! closed: closing sorts the entries byte-wise and resolves name
//! collisions. A collision between a native filesystem entry and an
//! archive member is always won by the native entry, so a real file
//! masks an archive member of the same name.

use crate::entry::EntryStat;

/// Where a listed entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntrySource {
    /// The underlying directory itself.
    Local,
    /// An enumerated archive.
    Archive,
}

/// One row of a directory listing.
#[derive(Debug, Clone)]
pub struct ListedEntry {
    /// Entry name (no directory components).
    pub name: String,
    /// Metadata, when the producer had it at hand.
    pub stat: Option<EntryStat>,
    /// Listing source, used for duplicate resolution.
    pub source: EntrySource,
    hash: u32,
    valid: bool,
}

/// Append-mostly listing with sort-and-dedup on close.
#[derive(Debug, Clone, Default)]
pub struct DirList {
    entries: Vec<ListedEntry>,
    closed: bool,
}

impl DirList {
    /// Creates an empty, open listing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    ///
    /// A consecutive duplicate of the previous append is dropped
    /// immediately; non-adjacent duplicates are resolved at close.
    pub fn add(&mut self, name: &str, stat: Option<EntryStat>, source: EntrySource) {
        debug_assert!(!self.closed);
        let hash = crc32fast::hash(name.as_bytes());
        if let Some(last) = self.entries.last() {
            if last.hash == hash && last.name == name {
                return;
            }
        }
        self.entries.push(ListedEntry {
            name: name.to_string(),
            stat,
            source,
            hash,
            valid: true,
        });
    }

    /// Sorts and de-duplicates the listing.
    ///
    /// Duplicates keep the first entry in `(name, source)` order, which
    /// places `Local` before `Archive`; the losing entry is marked
    /// invalid and skipped on iteration.
    pub fn close(&mut self) {
        self.entries
            .sort_by(|a, b| a.name.cmp(&b.name).then(a.source.cmp(&b.source)));
        let mut keeper = 0usize;
        for i in 1..self.entries.len() {
            if self.entries[i].hash == self.entries[keeper].hash
                && self.entries[i].name == self.entries[keeper].name
            {
                self.entries[i].valid = false;
            } else {
                keeper = i;
            }
        }
        self.closed = true;
    }

    /// Iterates the surviving entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ListedEntry> {
        self.entries.iter().filter(|e| e.valid)
    }

    /// Names of all surviving entries.
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|e| e.name.clone()).collect()
    }

    /// Number of surviving entries.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if no entry survived.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_on_close() {
        let mut list = DirList::new();
        list.add("zeta", None, EntrySource::Archive);
        list.add("alpha", None, EntrySource::Local);
        list.add("mid", None, EntrySource::Archive);
        list.close();
        assert_eq!(list.names(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_local_masks_archive_duplicate() {
        let mut list = DirList::new();
        list.add("file.txt", None, EntrySource::Archive);
        list.add("other", None, EntrySource::Local);
        list.add("file.txt", None, EntrySource::Local);
        list.close();

        assert_eq!(list.len(), 2);
        let survivor = list.iter().find(|e| e.name == "file.txt").unwrap();
        assert_eq!(survivor.source, EntrySource::Local);
    }

    #[test]
    fn test_consecutive_duplicate_dropped_on_add() {
        let mut list = DirList::new();
        list.add("a", None, EntrySource::Archive);
        list.add("a", None, EntrySource::Archive);
        list.close();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_archive_duplicates_collapse() {
        let mut list = DirList::new();
        list.add("dir", None, EntrySource::Archive);
        list.add("x", None, EntrySource::Archive);
        list.add("dir", None, EntrySource::Archive);
        list.close();
        assert_eq!(list.names(), vec!["dir", "x"]);
    }

    #[test]
    fn test_triple_duplicate_keeps_one() {
        let mut list = DirList::new();
        list.add("x", None, EntrySource::Local);
        list.add("y", None, EntrySource::Archive);
        list.add("x", None, EntrySource::Archive);
        list.add("z", None, EntrySource::Archive);
        list.add("x", None, EntrySource::Archive);
        list.close();
        assert_eq!(list.names(), vec!["x", "y", "z"]);
        assert_eq!(
            list.iter().find(|e| e.name == "x").unwrap().source,
            EntrySource::Local
        );
    }

    #[test]
    fn test_empty_listing() {
        let mut list = DirList::new();
        list.close();
        assert!(list.is_empty());
        assert!(list.names().is_empty());
    }
}
