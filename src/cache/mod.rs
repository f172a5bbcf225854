//! The two-level path cache.
//!
//! [`filecache`] maps virtual paths to archive-member metadata;
//! [`dircache`] maps directory paths to their populated listings.
//! Both are process-wide, shared through the engine handle, and writers
//! exclude readers; per-open readers take value clones out and never
//! hold a lock across I/O.

pub mod dircache;
pub mod dirlist;
pub mod filecache;

pub use dircache::{DirCache, DirLookup};
pub use dirlist::{DirList, EntrySource, ListedEntry};
pub use filecache::{FileCache, PathResolution};
