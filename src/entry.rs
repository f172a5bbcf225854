//! Archive-member metadata records.
//!
//! A [`FileEntry`] is the filecache value: everything the read paths need
//! to serve a virtual path without re-walking archive headers. Entries are
//! immutable once resolved; per-open readers work on value clones so that
//! cache invalidation never pulls state out from under an in-flight read.

use bitflags::bitflags;

use crate::volume::VolumeScheme;

/// Compression method byte for store mode (no compression).
pub const METHOD_STORE: u8 = 0x30;

bitflags! {
    /// Lifecycle and classification bits of a member entry.
    ///
    /// The bit positions are stable; [`FileEntry::cache_flags_be`] exposes
    /// the raw set big-endian through the xattr surface, so renumbering
    /// bits is a wire-format change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u32 {
        /// Stored uncompressed; directly readable from volume files.
        const RAW = 1 << 0;
        /// Member payload spans more than one volume.
        const MULTIPART = 1 << 1;
        /// Extension matches the configured image set.
        const IMAGE = 1 << 2;
        /// Surfaced under an `.iso` alias name.
        const FAKE_ISO = 1 << 3;
        /// Synthetic directory; replaced when a real header arrives.
        const FORCE_DIR = 1 << 6;
        /// RAR5 volume number lives in the header; the two-byte form past
        /// volume 127 needs off-by-one compensation.
        const VSIZE_FIXUP = 1 << 7;
        /// Payload is password protected.
        const ENCRYPTED = 1 << 8;
        /// Next-volume size not yet confirmed by a later header.
        const UNRESOLVED = 1 << 9;
        /// Access-time updates requested for the backing archive.
        const CHECK_ATIME = 1 << 10;
        /// The wrong-password/CRC dry run already ran for this entry.
        const DRY_RUN_DONE = 1 << 11;
        /// Kernel cache bypass latched after fake data was served.
        const DIRECT_IO = 1 << 29;
        /// The AVI coherence check already ran for this entry.
        const AVI_TESTED = 1 << 30;
        /// Produce an EOF index on the first near-end probe.
        const SAVE_EOF = 1 << 31;
    }
}

/// Synthesised POSIX metadata of a virtual entry.
///
/// Directories inside an archive get `0777 & !umask` and size 4096;
/// symlinks get the target length as size. All fields are plain values,
/// ready for the binding to copy into a `struct stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryStat {
    /// File mode including the type bits (`S_IFREG`, `S_IFDIR`, ...).
    pub mode: u32,
    /// Owner; always the mounting user.
    pub uid: u32,
    /// Group; always the mounting user's group.
    pub gid: u32,
    /// Link count (1 for files, 2 for directories).
    pub nlink: u32,
    /// Apparent size in bytes.
    pub size: u64,
    /// Access time, unix seconds.
    pub atime: i64,
    /// Modification time, unix seconds.
    pub mtime: i64,
    /// Status-change time, unix seconds.
    pub ctime: i64,
}

/// File-type bits, kept explicit to avoid a libc dependency.
pub const S_IFMT: u32 = 0o170000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040000;
/// Symbolic link type bits.
pub const S_IFLNK: u32 = 0o120000;

impl EntryStat {
    /// Returns `true` if the mode describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Returns `true` if the mode describes a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Builds the stat of a synthesised in-archive directory.
    pub fn synthetic_dir(uid: u32, gid: u32, umask: u32, mtime: i64) -> Self {
        Self {
            mode: S_IFDIR | (0o777 & !umask),
            uid,
            gid,
            nlink: 2,
            size: 4096,
            atime: mtime,
            mtime,
            ctime: mtime,
        }
    }
}

/// Position of a member inside its multi-volume set.
///
/// All sizes and indices mirror what the enumerator extracted from the
/// headers; the raw read path turns logical offsets into `(volume,
/// physical offset)` pairs with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeExtent {
    /// Payload bytes contributed by the first volume holding the member.
    pub vsize_first: u64,
    /// Payload bytes contributed by each subsequent volume.
    pub vsize_next: u64,
    /// End-of-file-data offset inside the first volume.
    pub vsize_real_first: u64,
    /// End-of-file-data offset inside subsequent volumes.
    pub vsize_real_next: u64,
    /// Volume index (0-based) of the archive path itself.
    pub vno_base: u32,
    /// Volume index (0-based) holding the member's first byte.
    pub vno_first: u32,
    /// Length of the numeric field inside the volume filename.
    pub vlen: usize,
    /// Position of the numeric field inside the volume filename.
    pub vpos: usize,
}

/// An archive member as seen through the mount.
///
/// `name` is the unique virtual path; `archive_path` points at the first
/// volume in which the member occurs, which is also the volume whose
/// directory anchors parent resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Virtual path, rooted at the mount point.
    pub name: String,
    /// Absolute path of the first volume file containing this member.
    pub archive_path: std::path::PathBuf,
    /// Name of the member inside the archive headers.
    pub member_name: String,
    /// Symlink target, present iff the member is a symlink.
    pub link_target: Option<String>,
    /// Synthesised POSIX metadata.
    pub stat: EntryStat,
    /// crc32 of the parent directory's virtual path, for cheap
    /// prefix invalidation.
    pub dir_hash: u32,
    /// Byte offset of the payload inside `archive_path` (raw mode only).
    pub offset: u64,
    /// RAR compression method byte; `0x30` is store.
    pub method: u8,
    /// Multi-volume layout, meaningful when `MULTIPART` is set.
    pub extent: VolumeExtent,
    /// Volume filename numbering scheme.
    pub vtype: VolumeScheme,
    /// For members of a nested archive: the enclosing member's name
    /// inside `archive_path`.
    pub nested_in: Option<String>,
    /// Classification and lifecycle bits.
    pub flags: EntryFlags,
}

impl FileEntry {
    /// Creates an empty entry for the given virtual path.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let dir_hash = parent_dir_hash(&name);
        Self {
            name,
            archive_path: std::path::PathBuf::new(),
            member_name: String::new(),
            link_target: None,
            stat: EntryStat::default(),
            dir_hash,
            offset: 0,
            method: METHOD_STORE,
            extent: VolumeExtent::default(),
            vtype: VolumeScheme::New,
            nested_in: None,
            flags: EntryFlags::empty(),
        }
    }

    /// Returns `true` if the member can be served by the raw read path.
    pub fn is_raw(&self) -> bool {
        self.flags.contains(EntryFlags::RAW)
    }

    /// Returns `true` if the member spans multiple volumes.
    pub fn is_multipart(&self) -> bool {
        self.flags.contains(EntryFlags::MULTIPART)
    }

    /// The compression method, big-endian, as exposed through
    /// `user.rarfs.cache_method`.
    pub fn cache_method_be(&self) -> [u8; 2] {
        (self.method as u16).to_be_bytes()
    }

    /// The flag set, big-endian, as exposed through
    /// `user.rarfs.cache_flags`.
    pub fn cache_flags_be(&self) -> [u8; 4] {
        self.flags.bits().to_be_bytes()
    }
}

/// crc32 of the parent directory component of a virtual path.
pub fn parent_dir_hash(path: &str) -> u32 {
    let parent = match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    };
    crc32fast::hash(parent.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits_are_stable() {
        assert_eq!(EntryFlags::RAW.bits(), 0x1);
        assert_eq!(EntryFlags::MULTIPART.bits(), 0x2);
        assert_eq!(EntryFlags::FORCE_DIR.bits(), 0x40);
        assert_eq!(EntryFlags::ENCRYPTED.bits(), 0x100);
        assert_eq!(EntryFlags::SAVE_EOF.bits(), 0x8000_0000);
    }

    #[test]
    fn test_xattr_encodings_are_big_endian() {
        let mut entry = FileEntry::new("/arc/file.bin");
        entry.method = 0x33;
        entry.flags = EntryFlags::RAW | EntryFlags::MULTIPART;
        assert_eq!(entry.cache_method_be(), [0x00, 0x33]);
        assert_eq!(entry.cache_flags_be(), [0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_synthetic_dir_stat() {
        let st = EntryStat::synthetic_dir(1000, 1000, 0o022, 1234);
        assert!(st.is_dir());
        assert_eq!(st.mode & 0o777, 0o755);
        assert_eq!(st.size, 4096);
        assert_eq!(st.nlink, 2);
    }

    #[test]
    fn test_parent_dir_hash_groups_siblings() {
        let a = FileEntry::new("/dir/a.txt");
        let b = FileEntry::new("/dir/b.txt");
        let c = FileEntry::new("/other/c.txt");
        assert_eq!(a.dir_hash, b.dir_hash);
        assert_ne!(a.dir_hash, c.dir_hash);
        assert_eq!(parent_dir_hash("/top"), crc32fast::hash(b"/"));
    }
}
