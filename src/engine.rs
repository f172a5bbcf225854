//! The engine handle.
//!
//! [`Engine`] owns the shared state of one mount — the filecache, the
//! dircache, the options and the decoder — and exposes the operations
//! the filesystem binding calls: `getattr`, `readdir`, `readlink`,
//! `open`, `read`, `release`, plus the invalidation hooks the signal
//! handlers drive. There are no process-wide tables; everything hangs
//! off this handle.
//!
//! Two mount shapes exist. A *folder mount* overlays a source
//! directory: local entries pass through, archives found in each
//! directory are enumerated on demand and their members spliced into
//! listings (a real file always masks an archive member of the same
//! name). An *archive mount* exposes a single archive's contents,
//! enumerated once at construction; failure to resolve the archive's
//! first volume there is fatal.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::archive::decoder::{ArchiveSource, Decoder, MemberHeader};
use crate::archive::enumerate::{Enumerator, is_archive_candidate};
use crate::archive::nested::nested_view;
use crate::cache::dircache::{DirCache, DirLookup};
use crate::cache::dirlist::{DirList, EntrySource};
use crate::cache::filecache::{FileCache, PathResolution};
use crate::entry::{EntryFlags, EntryStat, FileEntry, S_IFREG};
use crate::error::{Error, Result};
use crate::options::{Options, OverrideTable};
use crate::read::info::InfoReader;
use crate::read::rar::{RarOpenContext, RarReader};
use crate::read::raw::RawReader;
use crate::stream::extractor::dry_run;
use crate::volume::{VolumeScheme, parse};

/// Suffix turning any member path into its descriptor path.
pub const INFO_SUFFIX: &str = "#info";

/// What a mount is rooted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountType {
    /// A source directory whose archives are expanded in place.
    Folder,
    /// A single archive file.
    Archive,
}

/// A per-open file handle.
pub enum Handle {
    /// Passthrough to a file of the underlying directory.
    Local(File),
    /// Store-mode member read straight from volume files.
    Raw(RawReader),
    /// Compressed member read through the extractor pipeline.
    Rar(Box<RarReader>),
    /// Synthetic `#info` descriptor.
    Info(InfoReader),
    /// A directory (no reads).
    Dir,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Handle::Local(_) => "Local",
            Handle::Raw(_) => "Raw",
            Handle::Rar(_) => "Rar",
            Handle::Info(_) => "Info",
            Handle::Dir => "Dir",
        };
        f.debug_tuple(variant).finish()
    }
}

impl Handle {
    /// Whether the binding should bypass the kernel page cache for
    /// this open.
    pub fn wants_direct_io(&self) -> bool {
        match self {
            Handle::Rar(r) => r.wants_direct_io(),
            Handle::Info(_) => true,
            _ => false,
        }
    }
}

/// One mount's engine.
pub struct Engine {
    options: Options,
    overrides: OverrideTable,
    decoder: Arc<dyn Decoder>,
    mount_type: MountType,
    /// Directory backing the virtual root.
    root: PathBuf,
    /// For archive mounts, the archive itself.
    archive: Option<PathBuf>,
    /// Mount point, when it lies inside the source tree.
    mount_point: Option<PathBuf>,
    filecache: Arc<FileCache>,
    dircache: DirCache,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mount_type", &self.mount_type)
            .field("root", &self.root)
            .field("archive", &self.archive)
            .field("mount_point", &self.mount_point)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates the engine for a source directory or a single archive.
    ///
    /// Archive mounts enumerate eagerly; an archive whose first volume
    /// cannot be resolved aborts construction.
    pub fn new(
        decoder: Arc<dyn Decoder>,
        source: impl AsRef<Path>,
        options: Options,
        overrides: OverrideTable,
    ) -> Result<Self> {
        let source = source.as_ref().to_path_buf();
        let meta = std::fs::metadata(&source)?;
        let engine = if meta.is_dir() {
            Self {
                options,
                overrides,
                decoder,
                mount_type: MountType::Folder,
                root: source,
                archive: None,
                mount_point: None,
                filecache: Arc::new(FileCache::new()),
                dircache: DirCache::new(),
                shutdown: Arc::new(AtomicBool::new(false)),
            }
        } else {
            let source = resolve_first_volume(decoder.as_ref(), source)?;
            let root = source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            let engine = Self {
                options,
                overrides,
                decoder,
                mount_type: MountType::Archive,
                root,
                archive: Some(source.clone()),
                mount_point: None,
                filecache: Arc::new(FileCache::new()),
                dircache: DirCache::new(),
                shutdown: Arc::new(AtomicBool::new(false)),
            };
            // Fatal here: a mount of an unresolvable archive is refused.
            engine.enumerator(&source).list_archive(&source, "/", None)?;
            engine
        };
        Ok(engine)
    }

    /// Declares the mount point so self-loops resolve to nothing when
    /// the mount lies inside the source tree.
    pub fn set_mount_point(&mut self, mount_point: impl AsRef<Path>) {
        self.mount_point = Some(mount_point.as_ref().to_path_buf());
    }

    /// The engine-wide termination flag shared with worker threads.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Raises the termination flag; idle workers drain within their
    /// timed wait.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// The mount shape.
    pub fn mount_type(&self) -> MountType {
        self.mount_type
    }

    /// For archive mounts, the mounted archive's path.
    pub fn archive_path(&self) -> Option<&Path> {
        self.archive.as_deref()
    }

    /// Drops every cached resolution and listing. This is the SIGUSR1
    /// behaviour: the next operation re-reads the source directory.
    pub fn invalidate_all(&self) {
        debug!("invalidating all caches");
        self.filecache.invalidate_all();
        self.dircache.invalidate_all();
    }

    /// Invalidates one path and, for directories, everything below it.
    pub fn invalidate(&self, path: &str) {
        self.filecache.invalidate_prefix(path);
        self.dircache.invalidate(path);
    }

    fn enumerator<'a>(&'a self, archive: &Path) -> Enumerator<'a> {
        Enumerator {
            decoder: self.decoder.as_ref(),
            filecache: &self.filecache,
            options: &self.options,
            overrides: self.overrides.lookup(archive),
        }
    }

    fn local_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn is_loop(&self, local: &Path) -> bool {
        self.mount_point.as_deref() == Some(local)
    }

    /// Enumerates every archive in the local directory backing
    /// `virtual_dir`, appending member rows to `list` when given.
    fn enumerate_dir(&self, virtual_dir: &str, mut list: Option<&mut DirList>) {
        let local_dir = self.local_path(virtual_dir);
        let Ok(read_dir) = std::fs::read_dir(&local_dir) else {
            return;
        };
        for dentry in read_dir.flatten() {
            let Ok(name) = dentry.file_name().into_string() else {
                continue;
            };
            if !is_archive_candidate(&name, &self.options) {
                continue;
            }
            let archive = dentry.path();
            match self
                .enumerator(&archive)
                .list_archive(&archive, virtual_dir, list.as_deref_mut())
            {
                Ok(()) => {}
                Err(e) if e.is_listing_error() => {
                    // Unreadable as an archive; it stays visible as a
                    // plain file.
                    debug!("skipping {}: {}", archive.display(), e);
                    if let Some(list) = list.as_deref_mut() {
                        if let Some(stat) = self.local_stat(&archive) {
                            list.add(&name, Some(stat), EntrySource::Local);
                        }
                    }
                }
                Err(e) => warn!("enumeration of {} failed: {}", archive.display(), e),
            }
        }
    }

    /// Resolves a virtual path, enumerating on a miss.
    ///
    /// Folder mounts probe the underlying filesystem first so a real
    /// file always masks an archive member of the same name.
    fn resolve(&self, path: &str) -> Result<PathResolution> {
        match self.mount_type {
            MountType::Archive => {
                if path == "/" {
                    // The virtual root of an archive mount has no
                    // backing entry of its own.
                    return Ok(PathResolution::Local);
                }
            }
            MountType::Folder => {
                let local = self.local_path(path);
                if self.is_loop(&local) {
                    self.filecache.insert_loop(path);
                    return Ok(PathResolution::Loop);
                }
                if local.symlink_metadata().is_ok() {
                    self.filecache.insert_local(path);
                    return Ok(PathResolution::Local);
                }
            }
        }

        if let Some(hit) = self.filecache.resolve(path) {
            return Ok(hit);
        }

        if self.mount_type == MountType::Folder {
            // Enumerate the archives of the deepest ancestor directory
            // that exists locally; one pass materialises every member
            // path beneath it.
            let mut dir = parent_of(path).to_string();
            loop {
                if std::fs::metadata(self.local_path(&dir)).is_ok() {
                    self.enumerate_dir(&dir, None);
                    break;
                }
                if dir == "/" {
                    break;
                }
                dir = parent_of(&dir).to_string();
            }
        }

        self.filecache
            .resolve(path)
            .ok_or_else(|| Error::NotFound { path: path.into() })
    }

    fn local_stat(&self, local: &Path) -> Option<EntryStat> {
        let meta = local.symlink_metadata().ok()?;
        Some(stat_from_metadata(&meta))
    }

    /// Returns the attributes of a virtual path.
    pub fn getattr(&self, path: &str) -> Result<EntryStat> {
        if let Some(base) = path.strip_suffix(INFO_SUFFIX) {
            let entry = self.archive_entry(base)?;
            // Descriptor contents are synthesised at open; bindings set
            // direct I/O for it, so the size is nominal.
            return Ok(EntryStat {
                mode: S_IFREG | 0o444,
                uid: entry.stat.uid,
                gid: entry.stat.gid,
                nlink: 1,
                size: 0,
                atime: entry.stat.atime,
                mtime: entry.stat.mtime,
                ctime: entry.stat.ctime,
            });
        }
        match self.resolve(path)? {
            PathResolution::Archive(entry) => Ok(entry.stat),
            PathResolution::Local => {
                let local = self.local_path(path);
                self.local_stat(&local)
                    .ok_or_else(|| Error::NotFound { path: path.into() })
            }
            PathResolution::Loop => Err(Error::NotFound { path: path.into() }),
        }
    }

    /// Returns the target of an in-archive (or local) symlink.
    pub fn readlink(&self, path: &str) -> Result<String> {
        match self.resolve(path)? {
            PathResolution::Archive(entry) => entry
                .link_target
                .clone()
                .ok_or_else(|| Error::NotFound { path: path.into() }),
            PathResolution::Local => {
                let target = std::fs::read_link(self.local_path(path))?;
                Ok(target.to_string_lossy().into_owned())
            }
            PathResolution::Loop => Err(Error::NotFound { path: path.into() }),
        }
    }

    /// Lists a virtual directory.
    ///
    /// Folder mounts union the local directory with the members of
    /// every archive in it; archive mounts and in-archive directories
    /// list from the filecache.
    pub fn readdir(&self, path: &str) -> Result<Vec<(String, Option<EntryStat>)>> {
        let local_dir = self.local_path(path);
        let is_local_dir =
            self.mount_type == MountType::Folder && local_dir.metadata().map(|m| m.is_dir()).unwrap_or(false);

        if !is_local_dir {
            // In-archive directory (or archive mount): serve from the
            // filecache, enumerating on a cold lookup. The virtual root
            // of an archive mount is implicitly a directory.
            if path != "/" {
                match self.resolve(path)? {
                    PathResolution::Archive(entry) if entry.stat.is_dir() => {}
                    PathResolution::Archive(_) => {
                        return Err(Error::NotADirectory { path: path.into() });
                    }
                    PathResolution::Local | PathResolution::Loop => {
                        return Err(Error::NotFound { path: path.into() });
                    }
                }
            }
            let mut list = DirList::new();
            for child in self.filecache.children_of(path) {
                let name = child.name.rsplit('/').next().unwrap_or(&child.name);
                list.add(name, Some(child.stat), EntrySource::Archive);
            }
            list.close();
            return Ok(collect(list));
        }

        match self.dircache.lookup(path, &local_dir) {
            DirLookup::Hit(list) => return Ok(collect(list)),
            DirLookup::Stale(children) => {
                // The backing directory changed; cached member
                // resolutions under it are no longer trustworthy.
                for name in children {
                    self.filecache.invalidate_prefix(&join(path, &name));
                }
            }
            DirLookup::Miss => {}
        }

        let mtime = DirCache::probe_mtime(&local_dir);
        let mut list = DirList::new();
        if let Ok(read_dir) = std::fs::read_dir(&local_dir) {
            for dentry in read_dir.flatten() {
                let Ok(name) = dentry.file_name().into_string() else {
                    continue;
                };
                if is_archive_candidate(&name, &self.options) {
                    continue; // replaced by its contents below
                }
                if parse(&name).map(|f| f.index > 0).unwrap_or(false) {
                    continue; // trailing volumes of an expanded set
                }
                if self.is_loop(&dentry.path()) {
                    continue;
                }
                list.add(&name, self.local_stat(&dentry.path()), EntrySource::Local);
            }
        }
        self.enumerate_dir(path, Some(&mut list));
        // Members materialised by archives of ancestor directories also
        // belong in this listing.
        for child in self.filecache.children_of(path) {
            let name = child.name.rsplit('/').next().unwrap_or(&child.name);
            list.add(name, Some(child.stat), EntrySource::Archive);
        }
        list.close();

        if let Some(mtime) = mtime {
            self.dircache.insert(path, list.clone(), mtime);
        }
        Ok(collect(list))
    }

    fn archive_entry(&self, path: &str) -> Result<Arc<FileEntry>> {
        match self.resolve(path)? {
            PathResolution::Archive(entry) => Ok(entry),
            _ => Err(Error::NotFound { path: path.into() }),
        }
    }

    /// Fetches the decoder header for a member, through the payload
    /// view when the member lives in a nested archive.
    fn member_header(&self, entry: &FileEntry) -> Result<MemberHeader> {
        let configured = self
            .overrides
            .lookup(&entry.archive_path)
            .and_then(|o| o.password.clone());
        let source = match &entry.nested_in {
            Some(_) => {
                let outer = self.outer_entry(entry)?;
                nested_view(self.decoder.as_ref(), &outer, configured.as_ref())?
            }
            None => ArchiveSource::Path(entry.archive_path.clone()),
        };
        let password = crate::password::lookup(&entry.archive_path, configured.as_ref());
        let mut handle = self.decoder.open(source, password)?;
        loop {
            let header = handle.read_header()?.ok_or_else(|| Error::NotFound {
                path: entry.name.clone(),
            })?;
            if !header.is_directory && header.name.replace('\\', "/") == entry.member_name {
                return Ok(header);
            }
            handle.skip()?;
        }
    }

    /// The entry describing the archive that contains a nested member.
    fn outer_entry(&self, entry: &FileEntry) -> Result<FileEntry> {
        let inner_name = entry.nested_in.as_deref().unwrap_or_default();
        let dir = parent_of(&entry.name);
        self.filecache
            .children_of(dir)
            .into_iter()
            .find(|e| e.member_name == inner_name && e.nested_in.is_none())
            .map(|e| (*e).clone())
            .ok_or_else(|| Error::NotFound {
                path: format!("{}/{}", dir, inner_name),
            })
    }

    /// Opens a virtual path.
    ///
    /// `write` intent on an in-archive path is refused with the
    /// read-only error; local paths pass through to the underlying
    /// filesystem.
    pub fn open(&self, path: &str, write: bool) -> Result<Handle> {
        if let Some(base) = path.strip_suffix(INFO_SUFFIX) {
            let entry = self.archive_entry(base)?;
            let header = self.member_header(&entry)?;
            return Ok(Handle::Info(InfoReader::new(&entry, &header)));
        }

        let entry = match self.resolve(path)? {
            PathResolution::Local => {
                let local = self.local_path(path);
                let file = File::options()
                    .read(true)
                    .write(write)
                    .open(&local)?;
                return Ok(Handle::Local(file));
            }
            PathResolution::Loop => {
                return Err(Error::NotFound { path: path.into() });
            }
            PathResolution::Archive(entry) => entry,
        };

        if write {
            return Err(Error::ReadOnly { path: path.into() });
        }
        if entry.stat.is_dir() {
            return Ok(Handle::Dir);
        }

        if entry.is_raw() && entry.nested_in.is_none() {
            let reader = RawReader::open((*entry).clone(), &self.options)?;
            return Ok(Handle::Raw(reader));
        }

        // Compressed (or nested) member: extractor pipeline.
        let configured = self
            .overrides
            .lookup(&entry.archive_path)
            .and_then(|o| o.password.clone());

        if self.options.dry_run && !entry.flags.contains(EntryFlags::DRY_RUN_DONE) {
            let source = self.member_source(&entry, configured.as_ref())?;
            let checked = dry_run(
                self.decoder.as_ref(),
                source,
                &entry.archive_path,
                &entry.member_name,
                configured.as_ref(),
            );
            let mut updated = (*entry).clone();
            updated.flags.insert(EntryFlags::DRY_RUN_DONE);
            self.filecache.insert(updated);
            checked?;
        }

        let source = self.member_source(&entry, configured.as_ref())?;
        let reader = RarReader::open(
            (*entry).clone(),
            source,
            RarOpenContext {
                decoder: self.decoder.clone(),
                source_root: self.root.clone(),
                filecache: self.filecache.clone(),
                password: configured,
                shutdown: self.shutdown.clone(),
            },
            &self.options,
        )?;
        Ok(Handle::Rar(Box::new(reader)))
    }

    fn member_source(
        &self,
        entry: &FileEntry,
        configured: Option<&crate::password::Password>,
    ) -> Result<ArchiveSource> {
        match &entry.nested_in {
            Some(_) => {
                let outer = self.outer_entry(entry)?;
                nested_view(self.decoder.as_ref(), &outer, configured)
            }
            None => Ok(ArchiveSource::Path(entry.archive_path.clone())),
        }
    }

    /// Reads from an open handle at `offset`.
    pub fn read(&self, handle: &Handle, dst: &mut [u8], offset: u64) -> Result<usize> {
        match handle {
            Handle::Local(file) => Ok(read_local_at(file, dst, offset)?),
            Handle::Raw(reader) => reader.read_at(dst, offset),
            Handle::Rar(reader) => reader.read_at(dst, offset),
            Handle::Info(reader) => Ok(reader.read_at(dst, offset)),
            Handle::Dir => Err(Error::NotADirectory {
                path: String::new(),
            }),
        }
    }

    /// Releases a handle, tearing down any pipeline behind it.
    pub fn release(&self, handle: Handle) -> Result<()> {
        match handle {
            Handle::Rar(reader) => reader.close(),
            _ => Ok(()),
        }
    }

    /// The shared filecache (bindings expose xattr data from it).
    pub fn filecache(&self) -> &FileCache {
        &self.filecache
    }

    /// The mount options in effect.
    pub fn options(&self) -> &Options {
        &self.options
    }
}

/// Rewrites a mount request for a non-first volume into the set's
/// first volume, verifying the candidate by opening it.
///
/// The header's first-volume bit decides, with one exception: pre-5.x
/// archives mis-report it for `.rNN` members, so for the old numbering
/// scheme a candidate is accepted on its name alone. New-scheme sets
/// carry a trustworthy bit, and a candidate whose header disowns it is
/// refused rather than mounted.
fn resolve_first_volume(decoder: &dyn Decoder, source: PathBuf) -> Result<PathBuf> {
    let Some(name) = source.file_name().and_then(|n| n.to_str()) else {
        return Ok(source);
    };
    let Some(fmt) = parse(name) else {
        return Ok(source);
    };
    if fmt.index == 0 {
        return Ok(source);
    }
    let first = crate::volume::first_name(name)
        .ok_or_else(|| Error::InvalidFormat(format!("cannot derive first volume of {}", name)))?;
    let candidate = source.with_file_name(&first);
    let handle = decoder.open(ArchiveSource::Path(candidate.clone()), None)?;
    let main = handle.main();
    if main.volume && !main.first_volume && fmt.scheme != VolumeScheme::Old {
        return Err(Error::InvalidFormat(format!(
            "{} does not resolve to a first volume",
            name
        )));
    }
    Ok(candidate)
}

fn collect(list: DirList) -> Vec<(String, Option<EntryStat>)> {
    list.iter()
        .map(|e| (e.name.clone(), e.stat))
        .collect()
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(unix)]
fn stat_from_metadata(meta: &std::fs::Metadata) -> EntryStat {
    use std::os::unix::fs::MetadataExt;
    EntryStat {
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        nlink: meta.nlink() as u32,
        size: meta.size(),
        atime: meta.atime(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
    }
}

#[cfg(not(unix))]
fn stat_from_metadata(meta: &std::fs::Metadata) -> EntryStat {
    use crate::entry::S_IFDIR;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    EntryStat {
        mode: if meta.is_dir() { S_IFDIR | 0o755 } else { S_IFREG | 0o644 },
        uid: 0,
        gid: 0,
        nlink: 1,
        size: meta.len(),
        atime: mtime,
        mtime,
        ctime: mtime,
    }
}

#[cfg(unix)]
fn read_local_at(file: &File, dst: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(dst, offset)
}

#[cfg(not(unix))]
fn read_local_at(mut file: &File, dst: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read(dst)
}
