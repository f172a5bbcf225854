//! The archive enumerator.
//!
//! Walks every header of a volume set, synthesises metadata, and
//! materialises [`FileEntry`] records in the filecache plus rows in the
//! caller's directory listing. Continuation headers in later volumes
//! resolve the per-volume payload sizes the raw read path needs.
//!
//! Policy handled here: parent-directory synthesis (`force_dir`),
//! FILECOPY redirect resolution, image-file hiding and fake-ISO
//! aliasing, configured aliases and exclusions, and nested-archive
//! recursion through a payload view.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::cache::dirlist::{DirList, EntrySource};
use crate::cache::filecache::{FileCache, PathResolution};
use crate::entry::{
    EntryFlags, EntryStat, FileEntry, S_IFDIR, S_IFLNK, S_IFREG, VolumeExtent, parent_dir_hash,
};
use crate::error::{Error, Result};
use crate::options::{ArchiveOverrides, Options};
use crate::password::Password;
use crate::timestamp::dos_time_to_unix;
use crate::volume::{VolumeScheme, nth_name, parse};

use super::decoder::{ArchiveSource, Decoder, MainHeader, MemberHeader};
use super::nested::nested_view;

/// Returns `true` for directory entries worth probing as archives:
/// `.rar`, `.cbr` and first volumes of numeric sets (`.001`).
///
/// Non-first volume names (`.rNN`, `.partNN`, `.002`...) are filtered
/// out; their sets are reached through their first volume.
pub fn is_archive_candidate(name: &str, options: &Options) -> bool {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".rar") {
        return match parse(&lower) {
            Some(fmt) => fmt.index == 0,
            None => true,
        };
    }
    if lower.ends_with(".cbr") {
        return !options.no_expand_cbr;
    }
    if lower.ends_with(".001") {
        return true;
    }
    false
}

/// One enumeration pass over a volume set.
pub struct Enumerator<'a> {
    /// The decoder library.
    pub decoder: &'a dyn Decoder,
    /// Shared filecache to populate.
    pub filecache: &'a FileCache,
    /// Mount options.
    pub options: &'a Options,
    /// Per-archive overrides, if configured.
    pub overrides: Option<&'a ArchiveOverrides>,
}

struct Walk {
    entries: HashMap<String, FileEntry>,
    redirects: Vec<(String, String)>,
    nested: Vec<String>,
}

impl Enumerator<'_> {
    /// Enumerates `archive_path`, populating the filecache with members
    /// under the virtual directory `virtual_dir` and appending direct
    /// children to `list`.
    ///
    /// An archive that fails to open is reported as a listing error the
    /// caller may skip; a mid-walk failure keeps whatever was already
    /// collected and reports the error.
    pub fn list_archive(
        &self,
        archive_path: &Path,
        virtual_dir: &str,
        mut list: Option<&mut DirList>,
    ) -> Result<()> {
        let configured = self.overrides.and_then(|o| o.password.as_ref());
        let handle = match self.decoder.open(
            ArchiveSource::Path(archive_path.to_path_buf()),
            None,
        ) {
            Ok(h) => h,
            Err(Error::PasswordRequired { .. }) => {
                // Encrypted headers: retry through the password store.
                let password = crate::password::lookup(archive_path, configured)
                    .ok_or_else(|| Error::PasswordRequired {
                        archive: archive_path.display().to_string(),
                    })?;
                self.decoder.open(
                    ArchiveSource::Path(archive_path.to_path_buf()),
                    Some(password),
                )?
            }
            Err(e) => return Err(e),
        };

        let main = handle.main();
        let file_name = archive_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidFormat("unrepresentable archive name".into()))?;
        let fmt = parse(file_name);
        if main.volume && !main.first_volume {
            // Pre-5.x sets mis-report the bit for .rNN members; a name
            // that parses as the set's first volume is trusted over it.
            if fmt.map(|f| f.index) != Some(0) {
                return Err(Error::InvalidFormat(format!(
                    "{} is not the first volume of its set",
                    file_name
                )));
            }
        }

        let mut walk = Walk {
            entries: HashMap::new(),
            redirects: Vec::new(),
            nested: Vec::new(),
        };

        let walk_result =
            self.walk_volumes(&mut walk, handle, &main, archive_path, virtual_dir, configured);

        self.resolve_redirects(&mut walk);
        self.apply_aliases(&mut walk);
        self.expand_nested(&mut walk, virtual_dir, configured);
        self.commit(walk, virtual_dir, list.as_deref_mut());

        walk_result
    }

    fn walk_volumes(
        &self,
        walk: &mut Walk,
        first_handle: Box<dyn super::decoder::ArchiveHandle>,
        main: &MainHeader,
        archive_path: &Path,
        virtual_dir: &str,
        configured: Option<&Password>,
    ) -> Result<()> {
        let file_name = archive_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidFormat("unrepresentable archive name".into()))?;
        let fmt = parse(file_name);
        let vno_base = fmt.map(|f| f.index).unwrap_or(0);
        let seek_length = self
            .overrides
            .and_then(|o| o.seek_length)
            .unwrap_or(self.options.seek_length);

        let mut handle = Some(first_handle);
        let mut vol_rel = 0u32;
        loop {
            let vol_path = if vol_rel == 0 {
                archive_path.to_path_buf()
            } else {
                let Some(name) = archive_path
                    .to_str()
                    .and_then(|s| nth_name(s, vno_base + vol_rel))
                else {
                    break;
                };
                PathBuf::from(name)
            };
            let mut h = match handle.take() {
                Some(h) => h,
                None => {
                    if !vol_path.exists() {
                        break;
                    }
                    let password = crate::password::lookup(archive_path, configured);
                    match self
                        .decoder
                        .open(ArchiveSource::Path(vol_path.clone()), password)
                    {
                        Ok(h) => h,
                        Err(e) => {
                            warn!("volume {} unreadable: {}", vol_path.display(), e);
                            break;
                        }
                    }
                }
            };

            loop {
                let header = match h.read_header() {
                    Ok(Some(header)) => header,
                    Ok(None) => break,
                    Err(e) => {
                        // Partial set already collected stays valid.
                        warn!("header walk failed in {}: {}", archive_path.display(), e);
                        return Err(e);
                    }
                };
                self.observe_header(
                    walk,
                    &header,
                    main,
                    &vol_path,
                    virtual_dir,
                    vno_base + vol_rel,
                );
                h.skip()?;
            }

            if !main.volume {
                break;
            }
            vol_rel += 1;
            if seek_length > 0 && vol_rel >= seek_length {
                debug!("seek length {} reached for {}", seek_length, file_name);
                break;
            }
        }
        Ok(())
    }

    /// Records one header observed while walking volume file
    /// `vol_path`, whose absolute index in the set is `vno`.
    fn observe_header(
        &self,
        walk: &mut Walk,
        header: &MemberHeader,
        main: &MainHeader,
        vol_path: &Path,
        virtual_dir: &str,
        vno: u32,
    ) {
        let member_name = header.name.replace('\\', "/");
        let basename = member_name.rsplit('/').next().unwrap_or(&member_name);
        if self.options.is_excluded(basename) {
            return;
        }

        let virtual_path = join_virtual(virtual_dir, &member_name);

        if header.split_before {
            // Continuation of a member opened in an earlier volume:
            // the first continuation fixes the next-volume sizes.
            if let Some(entry) = walk.entries.get_mut(&virtual_path) {
                if entry.flags.contains(EntryFlags::UNRESOLVED) {
                    entry.extent.vsize_next = header.packed_size;
                    entry.extent.vsize_real_next = header.data_offset + header.packed_size;
                    entry.flags.remove(EntryFlags::UNRESOLVED);
                }
            }
            return;
        }

        let raw = header.is_store()
            && !header.encrypted
            && !header.is_directory
            && header.link_target.is_none();

        // Compressed image files confuse the players they are meant
        // for; hide them unless configured otherwise.
        if !header.is_directory
            && !raw
            && self.options.is_img_ext(basename)
            && !self.options.show_comp_img
        {
            return;
        }

        self.synthesize_parents(walk, virtual_dir, &virtual_path, header);

        let mut entry = FileEntry::new(virtual_path.clone());
        // The path of first occurrence: parent resolution and raw reads
        // anchor on the volume the member starts in.
        entry.archive_path = vol_path.to_path_buf();
        entry.member_name = member_name.clone();
        entry.method = header.method;
        entry.offset = header.data_offset;
        entry.stat = synthesize_stat(header, self.options);
        entry.vtype = fmt_scheme(vol_path);

        if header.is_directory {
            // A real directory header replaces any synthetic parent.
            walk.entries.insert(virtual_path, entry);
            return;
        }

        if let Some(target) = &header.link_target {
            let target = target.decode();
            entry.stat.mode = S_IFLNK | 0o777;
            entry.stat.size = target.len() as u64;
            entry.link_target = Some(target);
        }

        if raw {
            entry.flags.insert(EntryFlags::RAW);
            if main.volume && header.split_after {
                let (vlen, vpos) = parse_field(vol_path);
                entry.flags.insert(EntryFlags::MULTIPART | EntryFlags::UNRESOLVED);
                entry.extent = VolumeExtent {
                    vsize_first: header.packed_size,
                    vsize_next: 0,
                    vsize_real_first: header.data_offset + header.packed_size,
                    vsize_real_next: 0,
                    vno_base: vno,
                    vno_first: vno,
                    vlen,
                    vpos,
                };
                if header.volume_in_header.is_some() {
                    entry.flags.insert(EntryFlags::VSIZE_FIXUP);
                }
            }
        } else {
            if header.encrypted {
                entry.flags.insert(EntryFlags::ENCRYPTED);
            }
            let save_eof = self
                .overrides
                .and_then(|o| o.save_eof)
                .unwrap_or(self.options.save_eof);
            if save_eof {
                entry.flags.insert(EntryFlags::SAVE_EOF);
            }
        }

        if self.options.is_img_ext(basename) {
            entry.flags.insert(EntryFlags::IMAGE);
            if raw && self.options.fake_iso && !basename.to_ascii_lowercase().ends_with(".iso") {
                // Surface the member under an .iso alias instead of its
                // own name.
                let alias = fake_iso_name(&virtual_path);
                entry.flags.insert(EntryFlags::FAKE_ISO);
                entry.name = alias.clone();
                entry.dir_hash = parent_dir_hash(&alias);
                walk.entries.insert(alias, entry);
                return;
            }
        }

        if let Some(target) = &header.redirect {
            walk.redirects
                .push((virtual_path.clone(), target.replace('\\', "/")));
        }

        if is_nested_archive(basename, self.options) && !self.options.flat_only {
            walk.nested.push(virtual_path.clone());
        }

        walk.entries.insert(virtual_path, entry);
    }

    /// Creates synthetic directory entries for ancestors the archive
    /// never declared. Real headers arriving later replace them.
    fn synthesize_parents(
        &self,
        walk: &mut Walk,
        virtual_dir: &str,
        virtual_path: &str,
        header: &MemberHeader,
    ) {
        let mtime = member_mtime(header);
        let mut dir = parent_of(virtual_path).to_string();
        while dir.len() > virtual_dir.len().max(1) {
            if !walk.entries.contains_key(&dir) && self.filecache.get(&dir).is_none() {
                let mut entry = FileEntry::new(dir.clone());
                entry.stat = EntryStat::synthetic_dir(
                    self.options.uid,
                    self.options.gid,
                    self.options.umask,
                    mtime,
                );
                entry.flags.insert(EntryFlags::FORCE_DIR);
                walk.entries.insert(dir.clone(), entry);
            }
            dir = parent_of(&dir).to_string();
        }
    }

    /// Copies source-member metadata into FILECOPY redirect entries,
    /// keeping the redirect's own timestamps.
    fn resolve_redirects(&self, walk: &mut Walk) {
        for (vpath, target) in std::mem::take(&mut walk.redirects) {
            let source = walk
                .entries
                .values()
                .find(|e| e.member_name == target)
                .cloned();
            let Some(source) = source else {
                debug!("filecopy target '{}' not found", target);
                continue;
            };
            if let Some(entry) = walk.entries.get_mut(&vpath) {
                let stat_times = (entry.stat.atime, entry.stat.mtime, entry.stat.ctime);
                entry.member_name = source.member_name.clone();
                entry.offset = source.offset;
                entry.method = source.method;
                entry.extent = source.extent;
                entry.flags = source.flags;
                entry.stat = source.stat;
                entry.stat.atime = stat_times.0;
                entry.stat.mtime = stat_times.1;
                entry.stat.ctime = stat_times.2;
            }
        }
    }

    /// Applies configured `(src, dst)` aliases: the destination name
    /// appears in listings, the source does not.
    fn apply_aliases(&self, walk: &mut Walk) {
        let Some(overrides) = self.overrides else {
            return;
        };
        for (src, dst) in &overrides.aliases {
            let Some(src_path) = walk
                .entries
                .iter()
                .find(|(_, e)| &e.member_name == src)
                .map(|(k, _)| k.clone())
            else {
                continue;
            };
            let mut entry = walk.entries.remove(&src_path).unwrap();
            let alias = join_virtual(parent_of(&src_path), dst);
            entry.name = alias.clone();
            entry.dir_hash = parent_dir_hash(&alias);
            walk.entries.insert(alias, entry);
        }
    }

    /// Recurses into nested archives through a payload view.
    fn expand_nested(&self, walk: &mut Walk, virtual_dir: &str, configured: Option<&Password>) {
        for vpath in std::mem::take(&mut walk.nested) {
            let Some(outer) = walk.entries.get(&vpath).cloned() else {
                continue;
            };
            let view = match nested_view(self.decoder, &outer, configured) {
                Ok(v) => v,
                Err(e) => {
                    warn!("cannot view nested archive '{}': {}", vpath, e);
                    continue;
                }
            };
            let mut handle = match self.decoder.open(view, None) {
                Ok(h) => h,
                Err(e) => {
                    warn!("cannot open nested archive '{}': {}", vpath, e);
                    continue;
                }
            };
            loop {
                let header = match handle.read_header() {
                    Ok(Some(h)) => h,
                    _ => break,
                };
                let member_name = header.name.replace('\\', "/");
                let inner_path = join_virtual(virtual_dir, &member_name);
                self.synthesize_parents(walk, virtual_dir, &inner_path, &header);
                if !header.is_directory {
                    let mut entry = FileEntry::new(inner_path.clone());
                    entry.archive_path = outer.archive_path.clone();
                    entry.member_name = member_name;
                    entry.method = header.method;
                    entry.stat = synthesize_stat(&header, self.options);
                    entry.nested_in = Some(outer.member_name.clone());
                    if header.encrypted {
                        entry.flags.insert(EntryFlags::ENCRYPTED);
                    }
                    walk.entries.insert(inner_path, entry);
                }
                if handle.skip().is_err() {
                    break;
                }
            }
        }
    }

    /// Inserts the collected entries into the filecache and lists the
    /// direct children of `virtual_dir`.
    fn commit(&self, walk: Walk, virtual_dir: &str, mut list: Option<&mut DirList>) {
        for (path, mut entry) in walk.entries {
            if entry.flags.contains(EntryFlags::UNRESOLVED) && entry.extent.vsize_next == 0 {
                // No continuation header was seen (seek length cut the
                // walk short, or the set is truncated). The first
                // volume's sizes are the qualified guess; reads verify
                // against EOF anyway.
                entry.extent.vsize_next = entry.extent.vsize_first;
                entry.extent.vsize_real_next = entry.extent.vsize_real_first;
            }
            let force_dir = entry.flags.contains(EntryFlags::FORCE_DIR);
            let listed_stat = entry.stat;
            self.filecache.insert_if(entry, |existing| match existing {
                // Real entries replace synthetic directories, never the
                // other way around; local files always mask members.
                PathResolution::Archive(e) => {
                    e.flags.contains(EntryFlags::FORCE_DIR) && !force_dir
                }
                PathResolution::Local | PathResolution::Loop => false,
            });
            if let Some(list) = list.as_deref_mut() {
                if parent_of(&path) == normalize_dir(virtual_dir) {
                    let name = path.rsplit('/').next().unwrap_or(&path);
                    list.add(name, Some(listed_stat), EntrySource::Archive);
                }
            }
        }
    }
}

fn normalize_dir(dir: &str) -> &str {
    if dir.is_empty() { "/" } else { dir }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn join_virtual(dir: &str, member: &str) -> String {
    let dir = dir.trim_end_matches('/');
    format!("{}/{}", dir, member.trim_start_matches('/'))
}

fn fake_iso_name(path: &str) -> String {
    match path.rfind('.') {
        Some(idx) => format!("{}.iso", &path[..idx]),
        None => format!("{}.iso", path),
    }
}

fn is_nested_archive(basename: &str, options: &Options) -> bool {
    let lower = basename.to_ascii_lowercase();
    lower.ends_with(".rar") || (lower.ends_with(".cbr") && !options.no_expand_cbr)
}

fn fmt_scheme(archive_path: &Path) -> VolumeScheme {
    archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse)
        .map(|f| f.scheme)
        .unwrap_or_default()
}

fn parse_field(archive_path: &Path) -> (usize, usize) {
    archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse)
        .map(|f| (f.len, f.pos))
        .unwrap_or((0, 0))
}

fn member_mtime(header: &MemberHeader) -> i64 {
    header
        .unix_times
        .map(|(_, m, _)| m)
        .unwrap_or_else(|| dos_time_to_unix(header.dos_time))
}

/// Builds the POSIX stat of a member.
fn synthesize_stat(header: &MemberHeader, options: &Options) -> EntryStat {
    let mtime = member_mtime(header);
    let (atime, ctime) = header
        .unix_times
        .map(|(a, _, c)| (a, c))
        .unwrap_or((mtime, mtime));

    let mode = if header.is_directory {
        match header.unix_mode {
            Some(m) if header.host_os == super::decoder::HostOs::Unix => {
                S_IFDIR | (m & 0o7777)
            }
            _ => S_IFDIR | (0o777 & !options.umask),
        }
    } else {
        match header.unix_mode {
            Some(m) if header.host_os == super::decoder::HostOs::Unix => S_IFREG | (m & 0o7777),
            _ => S_IFREG | (0o666 & !options.umask),
        }
    };

    EntryStat {
        mode,
        uid: options.uid,
        gid: options.gid,
        nlink: if header.is_directory { 2 } else { 1 },
        size: if header.is_directory {
            4096
        } else {
            header.unpacked_size
        },
        atime,
        mtime,
        ctime,
    }
}
