//! Engine configuration.
//!
//! [`Options`] carries the mount-wide tunables the CLI and config file
//! feed in; [`ArchiveOverrides`] carries the per-archive properties
//! (keyed by archive basename or full path by the integrator's config
//! layer, which is outside this crate).

use std::collections::HashMap;

use crate::password::Password;
use crate::stream::iobuffer::{IOB_HIST_PCT_DEFAULT, IOB_SZ_DEFAULT};

/// Mount-wide engine options.
///
/// # Example
///
/// ```rust
/// use rarfs::Options;
///
/// let options = Options::new()
///     .iob_capacity(8 * 1024 * 1024)
///     .history_pct(25)
///     .save_eof(true);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Ring buffer capacity per compressed open, in bytes.
    pub iob_capacity: usize,
    /// History window share of the buffer, in percent.
    pub history_pct: u32,
    /// Produce `.r2i` sidecars on near-EOF probes.
    pub save_eof: bool,
    /// Volumes to inspect when resolving sizes; `0` means all.
    pub seek_length: u32,
    /// Do not expand `.cbr` comic archives.
    pub no_expand_cbr: bool,
    /// Surface compressed image files instead of hiding them.
    pub show_comp_img: bool,
    /// Skip nested-archive expansion entirely.
    pub flat_only: bool,
    /// Pre-open all volume handles of raw multipart image files.
    pub preopen_img: bool,
    /// Run a wrong-password/CRC dry run before the first extraction of
    /// each compressed member (folder mounts).
    pub dry_run: bool,
    /// Image-file extensions (lowercase, no dot) hidden when compressed
    /// and eligible for `.iso` aliasing.
    pub img_exts: Vec<String>,
    /// Alias matching image members to `.iso` names.
    pub fake_iso: bool,
    /// File names never surfaced in listings.
    pub exclude: Vec<String>,
    /// Mode bits cleared from synthesised entries.
    pub umask: u32,
    /// Owner reported for in-archive entries.
    pub uid: u32,
    /// Group reported for in-archive entries.
    pub gid: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            iob_capacity: IOB_SZ_DEFAULT,
            history_pct: IOB_HIST_PCT_DEFAULT,
            save_eof: false,
            seek_length: 0,
            no_expand_cbr: false,
            show_comp_img: false,
            flat_only: false,
            preopen_img: false,
            dry_run: false,
            img_exts: vec!["img".into(), "iso".into(), "nrg".into()],
            fake_iso: false,
            exclude: Vec::new(),
            umask: 0o022,
            uid: 0,
            gid: 0,
        }
    }
}

impl Options {
    /// Creates options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ring buffer capacity (rounded up to a power of two at
    /// buffer creation).
    pub fn iob_capacity(mut self, bytes: usize) -> Self {
        self.iob_capacity = bytes;
        self
    }

    /// Sets the history window share in percent (clamped to 0–100).
    pub fn history_pct(mut self, pct: u32) -> Self {
        self.history_pct = pct.min(100);
        self
    }

    /// Enables `.r2i` production on near-EOF probes.
    pub fn save_eof(mut self, on: bool) -> Self {
        self.save_eof = on;
        self
    }

    /// Sets the volume seek length.
    ///
    /// `0` inspects all volumes. A value of `1` has never been
    /// meaningful and is silently promoted to `2`.
    pub fn seek_length(mut self, n: u32) -> Self {
        self.seek_length = if n == 1 { 2 } else { n };
        self
    }

    /// Sets the reported owner of in-archive entries.
    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Returns `true` if a file name is on the exclusion list.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }

    /// Returns `true` if the extension is in the configured image set.
    pub fn is_img_ext(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.img_exts
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }
}

/// Per-archive property overrides.
///
/// The config layer keys these by archive basename or absolute path;
/// the engine consults them through [`OverrideTable::lookup`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveOverrides {
    /// Override of [`Options::seek_length`].
    pub seek_length: Option<u32>,
    /// Override of [`Options::save_eof`].
    pub save_eof: Option<bool>,
    /// Configured password, consulted after the `.pwd` sidecars.
    pub password: Option<Password>,
    /// Alias pairs `(src, dst)`; `dst` differs from `src` only in its
    /// basename. The alias appears in listings in place of the source.
    pub aliases: Vec<(String, String)>,
}

/// Archive path/basename → overrides.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    by_key: HashMap<String, ArchiveOverrides>,
}

impl OverrideTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers overrides under an archive basename or absolute path.
    pub fn insert(&mut self, key: impl Into<String>, overrides: ArchiveOverrides) {
        self.by_key.insert(key.into(), overrides);
    }

    /// Looks overrides up: full path first, then basename.
    pub fn lookup(&self, archive: &std::path::Path) -> Option<&ArchiveOverrides> {
        if let Some(s) = archive.to_str() {
            if let Some(o) = self.by_key.get(s) {
                return Some(o);
            }
        }
        let base = archive.file_name()?.to_str()?;
        self.by_key.get(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let o = Options::default();
        assert_eq!(o.iob_capacity, 4 * 1024 * 1024);
        assert_eq!(o.history_pct, 50);
        assert!(!o.save_eof);
        assert_eq!(o.seek_length, 0);
    }

    #[test]
    fn test_seek_length_promotion() {
        assert_eq!(Options::new().seek_length(0).seek_length, 0);
        assert_eq!(Options::new().seek_length(1).seek_length, 2);
        assert_eq!(Options::new().seek_length(2).seek_length, 2);
        assert_eq!(Options::new().seek_length(5).seek_length, 5);
    }

    #[test]
    fn test_img_ext_matching() {
        let o = Options::default();
        assert!(o.is_img_ext("disc.IMG"));
        assert!(o.is_img_ext("cd.iso"));
        assert!(!o.is_img_ext("movie.mkv"));
    }

    #[test]
    fn test_override_lookup_path_then_basename() {
        let mut table = OverrideTable::new();
        table.insert(
            "enc.rar",
            ArchiveOverrides {
                save_eof: Some(true),
                ..Default::default()
            },
        );
        table.insert(
            "/abs/other.rar",
            ArchiveOverrides {
                seek_length: Some(3),
                ..Default::default()
            },
        );

        let by_base = table.lookup(Path::new("/x/enc.rar")).unwrap();
        assert_eq!(by_base.save_eof, Some(true));

        let by_path = table.lookup(Path::new("/abs/other.rar")).unwrap();
        assert_eq!(by_path.seek_length, Some(3));

        assert!(table.lookup(Path::new("/x/unknown.rar")).is_none());
    }
}
