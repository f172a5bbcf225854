//! The EOF-index sidecar (`.r2i`).
//!
//! Players probing near the end of a file (container indexes, duration
//! scans) would otherwise force a full decode of a compressed member.
//! The sidecar captures the member's tail bytes once, next to the
//! virtual path in the underlying directory, and later opens answer
//! those probes straight from it.
//!
//! On-disk layout, all fields network byte order:
//!
//! ```text
//! magic   u32   0x72326900 ('r2i\0')
//! version u16   1 (version 0 is legacy and rejected)
//! spare   u16
//! offset  u64   logical offset the tail starts at
//! size    u64   number of tail bytes that follow
//! ```

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use memmap2::Mmap;

use crate::archive::decoder::{ArchiveSource, ControlFlow, Decoder, StreamSink};
use crate::error::{Error, Result};
use crate::password::Password;

/// Sidecar magic, `'r2i\0'` big-endian.
pub const R2I_MAGIC: u32 = 0x7232_6900;

/// Current header version.
pub const R2I_VERSION: u16 = 1;

/// Serialized header length in bytes.
pub const HEADER_LEN: usize = 24;

/// Parsed sidecar header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Header version.
    pub version: u16,
    /// Logical offset of the first tail byte.
    pub offset: u64,
    /// Number of tail bytes stored.
    pub size: u64,
}

impl IndexHeader {
    /// Serializes the header, network byte order.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&R2I_MAGIC.to_be_bytes());
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        // bytes 6..8 spare
        out[8..16].copy_from_slice(&self.offset.to_be_bytes());
        out[16..24].copy_from_slice(&self.size.to_be_bytes());
        out
    }

    /// Parses and validates a header.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::IndexInvalid("truncated header".into()));
        }
        let magic = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        if magic != R2I_MAGIC {
            return Err(Error::IndexInvalid(format!("bad magic {:#x}", magic)));
        }
        let version = u16::from_be_bytes(bytes[4..6].try_into().unwrap());
        if version == 0 {
            return Err(Error::IndexUnsupported { version });
        }
        if version != R2I_VERSION {
            return Err(Error::IndexUnsupported { version });
        }
        Ok(Self {
            version,
            offset: u64::from_be_bytes(bytes[8..16].try_into().unwrap()),
            size: u64::from_be_bytes(bytes[16..24].try_into().unwrap()),
        })
    }
}

/// Derives the sidecar path for a virtual path rooted at `source_root`:
/// the last three characters of the name are replaced with `r2i`
/// (`movie.mkv` → `movie.r2i`).
pub fn sidecar_path(source_root: &Path, virtual_path: &str) -> Option<PathBuf> {
    let full = format!(
        "{}{}",
        source_root.to_str()?,
        virtual_path
    );
    if full.len() < 3 {
        return None;
    }
    let mut s = full;
    let cut = s.len() - 3;
    s.replace_range(cut.., "r2i");
    Some(PathBuf::from(s))
}

/// Extensions the consumer preloads for; other formats do not probe the
/// way the index helps with.
fn preload_eligible(virtual_path: &str) -> bool {
    let lower = virtual_path.to_ascii_lowercase();
    lower.ends_with(".avi") || lower.ends_with(".mkv")
}

struct EofSink<'a> {
    file: &'a mut std::fs::File,
    archive: &'a Path,
    password: Option<&'a Password>,
    /// Current stream offset.
    coff: u64,
    /// Target offset the tail starts at.
    toff: u64,
    /// Tail bytes written so far.
    size: u64,
    failed: bool,
}

impl StreamSink for EofSink<'_> {
    fn data(&mut self, chunk: &[u8]) -> ControlFlow {
        let mut chunk = chunk;
        if self.coff < self.toff {
            let skip = (self.toff - self.coff).min(chunk.len() as u64) as usize;
            self.coff += skip as u64;
            chunk = &chunk[skip..];
        }
        if !chunk.is_empty() {
            if self.file.write_all(chunk).is_err() {
                self.failed = true;
                return ControlFlow::Cancel;
            }
            self.size += chunk.len() as u64;
            self.coff += chunk.len() as u64;
        }
        ControlFlow::Continue
    }

    fn change_volume(&mut self, next: &Path) -> ControlFlow {
        if next.exists() {
            ControlFlow::Continue
        } else {
            ControlFlow::Cancel
        }
    }

    fn need_password(&mut self) -> Option<Password> {
        crate::password::lookup(self.archive, self.password)
    }
}

/// Produces the sidecar for one member.
///
/// Runs the decoder in test mode, dropping output until the stream
/// reaches `offset` and spooling the rest into the sidecar, then
/// rewrites the header with the final byte count. The sidecar is
/// created exclusively; a concurrent producer loses and backs off. On
/// any failure the partial file is removed.
pub fn extract_index(
    decoder: &dyn Decoder,
    archive_path: &Path,
    member_name: &str,
    offset: u64,
    sidecar: &Path,
    password: Option<&Password>,
) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(sidecar)?;

    let result = (|| -> Result<u64> {
        file.seek(SeekFrom::Start(HEADER_LEN as u64))?;

        let open_password = crate::password::lookup(archive_path, password);
        let mut handle = decoder.open(
            ArchiveSource::Path(archive_path.to_path_buf()),
            open_password,
        )?;
        loop {
            let header = handle.read_header()?.ok_or_else(|| {
                Error::InvalidFormat(format!("member not found: {}", member_name))
            })?;
            if header.is_directory || header.name != member_name {
                handle.skip()?;
                continue;
            }
            let mut sink = EofSink {
                file: &mut file,
                archive: archive_path,
                password,
                coff: 0,
                toff: offset,
                size: 0,
                failed: false,
            };
            handle.process(&mut sink)?;
            if sink.failed {
                return Err(Error::Io(std::io::Error::other("sidecar write failed")));
            }
            return Ok(sink.size);
        }
    })();

    match result {
        Ok(size) => {
            let header = IndexHeader {
                version: R2I_VERSION,
                offset,
                size,
            };
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.to_bytes())?;
            file.sync_data()?;
            debug!(
                "wrote EOF index {} ({} tail bytes from {})",
                sidecar.display(),
                size,
                offset
            );
            Ok(())
        }
        Err(e) => {
            drop(file);
            let _ = std::fs::remove_file(sidecar);
            warn!("EOF index production failed for {}: {}", sidecar.display(), e);
            Err(e)
        }
    }
}

enum IndexBacking {
    Mapped(Mmap),
    File(std::fs::File),
}

/// A sidecar opened for serving reads.
pub struct PreloadedIndex {
    header: IndexHeader,
    backing: IndexBacking,
}

impl PreloadedIndex {
    /// Opens and validates a sidecar file.
    ///
    /// Maps it read-only when possible, falling back to positioned
    /// reads on the open file.
    pub fn open(sidecar: &Path) -> Result<Arc<Self>> {
        let mut file = std::fs::File::open(sidecar)?;
        let (header, backing) = match unsafe { Mmap::map(&file) } {
            Ok(map) => (IndexHeader::parse(&map)?, IndexBacking::Mapped(map)),
            Err(_) => {
                let mut head = [0u8; HEADER_LEN];
                file.read_exact(&mut head)?;
                (IndexHeader::parse(&head)?, IndexBacking::File(file))
            }
        };
        Ok(Arc::new(Self { header, backing }))
    }

    /// Preloads the sidecar for a virtual path, if one exists and the
    /// container format benefits from it.
    pub fn preload(source_root: &Path, virtual_path: &str) -> Option<Arc<Self>> {
        if !preload_eligible(virtual_path) {
            return None;
        }
        let sidecar = sidecar_path(source_root, virtual_path)?;
        match Self::open(&sidecar) {
            Ok(idx) => {
                debug!("preloaded EOF index {}", sidecar.display());
                Some(idx)
            }
            Err(Error::Io(_)) => None,
            Err(e) => {
                warn!("ignoring EOF index {}: {}", sidecar.display(), e);
                None
            }
        }
    }

    /// The validated header.
    pub fn header(&self) -> IndexHeader {
        self.header
    }

    /// Returns `true` if this index can answer a read at `offset`.
    pub fn covers(&self, offset: u64) -> bool {
        offset >= self.header.offset
    }

    /// Serves a read at an absolute member offset.
    ///
    /// `offset` must be at or beyond the header offset; reads past the
    /// stored tail fail rather than fabricate data.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let rel = offset
            .checked_sub(self.header.offset)
            .ok_or_else(|| Error::IndexInvalid("offset before indexed tail".into()))?;
        if rel >= self.header.size {
            return Err(Error::IndexInvalid("offset past indexed tail".into()));
        }
        let avail = (self.header.size - rel) as usize;
        let n = dst.len().min(avail);
        match &self.backing {
            IndexBacking::Mapped(map) => {
                let start = HEADER_LEN + rel as usize;
                let end = (start + n).min(map.len());
                if start >= map.len() {
                    return Err(Error::IndexInvalid("sidecar shorter than header claims".into()));
                }
                let n = end - start;
                dst[..n].copy_from_slice(&map[start..end]);
                Ok(n)
            }
            IndexBacking::File(f) => {
                read_exact_at(f, &mut dst[..n], HEADER_LEN as u64 + rel)?;
                Ok(n)
            }
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)?;
    Ok(())
}

#[cfg(not(unix))]
fn read_exact_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)?;
    Ok(())
}

/// AVI coherence check.
///
/// Multi-part AVI 2.0 stores a second frame count in the OpenDML
/// header. When the `avih` count and the `dmlh` count disagree the
/// muxer did not embed a coherent index, and serving tail bytes would
/// only mislead players; the caller disables `save_eof` for the entry.
///
/// Returns `true` when producing an index remains useful: the head is
/// not RIFF/AVI at all, carries no OpenDML extension, or the two frame
/// counts agree.
pub fn avi_index_coherent(head: &[u8]) -> bool {
    fn le32(b: &[u8], off: usize) -> Option<u32> {
        Some(u32::from_le_bytes(b.get(off..off + 4)?.try_into().ok()?))
    }
    fn tag(b: &[u8], off: usize, t: &[u8]) -> bool {
        b.get(off..off + t.len()).is_some_and(|s| s == t)
    }

    if !tag(head, 0, b"RIFF") || !tag(head, 8, b"AVI ") {
        return true; // not an AVI; nothing to verify
    }
    if !tag(head, 12, b"LIST") {
        return true;
    }
    let Some(list_len) = le32(head, 16) else {
        return true;
    };
    let off_end = list_len as usize + 20;

    if !tag(head, 24, b"avih") {
        return true;
    }
    let Some(avih_len) = le32(head, 28) else {
        return true;
    };
    let Some(first_fc) = le32(head, 48) else {
        return true;
    };

    let mut off = 32 + avih_len as usize;
    while off < off_end {
        off += 4; // chunk fourcc
        let Some(len) = le32(head, off) else {
            return true;
        };
        off += 4;
        if tag(head, off, b"odmldmlh") {
            return match le32(head, off + 12) {
                Some(odml_fc) => odml_fc == first_fc,
                None => true,
            };
        }
        off += len as usize;
    }
    true
}
