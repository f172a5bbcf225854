//! In-memory views of nested archives.
//!
//! An archive stored inside another archive is enumerated and extracted
//! against a *view* of its payload instead of a file on disk. A
//! store-mode payload in a single volume maps read-only straight out of
//! the enclosing volume file; anything else (compressed, encrypted or
//! split) is decoded once into an anonymous spill file, which the OS
//! unlinks on creation so release is automatic.

use std::io::{Read, Seek, SeekFrom, Write};

use log::debug;
use memmap2::Mmap;

use crate::archive::decoder::{
    ArchiveSource, ControlFlow, Decoder, StreamSink,
};
use crate::entry::FileEntry;
use crate::error::{Error, Result};
use crate::password::Password;

/// A `Read + Seek` window over a mapped region of a volume file.
struct MappedSlice {
    map: Mmap,
    start: u64,
    len: u64,
    pos: u64,
}

impl Read for MappedSlice {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let avail = (self.len - self.pos) as usize;
        let n = buf.len().min(avail);
        let from = (self.start + self.pos) as usize;
        buf[..n].copy_from_slice(&self.map[from..from + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MappedSlice {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => self.len as i64 + p,
            SeekFrom::Current(p) => self.pos as i64 + p,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = (target as u64).min(self.len);
        Ok(self.pos)
    }
}

struct SpillSink<'a> {
    file: &'a mut std::fs::File,
    archive: &'a std::path::Path,
    password: Option<&'a Password>,
    failed: bool,
}

impl StreamSink for SpillSink<'_> {
    fn data(&mut self, chunk: &[u8]) -> ControlFlow {
        if self.file.write_all(chunk).is_err() {
            self.failed = true;
            return ControlFlow::Cancel;
        }
        ControlFlow::Continue
    }

    fn change_volume(&mut self, next: &std::path::Path) -> ControlFlow {
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

/// Builds an [`ArchiveSource`] over a nested archive's payload.
///
/// `entry` describes the inner archive as a member of its enclosing
/// volume set: raw single-volume payloads are memory-mapped in place,
/// everything else is decoded into a spill file.
pub fn nested_view(
    decoder: &dyn Decoder,
    entry: &FileEntry,
    password: Option<&Password>,
) -> Result<ArchiveSource> {
    if entry.is_raw() && !entry.is_multipart() {
        let file = std::fs::File::open(&entry.archive_path)?;
        let map = unsafe { Mmap::map(&file) }?;
        let end = entry.offset + entry.stat.size;
        if (map.len() as u64) < end {
            return Err(Error::InvalidFormat(format!(
                "payload of '{}' extends past its volume",
                entry.member_name
            )));
        }
        debug!(
            "mapped nested archive '{}' ({} bytes at {})",
            entry.member_name, entry.stat.size, entry.offset
        );
        return Ok(ArchiveSource::View(Box::new(MappedSlice {
            map,
            start: entry.offset,
            len: entry.stat.size,
            pos: 0,
        })));
    }

    // Compressed, encrypted or split payload: decode once into an
    // anonymous file (already unlinked, so nothing leaks on release).
    let mut spill = tempfile::tempfile()?;
    let open_password = crate::password::lookup(&entry.archive_path, password);
    let mut handle = decoder.open(
        ArchiveSource::Path(entry.archive_path.clone()),
        open_password,
    )?;
    loop {
        let header = handle.read_header()?.ok_or_else(|| {
            Error::InvalidFormat(format!("member not found: {}", entry.member_name))
        })?;
        if header.is_directory || header.name != entry.member_name {
            handle.skip()?;
            continue;
        }
        let mut sink = SpillSink {
            file: &mut spill,
            archive: &entry.archive_path,
            password,
            failed: false,
        };
        handle.process(&mut sink)?;
        if sink.failed {
            return Err(Error::Io(std::io::Error::other("spill write failed")));
        }
        break;
    }
    spill.seek(SeekFrom::Start(0))?;
    debug!("spilled nested archive '{}'", entry.member_name);
    Ok(ArchiveSource::View(Box::new(spill)))
}
