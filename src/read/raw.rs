//! Raw reads: store-mode members served straight from volume files.
//!
//! No decoder is involved. For a single-volume member the payload is a
//! contiguous range at a known offset. For a multipart member each read
//! offset is translated to a `(volume, chunk)` pair, the right volume
//! file is opened (or fetched from the pre-opened pool), and the seek
//! target is computed from the volume's end-of-data offset, which skips
//! per-volume headers without parsing them.
//!
//! A per-open mutex serialises reads because the file position is
//! shared state; concurrent readers of one open take turns.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, warn};

use crate::entry::{EntryFlags, FileEntry};
use crate::error::Result;
use crate::options::Options;
use crate::volume::{VolumeLayout, nth_name};

struct PreopenedVol {
    file: File,
    pos: u64,
}

struct RawState {
    file: File,
    /// Current volume (relative index); `None` forces a switch on the
    /// first multipart read.
    vno: Option<u32>,
    /// Logical position the current file offset corresponds to.
    pos: u64,
    seq: u32,
    preopened: Vec<PreopenedVol>,
}

/// A per-open raw read context.
pub struct RawReader {
    entry: FileEntry,
    layout: Option<VolumeLayout>,
    state: Mutex<RawState>,
}

impl RawReader {
    /// Opens the member's first volume and, for multipart image files
    /// under the pre-open policy, the rest of the volume chain.
    pub fn open(entry: FileEntry, options: &Options) -> Result<Self> {
        let file = File::open(&entry.archive_path)?;
        let layout = entry
            .is_multipart()
            .then(|| VolumeLayout::from_entry(&entry));

        let mut preopened = Vec::new();
        if options.preopen_img
            && entry.is_multipart()
            && entry.flags.contains(EntryFlags::IMAGE)
        {
            preopened = preopen_volumes(&entry, layout.as_ref().unwrap());
        }

        Ok(Self {
            entry,
            layout,
            state: Mutex::new(RawState {
                file,
                vno: None,
                pos: 0,
                seq: 0,
                preopened,
            }),
        })
    }

    /// The entry this reader serves.
    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }

    /// Reads up to `dst.len()` bytes at `offset`.
    ///
    /// Follows the media-player policy: an offset past EOF reads 0
    /// bytes, a volume that fails to open reads as EOF, and an I/O
    /// error mid-chunk zero-fills the remainder instead of failing the
    /// whole request.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.seq += 1;
        debug!(
            "raw read seq={} offset={} size={}",
            state.seq,
            offset,
            dst.len()
        );

        // The last volume is usually shorter than the rest, so chunk
        // arithmetic alone cannot catch reads past EOF.
        let file_size = self.entry.stat.size;
        if offset >= file_size {
            return Ok(0);
        }
        let mut size = (dst.len() as u64).min(file_size - offset) as usize;

        let mut offset = offset;
        let mut written = 0usize;
        while size > 0 {
            let (chunk, vol) = match &self.layout {
                Some(layout) => {
                    let loc = layout.locate(offset);
                    let mut force_seek = false;
                    if state.vno != Some(loc.vol) {
                        if !self.switch_volume(&mut state, loc.vol) {
                            // A missing volume reads as EOF rather than
                            // an error; players stop cleanly at short
                            // data.
                            return Ok(0);
                        }
                        force_seek = true;
                    }
                    let target = layout.seek_offset(loc);
                    let vol_idx = loc.vol as usize;
                    if let Some(pre) = state.preopened.get_mut(vol_idx) {
                        if pre.pos != target {
                            pre.file.seek(SeekFrom::Start(target))?;
                            pre.pos = target;
                        }
                    } else if force_seek || offset != state.pos {
                        state.file.seek(SeekFrom::Start(target))?;
                    }
                    ((loc.chunk as usize).min(size), Some(loc.vol))
                }
                None => {
                    if offset == 0 || offset != state.pos {
                        let target = offset + self.entry.offset;
                        state.file.seek(SeekFrom::Start(target))?;
                    }
                    (size, None)
                }
            };

            let out = &mut dst[written..written + chunk];
            let n = match self.read_chunk(&mut state, vol, out) {
                Ok(n) => n,
                Err(e) => {
                    // Truncated last volume or transient media error:
                    // zero-fill and report the bytes as read.
                    warn!("raw read error, zero-filling {} bytes: {}", size, e);
                    dst[written..written + size].iter_mut().for_each(|b| *b = 0);
                    written += size;
                    state.pos = offset + size as u64;
                    return Ok(written);
                }
            };
            if n < chunk {
                // EOF inside the chunk: return the short count.
                size = n;
            }
            size -= n;
            offset += n as u64;
            written += n;
            state.pos = offset;
            if let Some(vol) = vol {
                if let Some(pre) = state.preopened.get_mut(vol as usize) {
                    pre.pos += n as u64;
                }
            }
            if n == 0 {
                break;
            }
        }
        Ok(written)
    }

    fn read_chunk(
        &self,
        state: &mut RawState,
        vol: Option<u32>,
        out: &mut [u8],
    ) -> std::io::Result<usize> {
        let file = match vol.map(|v| v as usize) {
            Some(idx) if idx < state.preopened.len() => &mut state.preopened[idx].file,
            _ => &mut state.file,
        };
        let mut total = 0;
        while total < out.len() {
            let n = file.read(&mut out[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Opens the volume holding `vol` (relative index), replacing the
    /// current handle. Returns `false` if the file cannot be opened.
    fn switch_volume(&self, state: &mut RawState, vol: u32) -> bool {
        if (vol as usize) < state.preopened.len() {
            state.vno = Some(vol);
            return true;
        }
        // `vol` is relative to the volume holding the member's first
        // byte, which need not be the set's first volume.
        let Some(name) = self
            .entry
            .archive_path
            .to_str()
            .and_then(|s| nth_name(s, vol + self.entry.extent.vno_first))
        else {
            return false;
        };
        debug!("opening volume {}", name);
        match File::open(PathBuf::from(&name)) {
            Ok(f) => {
                state.file = f;
                state.vno = Some(vol);
                true
            }
            Err(e) => {
                warn!("cannot open volume {}: {}", name, e);
                false
            }
        }
    }
}

/// Pre-opens the member's volume chain with guessed seek positions.
///
/// The position guess is adjusted on first use; stopping at the first
/// missing file bounds the pool at whatever part of the set exists.
fn preopen_volumes(entry: &FileEntry, layout: &VolumeLayout) -> Vec<PreopenedVol> {
    let mut pool = Vec::new();
    let Some(base) = entry.archive_path.to_str() else {
        return pool;
    };
    let mut vol = 0u32;
    loop {
        let Some(name) = nth_name(base, vol + entry.extent.vno_first) else {
            break;
        };
        let Ok(mut file) = File::open(PathBuf::from(&name)) else {
            break;
        };
        let pos = layout.real_size(vol)
            - if vol == 0 { layout.first } else { layout.next };
        if file.seek(SeekFrom::Start(pos)).is_err() {
            break;
        }
        debug!("pre-opened volume {} at {}", name, pos);
        pool.push(PreopenedVol { file, pos });
        vol += 1;
    }
    pool
}
