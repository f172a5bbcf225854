//! Compressed reads: seekable semantics over the extractor's forward-only
//! output.
//!
//! The dispatcher reconciles each requested offset with the stream
//! position the pipeline has reached:
//!
//! - short forward seeks wait for the reader worker to fill the buffer;
//! - backward seeks inside the history window replay already-produced
//!   bytes without touching the extractor;
//! - backward seeks beyond the window fail closed with `EIO`;
//! - early probes near end-of-file are answered from the `.r2i` sidecar
//!   (producing it on the fly when `save_eof` is set) or zero-filled
//!   with `direct_io` latched so the fake pages never stick in the
//!   kernel cache;
//! - mid-stream long jumps during the first reads (the multi-part
//!   AVI 2.0 pattern) get the same zero-fill treatment.
//!
//! Reads of one open are serialised by the dispatcher mutex and
//! linearisable against each other; separate opens of the same path
//! have independent pipelines and no ordering contract.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::archive::decoder::{ArchiveSource, Decoder};
use crate::cache::FileCache;
use crate::entry::{EntryFlags, FileEntry};
use crate::error::{Error, Result};
use crate::index::{PreloadedIndex, avi_index_coherent, extract_index, sidecar_path};
use crate::options::Options;
use crate::password::Password;
use crate::stream::extractor::Extractor;
use crate::stream::reader::ReaderWorker;
use crate::stream::{IoBuffer, StreamSource};

/// Reads after open during which a near-EOF probe is honoured.
const EOF_PROBE_SEQ_LIMIT: u32 = 10;

/// Reads after open during which a mid-stream long jump is zero-filled.
const LONG_JUMP_SEQ_LIMIT: u32 = 25;

/// Bytes of stream head inspected by the AVI coherence check.
const AVI_PROBE_LEN: usize = 64 * 1024;

struct DispatchState {
    pos: u64,
    seq: u32,
}

/// Dependencies a compressed open needs from the engine.
pub struct RarOpenContext {
    /// The decoder library.
    pub decoder: Arc<dyn Decoder>,
    /// Root of the source directory (sidecars live under it).
    pub source_root: PathBuf,
    /// The shared filecache, for latching lifecycle flags back.
    pub filecache: Arc<FileCache>,
    /// Configured password override for this archive, if any.
    pub password: Option<Password>,
    /// Engine-wide termination flag.
    pub shutdown: Arc<AtomicBool>,
}

/// A per-open compressed read context.
pub struct RarReader {
    entry: Mutex<FileEntry>,
    size: u64,
    encrypted: bool,
    buf: Arc<IoBuffer>,
    source: Arc<StreamSource>,
    worker: ReaderWorker,
    extractor: Option<Extractor>,
    index: Mutex<Option<Arc<PreloadedIndex>>>,
    state: Mutex<DispatchState>,
    decoder: Arc<dyn Decoder>,
    source_root: PathBuf,
    filecache: Arc<FileCache>,
    password: Option<Password>,
    direct_io: AtomicBool,
}

impl RarReader {
    /// Spawns the extractor and reader worker for one member and
    /// prepares the EOF-index state.
    pub fn open(entry: FileEntry, source: ArchiveSource, ctx: RarOpenContext, options: &Options) -> Result<Self> {
        let buf = Arc::new(IoBuffer::new(options.iob_capacity, options.history_pct));
        let (extractor, pipe) = Extractor::spawn(
            ctx.decoder.clone(),
            source,
            entry.archive_path.clone(),
            entry.member_name.clone(),
            ctx.password.clone(),
        );
        let stream = Arc::new(StreamSource::new(Box::new(pipe)));
        let worker = ReaderWorker::spawn(buf.clone(), stream.clone(), ctx.shutdown.clone());
        // Start filling right away, like the pipeline always has.
        worker.wake();

        let mut entry = entry;
        let preloaded = PreloadedIndex::preload(&ctx.source_root, &entry.name);
        if preloaded.is_some() {
            // With a sidecar on disk there is nothing left to produce
            // and no fake data will ever be served.
            entry.flags.remove(EntryFlags::SAVE_EOF | EntryFlags::DIRECT_IO);
        } else if options.save_eof && !entry.flags.contains(EntryFlags::SAVE_EOF) {
            entry.flags.insert(EntryFlags::SAVE_EOF);
            entry.flags.remove(EntryFlags::AVI_TESTED);
        }

        let reader = Self {
            size: entry.stat.size,
            encrypted: entry.flags.contains(EntryFlags::ENCRYPTED),
            buf,
            source: stream,
            worker,
            extractor: Some(extractor),
            index: Mutex::new(preloaded),
            state: Mutex::new(DispatchState { pos: 0, seq: 0 }),
            decoder: ctx.decoder,
            source_root: ctx.source_root,
            filecache: ctx.filecache,
            password: ctx.password,
            direct_io: AtomicBool::new(false),
            entry: Mutex::new(entry),
        };
        reader.run_avi_check();
        reader.store_entry_flags();
        Ok(reader)
    }

    /// Whether fake data has been served and the kernel cache must be
    /// bypassed from now on.
    pub fn wants_direct_io(&self) -> bool {
        self.direct_io.load(Ordering::Relaxed)
    }

    /// The member's apparent size.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn entry_flag(&self, flag: EntryFlags) -> bool {
        self.entry.lock().unwrap().flags.contains(flag)
    }

    fn update_flags(&self, set: EntryFlags, clear: EntryFlags) {
        let (name, flags) = {
            let mut entry = self.entry.lock().unwrap();
            entry.flags.insert(set);
            entry.flags.remove(clear);
            (entry.name.clone(), entry.flags)
        };
        // Mirror into the shared cache so later opens inherit the
        // lifecycle bits.
        if let Some(cached) = self.filecache.get(&name) {
            let mut copy = (*cached).clone();
            copy.flags = flags;
            self.filecache.insert(copy);
        }
    }

    fn store_entry_flags(&self) {
        self.update_flags(EntryFlags::empty(), EntryFlags::empty());
    }

    /// One-time AVI coherence probe over the stream head.
    fn run_avi_check(&self) {
        if !self.entry_flag(EntryFlags::SAVE_EOF) || self.entry_flag(EntryFlags::AVI_TESTED) {
            return;
        }
        self.worker.sync_read();
        let probe = AVI_PROBE_LEN.min(self.buf.capacity());
        let mut head = vec![0u8; probe];
        self.buf.copy_at(&mut head, 0);
        if avi_index_coherent(&head) {
            self.update_flags(EntryFlags::AVI_TESTED, EntryFlags::empty());
        } else {
            debug!("incoherent AVI index; disabling EOF-index production");
            self.update_flags(EntryFlags::AVI_TESTED, EntryFlags::SAVE_EOF);
        }
    }

    fn latch_direct_io(&self) {
        self.direct_io.store(true, Ordering::Relaxed);
        self.update_flags(EntryFlags::DIRECT_IO, EntryFlags::empty());
    }

    fn probe_is_near_eof(&self, offset: u64) -> bool {
        (offset as u128) * 100 >= (self.size as u128) * 95
    }

    /// Produces the `.r2i` sidecar for a probe at `offset` and swaps it
    /// in. `save_eof` is cleared first so a failing production is never
    /// retried.
    fn produce_index(&self, offset: u64) -> bool {
        self.update_flags(EntryFlags::empty(), EntryFlags::SAVE_EOF);
        let (archive_path, member_name, name) = {
            let entry = self.entry.lock().unwrap();
            (
                entry.archive_path.clone(),
                entry.member_name.clone(),
                entry.name.clone(),
            )
        };
        let Some(sidecar) = sidecar_path(&self.source_root, &name) else {
            return false;
        };
        if extract_index(
            self.decoder.as_ref(),
            &archive_path,
            &member_name,
            offset,
            &sidecar,
            self.password.as_ref(),
        )
        .is_err()
        {
            return false;
        }
        match PreloadedIndex::open(&sidecar) {
            Ok(idx) => {
                *self.index.lock().unwrap() = Some(idx);
                true
            }
            Err(e) => {
                warn!("produced sidecar failed to load: {}", e);
                false
            }
        }
    }

    /// Reads up to `dst.len()` bytes at `offset`.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        st.seq += 1;
        debug!(
            "rar read seq={} offset={}/{} size={}",
            st.seq,
            offset,
            st.pos,
            dst.len()
        );

        if offset >= self.size {
            return Ok(0);
        }
        let mut size = (dst.len() as u64).min(self.size - offset) as usize;
        let mut offset = offset;
        let mut written = 0usize;

        if offset != st.pos {
            loop {
                // Index data answers any offset it covers, at any time.
                let index = self.index.lock().unwrap().clone();
                if let Some(idx) = index {
                    if idx.covers(offset) {
                        let n = idx.read_at(&mut dst[written..written + size], offset)?;
                        return Ok(written + n);
                    }
                }

                if offset < st.pos {
                    let distance = st.pos - offset;
                    if distance <= self.buf.history_size() as u64 {
                        // Replay from the history window; any remainder
                        // past the stream position continues below.
                        let chunk = if offset + size as u64 > st.pos {
                            distance as usize
                        } else {
                            size
                        };
                        let copied = self
                            .buf
                            .copy_at(&mut dst[written..written + chunk], offset as usize);
                        written += copied;
                        offset += copied as u64;
                        size -= copied;
                        break;
                    }
                    return Err(Error::SeekOutOfWindow { offset, distance });
                }

                if self.probe_is_near_eof(offset) && st.seq < EOF_PROBE_SEQ_LIMIT {
                    // A player asking for container index data. Serve it
                    // from a sidecar when we may produce one, otherwise
                    // fake it and keep the kernel cache out of the way.
                    st.seq -= 1;
                    if self.entry_flag(EntryFlags::SAVE_EOF) && self.produce_index(offset) {
                        st.seq += 1;
                        continue;
                    }
                    self.latch_direct_io();
                    dst[written..written + size].fill(0);
                    return Ok(written + size);
                }
                break;
            }
        }

        if size == 0 {
            return Ok(written);
        }

        // Wait for the stream to reach the requested range. Needing this
        // often means the buffer is undersized for the access pattern.
        if offset + size as u64 > self.buf.produced() {
            self.worker.sync_read();
            if self.buf.produced() == 0 {
                // Nothing ever arrived; for encrypted members the usual
                // cause is a missing or wrong password.
                let archive = self.entry.lock().unwrap().archive_path.clone();
                return Err(if self.encrypted {
                    Error::WrongPassword {
                        archive: archive.display().to_string(),
                    }
                } else {
                    Error::BufferStarved
                });
            }
        }

        if offset + size as u64 > self.buf.produced() {
            let produced = self.buf.produced();
            if offset >= produced
                && st.seq < LONG_JUMP_SEQ_LIMIT
                && (offset + size as u64) - produced
                    > (self.buf.capacity() - self.buf.history_size()) as u64
            {
                // An early jump far past the stream position: taking it
                // would ruin the stream for continued playback
                // (multi-part AVI 2.0 does this). Best effort instead.
                debug!(
                    "long jump seq={} offset={} produced={}",
                    st.seq, offset, produced
                );
                st.seq -= 1;
                self.latch_direct_io();
                dst[written..written + size].fill(0);
                return Ok(written + size);
            }

            // Catch up under dispatcher control: park the worker, then
            // consume and refill until aligned with the target.
            self.worker.sync_noread();
            while !self.source.at_eof() && offset > self.buf.produced() {
                st.pos += self.buf.consume_all() as u64;
                if let Err(e) = self.source.fill(&self.buf) {
                    warn!("stream fill failed during catch-up: {}", e);
                    break;
                }
                std::thread::yield_now();
            }
            if !self.source.at_eof() {
                let skip = (offset - st.pos) as usize;
                let discarded = self.buf.discard(skip);
                st.pos += discarded as u64;
                if self.buf.produced().saturating_sub(offset) < size as u64 {
                    let _ = self.source.fill(&self.buf);
                }
            }
        }

        let skip = (offset - st.pos) as usize;
        let copied = self.buf.read_into(&mut dst[written..written + size], skip);
        st.pos = offset + copied as u64;
        written += copied;
        self.worker.wake();
        Ok(written)
    }

    /// Tears the pipeline down: terminates the worker, closes the pipe
    /// consumer and reaps the extractor.
    pub fn close(mut self) -> Result<()> {
        let extractor = self.extractor.take();
        drop(self); // joins the worker, drops the pipe consumer
        if let Some(extractor) = extractor {
            match extractor.reap() {
                Some(Err(e)) => debug!("extractor finished with: {}", e),
                Some(Ok(())) => {}
                None => {}
            }
        }
        Ok(())
    }
}
