//! Single-producer single-consumer ring buffer with a history window.
//!
//! The buffer decouples the extractor's unidirectional output from the
//! read dispatcher. Capacity is a power of two; one slot stays unused to
//! disambiguate full from empty. A configurable trailing portion of
//! already-consumed bytes (the *history window*) is preserved behind the
//! read index so short backward seeks can be served without touching the
//! extractor.
//!
//! Index updates happen under a mutex; the payload region is read and
//! written outside it. This is sound only under the buffer's usage
//! contract: exactly one producer (the reader worker) appending at the
//! write index, exactly one consumer (the dispatcher) advancing the read
//! index, and the repositioning calls ([`consume_all`], [`discard`])
//! issued only while the producer is parked. The producer never writes
//! into the history reserve, so [`copy_at`] stays within bytes no one
//! mutates.
//!
//! [`consume_all`]: IoBuffer::consume_all
//! [`discard`]: IoBuffer::discard
//! [`copy_at`]: IoBuffer::copy_at

use std::cell::UnsafeCell;
use std::io::Read;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default buffer capacity (4 MiB).
pub const IOB_SZ_DEFAULT: usize = 4 * 1024 * 1024;

/// Default history share of the capacity, in percent.
pub const IOB_HIST_PCT_DEFAULT: u32 = 50;

/// Whether a fill may overwrite the history window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// Reserve the history window; fill at most `capacity − history − 1`.
    Keep,
    /// Use the whole buffer minus the sentinel slot.
    Discard,
}

#[derive(Debug, Default)]
struct Indices {
    ri: usize,
    wi: usize,
    used: usize,
}

/// The ring buffer.
pub struct IoBuffer {
    data: UnsafeCell<Box<[u8]>>,
    mask: usize,
    hist: usize,
    idx: Mutex<Indices>,
    /// Total bytes ever produced into the buffer; monotonic.
    offset: AtomicU64,
}

// Payload access outside the mutex follows the SPSC contract described
// in the module docs.
unsafe impl Sync for IoBuffer {}
unsafe impl Send for IoBuffer {}

impl IoBuffer {
    /// Creates a buffer with capacity rounded up to a power of two and a
    /// history window of `hist_pct` percent of the capacity.
    pub fn new(capacity: usize, hist_pct: u32) -> Self {
        let capacity = capacity.max(4096).next_power_of_two();
        let hist = (capacity as u64 * u64::from(hist_pct.min(100)) / 100) as usize;
        Self {
            data: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            mask: capacity - 1,
            hist,
            idx: Mutex::new(Indices::default()),
            offset: AtomicU64::new(0),
        }
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// History window size in bytes.
    pub fn history_size(&self) -> usize {
        self.hist
    }

    /// Bytes currently readable.
    pub fn used(&self) -> usize {
        self.idx.lock().unwrap().used
    }

    /// Total bytes produced into the buffer since creation.
    pub fn produced(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    fn data_ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    /// Pulls bytes from `src` into the buffer. Producer side.
    ///
    /// Fills up to the free space (minus the history reserve under
    /// [`HistoryMode::Keep`]) and publishes the new write index once.
    /// Returns the number of bytes produced; `Ok(0)` means either no
    /// space or end of stream — the caller distinguishes via
    /// [`space_left`](Self::space_left).
    pub fn write_from(&self, src: &mut dyn Read, hist: HistoryMode) -> std::io::Result<usize> {
        let (mut lwi, lri) = {
            let idx = self.idx.lock().unwrap();
            (idx.wi, idx.ri)
        };
        let capacity = self.capacity();
        let mut left = capacity - ((lwi.wrapping_sub(lri)) & self.mask) - 1;
        if self.hist > 0 && hist == HistoryMode::Keep {
            left = left.saturating_sub(self.hist);
            if left == 0 {
                return Ok(0);
            }
        }

        let mut total = 0usize;
        while left > 0 {
            let chunk = (capacity - lwi).min(left);
            let dst = unsafe { std::slice::from_raw_parts_mut(self.data_ptr().add(lwi), chunk) };
            let n = src.read(dst)?;
            if n == 0 {
                break;
            }
            left -= n;
            lwi = (lwi + n) & self.mask;
            total += n;
        }

        {
            let mut idx = self.idx.lock().unwrap();
            idx.wi = lwi;
            // ri may have moved while we were reading.
            idx.used = lwi.wrapping_sub(idx.ri) & self.mask;
        }
        self.offset.fetch_add(total as u64, Ordering::Release);
        Ok(total)
    }

    /// Free space available to the producer under history reservation.
    pub fn space_left(&self) -> usize {
        let idx = self.idx.lock().unwrap();
        let left = self.capacity() - idx.used - 1;
        left.saturating_sub(self.hist)
    }

    /// Consumes bytes from the read index into `dst`. Consumer side.
    ///
    /// Skips `skip` buffered bytes first (consuming them), then copies up
    /// to `dst.len()` bytes. Returns the bytes copied into `dst`.
    pub fn read_into(&self, dst: &mut [u8], skip: usize) -> usize {
        let (mut lri, mut avail) = {
            let idx = self.idx.lock().unwrap();
            (idx.ri, idx.used)
        };
        let skipped = skip.min(avail);
        lri = (lri + skipped) & self.mask;
        avail -= skipped;

        let size = dst.len().min(avail);
        let mut copied = 0usize;
        while copied < size {
            let chunk = (self.capacity() - lri).min(size - copied);
            let src = unsafe { std::slice::from_raw_parts(self.data_ptr().add(lri), chunk) };
            dst[copied..copied + chunk].copy_from_slice(src);
            lri = (lri + chunk) & self.mask;
            copied += chunk;
        }

        let mut idx = self.idx.lock().unwrap();
        idx.ri = lri;
        idx.used = idx.wi.wrapping_sub(lri) & self.mask;
        copied
    }

    /// Copies bytes starting at absolute buffer position `pos` without
    /// touching any index. Serves backward reads inside the history
    /// window; `pos` is the target stream offset masked by the caller.
    pub fn copy_at(&self, dst: &mut [u8], pos: usize) -> usize {
        let _guard = self.idx.lock().unwrap();
        let mut pos = pos & self.mask;
        let mut copied = 0usize;
        while copied < dst.len() {
            let chunk = (self.capacity() - pos).min(dst.len() - copied);
            let src = unsafe { std::slice::from_raw_parts(self.data_ptr().add(pos), chunk) };
            dst[copied..copied + chunk].copy_from_slice(src);
            pos = (pos + chunk) & self.mask;
            copied += chunk;
        }
        copied
    }

    /// Consumes everything buffered; returns the number of bytes dropped.
    ///
    /// Repositioning hook — only valid while the producer is parked.
    pub fn consume_all(&self) -> usize {
        let mut idx = self.idx.lock().unwrap();
        let dropped = idx.used;
        idx.ri = idx.wi;
        idx.used = 0;
        dropped
    }

    /// Consumes `n` buffered bytes without copying them anywhere.
    ///
    /// Repositioning hook — only valid while the producer is parked.
    pub fn discard(&self, n: usize) -> usize {
        let mut idx = self.idx.lock().unwrap();
        let n = n.min(idx.used);
        idx.ri = (idx.ri + n) & self.mask;
        idx.used -= n;
        n
    }
}

impl std::fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let idx = self.idx.lock().unwrap();
        f.debug_struct("IoBuffer")
            .field("capacity", &self.capacity())
            .field("history", &self.hist)
            .field("ri", &idx.ri)
            .field("wi", &idx.wi)
            .field("used", &idx.used)
            .field("produced", &self.offset.load(Ordering::Relaxed))
            .finish()
    }
}
