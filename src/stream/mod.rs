//! The compressed read pipeline.
//!
//! Three cooperating pieces serve seekable reads over the decoder's
//! strictly forward output: the [`extractor`] task drives the decoder
//! and feeds a bounded pipe, the [`reader`] worker pumps the pipe into
//! the ring [`iobuffer`], and the dispatcher (in [`crate::read::rar`])
//! consumes the buffer.

pub mod extractor;
pub mod iobuffer;
pub mod reader;

pub use extractor::{Extractor, ExtractorPipe};
pub use iobuffer::{HistoryMode, IoBuffer};
pub use reader::ReaderWorker;

use std::io::Read;
use std::sync::Mutex;

/// The extractor output stream, shared between the reader worker and
/// the dispatcher.
///
/// Both sides fill the ring buffer from it, never concurrently: the
/// worker only while serving a request, the dispatcher only after
/// parking the worker with `SYNC_NOREAD`. The mutex encodes that
/// hand-off; it is never contended.
pub struct StreamSource {
    inner: Mutex<SourceState>,
}

struct SourceState {
    pipe: Box<dyn Read + Send>,
    eof: bool,
}

impl StreamSource {
    /// Wraps the read side of the extractor pipe.
    pub fn new(pipe: Box<dyn Read + Send>) -> Self {
        Self {
            inner: Mutex::new(SourceState { pipe, eof: false }),
        }
    }

    /// Fills the buffer from the stream, preserving history.
    ///
    /// Returns the bytes produced; sets the EOF latch when the stream
    /// ends while buffer space was still available.
    pub fn fill(&self, buf: &IoBuffer) -> std::io::Result<usize> {
        let mut state = self.inner.lock().unwrap();
        if state.eof {
            return Ok(0);
        }
        let space = buf.space_left();
        if space == 0 {
            return Ok(0);
        }
        let n = buf.write_from(&mut *state.pipe, HistoryMode::Keep)?;
        if n == 0 {
            state.eof = true;
        }
        Ok(n)
    }

    /// Returns `true` once the extractor stream has ended.
    pub fn at_eof(&self) -> bool {
        self.inner.lock().unwrap().eof
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("eof", &self.at_eof())
            .finish()
    }
}
