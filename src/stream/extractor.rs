//! Per-open extractor harness.
//!
//! A compressed open spawns a dedicated task that drives the decoder
//! over the target member, pushing decoded chunks into a bounded pipe.
//! The pipe gives the same two properties the original fork/pipe pair
//! gave: backpressure (a full pipe blocks the decoder) and silent
//! cancellation (a dropped consumer fails the next send, which the data
//! callback turns into a decoder cancel, the `EPIPE` equivalent).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, warn};

use crate::archive::decoder::{
    ArchiveHandle, ArchiveSource, ControlFlow, Decoder, DiscardSink, StreamSink,
};
use crate::error::{Error, Result};
use crate::password::Password;

/// Chunks in flight between the decoder and the reader worker.
const PIPE_DEPTH: usize = 16;

/// How long teardown waits for the extractor task before detaching it.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Read side of the extractor pipe.
pub struct ExtractorPipe {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    consumed: usize,
}

impl Read for ExtractorPipe {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.consumed == self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.consumed = 0;
                }
                Err(_) => return Ok(0), // producer done
            }
        }
        let n = buf.len().min(self.pending.len() - self.consumed);
        buf[..n].copy_from_slice(&self.pending[self.consumed..self.consumed + n]);
        self.consumed += n;
        Ok(n)
    }
}

struct PipeSink<'a> {
    tx: &'a Sender<Vec<u8>>,
    archive: &'a Path,
    password: Option<&'a Password>,
    cancelled: bool,
}

impl StreamSink for PipeSink<'_> {
    fn data(&mut self, chunk: &[u8]) -> ControlFlow {
        match self.tx.send(chunk.to_vec()) {
            Ok(()) => ControlFlow::Continue,
            Err(_) => {
                // Consumer released early; stop quietly.
                self.cancelled = true;
                ControlFlow::Cancel
            }
        }
    }

    fn change_volume(&mut self, next: &Path) -> ControlFlow {
        if next.exists() {
            ControlFlow::Continue
        } else {
            warn!("next volume missing: {}", next.display());
            ControlFlow::Cancel
        }
    }

    fn need_password(&mut self) -> Option<Password> {
        crate::password::lookup(self.archive, self.password)
    }
}

/// Handle of a running extraction.
pub struct Extractor {
    thread: Option<thread::JoinHandle<Result<()>>>,
}

impl Extractor {
    /// Spawns an extractor streaming `member_name` out of `source`.
    ///
    /// Returns the handle plus the read side of the pipe; the caller
    /// hands the pipe to the reader worker.
    pub fn spawn(
        decoder: Arc<dyn Decoder>,
        source: ArchiveSource,
        archive_path: PathBuf,
        member_name: String,
        password: Option<Password>,
    ) -> (Self, ExtractorPipe) {
        let (tx, rx) = bounded::<Vec<u8>>(PIPE_DEPTH);
        let thread = thread::spawn(move || {
            let result = run_extraction(
                decoder.as_ref(),
                source,
                &archive_path,
                &member_name,
                password.as_ref(),
                &tx,
            );
            if let Err(e) = &result {
                debug!(
                    "extractor for '{}' in {} ended: {}",
                    member_name,
                    archive_path.display(),
                    e
                );
            }
            result
        });
        (
            Self {
                thread: Some(thread),
            },
            ExtractorPipe {
                rx,
                pending: Vec::new(),
                consumed: 0,
            },
        )
    }

    /// Reaps the extractor task.
    ///
    /// The pipe consumer must already be dropped so an in-flight send
    /// unblocks and cancels. Waits a bounded time, then detaches; a
    /// decoder stuck in I/O will notice the dead pipe on its next
    /// chunk.
    pub fn reap(mut self) -> Option<Result<()>> {
        let handle = self.thread.take()?;
        let deadline = std::time::Instant::now() + REAP_TIMEOUT;
        while !handle.is_finished() {
            if std::time::Instant::now() >= deadline {
                warn!("extractor did not stop in time; detaching");
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
        match handle.join() {
            Ok(result) => Some(result),
            Err(_) => Some(Err(Error::ExtractorFailed {
                archive: String::new(),
                reason: "extractor panicked".into(),
            })),
        }
    }
}

impl Drop for Extractor {
    fn drop(&mut self) {
        if self.thread.is_some() {
            debug!("extractor dropped without reap; detaching");
        }
    }
}

fn run_extraction(
    decoder: &dyn Decoder,
    source: ArchiveSource,
    archive_path: &Path,
    member_name: &str,
    password: Option<&Password>,
    tx: &Sender<Vec<u8>>,
) -> Result<()> {
    let open_password = crate::password::lookup(archive_path, password);
    let mut handle = decoder.open(source, open_password)?;
    seek_to_member(handle.as_mut(), member_name)?;

    let mut sink = PipeSink {
        tx,
        archive: archive_path,
        password,
        cancelled: false,
    };
    match handle.process(&mut sink) {
        Ok(()) => Ok(()),
        Err(Error::Cancelled) if sink.cancelled => Ok(()),
        Err(e) => Err(e),
    }
}

/// Walks headers until the current member is `member_name`.
fn seek_to_member(handle: &mut dyn ArchiveHandle, member_name: &str) -> Result<()> {
    loop {
        let header = handle
            .read_header()?
            .ok_or_else(|| Error::InvalidFormat(format!("member not found: {}", member_name)))?;
        if !header.is_directory && header.name == member_name {
            return Ok(());
        }
        handle.skip()?;
    }
}

/// Runs a decoder pass over the member without producing any data.
///
/// Surfaces wrong-password and CRC errors before anything is written to
/// the pipe; folder mounts run this once per entry before the first real
/// extraction.
pub fn dry_run(
    decoder: &dyn Decoder,
    source: ArchiveSource,
    archive_path: &Path,
    member_name: &str,
    password: Option<&Password>,
) -> Result<()> {
    struct DrySink<'a> {
        inner: DiscardSink,
        archive: &'a Path,
        password: Option<&'a Password>,
    }
    impl StreamSink for DrySink<'_> {
        fn data(&mut self, chunk: &[u8]) -> ControlFlow {
            self.inner.data(chunk)
        }
        fn change_volume(&mut self, next: &Path) -> ControlFlow {
            self.inner.change_volume(next)
        }
        fn need_password(&mut self) -> Option<Password> {
            crate::password::lookup(self.archive, self.password)
        }
    }

    let open_password = crate::password::lookup(archive_path, password);
    let mut handle = decoder.open(source, open_password)?;
    seek_to_member(handle.as_mut(), member_name)?;
    let mut sink = DrySink {
        inner: DiscardSink,
        archive: archive_path,
        password,
    };
    handle.process(&mut sink)
}
