//! Background dircache warmup.
//!
//! Folder mounts can pre-populate the directory cache by walking the
//! source tree once in the background, so the first interactive
//! `readdir` of a big collection does not pay the enumeration cost.
//! The walk checks a cancellation flag before each directory and drains
//! promptly on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{debug, warn};

use crate::engine::Engine;

/// Handle of a running warmup walk.
pub struct Warmup {
    cancel: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<usize>>,
}

impl Warmup {
    /// Starts the walk over the engine's virtual root, descending at
    /// most `max_depth` directory levels (0 means just the root).
    pub fn start(engine: Arc<Engine>, max_depth: usize) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let thread = thread::spawn(move || {
            let mut visited = 0usize;
            let mut queue = vec![("/".to_string(), 0usize)];
            while let Some((dir, depth)) = queue.pop() {
                if flag.load(Ordering::Relaxed) {
                    debug!("warmup cancelled after {} directories", visited);
                    break;
                }
                let listing = match engine.readdir(&dir) {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("warmup skipping {}: {}", dir, e);
                        continue;
                    }
                };
                visited += 1;
                if depth < max_depth {
                    for (name, stat) in listing {
                        if stat.map(|s| s.is_dir()).unwrap_or(false) {
                            let sub = if dir == "/" {
                                format!("/{}", name)
                            } else {
                                format!("{}/{}", dir, name)
                            };
                            queue.push((sub, depth + 1));
                        }
                    }
                }
            }
            debug!("warmup finished, {} directories", visited);
            visited
        });
        Self {
            cancel,
            thread: Some(thread),
        }
    }

    /// Cancels the walk and waits for it to drain.
    ///
    /// Returns the number of directories populated.
    pub fn stop(mut self) -> usize {
        self.cancel.store(true, Ordering::Relaxed);
        self.thread
            .take()
            .and_then(|t| t.join().ok())
            .unwrap_or(0)
    }

    /// Returns `true` once the walk has completed on its own.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }
}

impl Drop for Warmup {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}
