//! # rarfs
//!
//! The streaming read engine behind a RAR-backed virtual filesystem:
//! mount a directory (or a single archive) and read the files that
//! physically exist only inside RAR volumes — multi-volume sets,
//! encrypted archives and store-mode archives included — with ordinary
//! `open`/`read`/`seek` semantics.
//!
//! This crate is the core, not the mount tool. The FUSE binding, the
//! libunrar bindings behind the [`Decoder`] trait, option and config
//! parsing, and signal installation are integrator-side; the engine
//! exposes exactly the operations those layers call.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rarfs::{Engine, Options, OverrideTable};
//! use std::sync::Arc;
//!
//! // `decoder` is your libunrar-backed implementation of rarfs::Decoder.
//! let engine = Engine::new(decoder, "/media/library", Options::default(),
//!     OverrideTable::new())?;
//!
//! for (name, _stat) in engine.readdir("/")? {
//!     println!("{}", name);
//! }
//!
//! let handle = engine.open("/show/episode.mkv", false)?;
//! let mut buf = vec![0u8; 1 << 16];
//! let n = engine.read(&handle, &mut buf, 0)?;
//! engine.release(handle)?;
//! # rarfs::Result::Ok(())
//! ```
//!
//! ## How reads work
//!
//! Store-mode members are read straight out of the volume files: a
//! logical offset maps to a `(volume, physical offset)` pair that skips
//! per-volume headers, so no decoding happens at all. Compressed
//! members stream through a per-open extractor task into a ring buffer
//! with a history window; short backward seeks replay from the window,
//! near-EOF probes are answered from a `.r2i` sidecar (produced on
//! first demand when enabled), and everything else follows the decoder
//! forward.
//!
//! ## Concurrency
//!
//! The filecache and dircache are shared per engine behind their own
//! locks; every open carries an independent pipeline (extractor task,
//! reader worker, buffer) or its own file handle. Reads within one open
//! are linearisable; opens do not order against each other.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod archive;
pub mod cache;
pub mod engine;
pub mod entry;
pub mod error;
pub mod index;
pub mod options;
pub mod password;
pub mod read;
pub mod stream;
pub mod timestamp;
pub mod volume;
pub mod warmup;

pub use engine::{Engine, Handle, INFO_SUFFIX, MountType};
pub use error::{Error, Result};

// Re-export the decoder contract at the crate root; integrators
// implement these.
pub use archive::decoder::{
    ArchiveHandle, ArchiveSource, ControlFlow, Decoder, HostOs, LinkTarget, MainHeader,
    MemberHeader, StreamSink,
};

// Re-export the metadata types bindings consume.
pub use entry::{EntryFlags, EntryStat, FileEntry};
pub use options::{ArchiveOverrides, Options, OverrideTable};
pub use password::Password;
pub use warmup::Warmup;
