//! The decoder contract.
//!
//! The RAR decoder itself is consumed as a black box: something that can
//! open an archive, walk its member headers, and stream one member's
//! payload through a data callback. The integrator backs [`Decoder`]
//! with libunrar bindings; tests back it with a mock over synthetic
//! archives. Nothing in this crate depends on how the bytes are
//! actually decoded.
//!
//! Callbacks mirror the decoder ABI: each of the three ([`StreamSink`])
//! may cancel the operation, which the decoder observes as the `-1`
//! sentinel would be observed by the original library.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::password::Password;

/// Combined `Read + Seek` bound for archive payload views.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Where the decoder should read the archive from.
pub enum ArchiveSource {
    /// A volume file on disk; the decoder follows the volume chain.
    Path(PathBuf),
    /// An in-memory or spilled view of a nested archive's payload.
    View(Box<dyn ReadSeek + Send>),
}

impl std::fmt::Debug for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            ArchiveSource::View(_) => f.debug_tuple("View").finish_non_exhaustive(),
        }
    }
}

impl ArchiveSource {
    /// The on-disk path, when the source is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ArchiveSource::Path(p) => Some(p),
            ArchiveSource::View(_) => None,
        }
    }
}

/// Continue/cancel decision returned by every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Keep going.
    Continue,
    /// Abort the operation; the decoder reports cancellation.
    Cancel,
}

/// Callbacks invoked while the decoder processes a member.
pub trait StreamSink {
    /// A chunk of decoded payload. Cancelling here is the normal way a
    /// released consumer stops an extraction mid-stream.
    fn data(&mut self, chunk: &[u8]) -> ControlFlow;

    /// The decoder is about to switch to the next volume file.
    /// Cancelling fails the extraction (volume missing).
    fn change_volume(&mut self, next: &Path) -> ControlFlow;

    /// The decoder needs a password. `None` aborts.
    fn need_password(&mut self) -> Option<Password>;
}

/// Archive-level header flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MainHeader {
    /// Part of a multi-volume set.
    pub volume: bool,
    /// Uses the `.partNN.rar` numbering scheme.
    pub new_numbering: bool,
    /// This file is the set's first volume.
    ///
    /// Unreliable for `.rNN` members of pre-5.x archives; resolution
    /// code verifies candidates instead of trusting this bit alone.
    pub first_volume: bool,
    /// Member headers are encrypted; listing needs a password.
    pub encrypted_headers: bool,
    /// Solid archive (members depend on preceding ones).
    pub solid: bool,
}

/// Host OS recorded in a member header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostOs {
    /// MS-DOS.
    Msdos,
    /// OS/2.
    Os2,
    /// Windows.
    Win32,
    /// Unix-like.
    #[default]
    Unix,
    /// Classic Mac OS.
    MacOs,
    /// BeOS.
    Beos,
}

impl std::fmt::Display for HostOs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HostOs::Msdos => "MS-DOS",
            HostOs::Os2 => "OS/2",
            HostOs::Win32 => "Windows",
            HostOs::Unix => "Unix",
            HostOs::MacOs => "Mac OS",
            HostOs::Beos => "BeOS",
        };
        f.write_str(s)
    }
}

/// Symlink target as flagged in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// UTF-16 encoded target.
    Unicode(Vec<u16>),
    /// Single-byte encoded target.
    Ansi(Vec<u8>),
}

impl LinkTarget {
    /// Decodes the target into a string, best effort for ANSI bytes.
    pub fn decode(&self) -> String {
        match self {
            LinkTarget::Unicode(units) => String::from_utf16_lossy(units),
            LinkTarget::Ansi(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// One member header as the decoder reports it.
#[derive(Debug, Clone, Default)]
pub struct MemberHeader {
    /// Member name; separators as stored (may contain backslashes).
    pub name: String,
    /// Uncompressed size.
    pub unpacked_size: u64,
    /// Compressed size within this volume.
    pub packed_size: u64,
    /// Compression method byte; `0x30` is store.
    pub method: u8,
    /// Directory entry.
    pub is_directory: bool,
    /// Payload is encrypted.
    pub encrypted: bool,
    /// Continuation of a member started in an earlier volume.
    pub split_before: bool,
    /// Member continues into the next volume.
    pub split_after: bool,
    /// Depends on preceding members (solid).
    pub solid: bool,
    /// Unix mode bits when the host stored them, full `st_mode` layout.
    pub unix_mode: Option<u32>,
    /// Creating host OS.
    pub host_os: HostOs,
    /// CRC32 of the uncompressed member.
    pub crc32: u32,
    /// DOS-packed modification time.
    pub dos_time: u32,
    /// Extended unix times `(atime, mtime, ctime)` when present.
    pub unix_times: Option<(i64, i64, i64)>,
    /// Symlink target, present for links.
    pub link_target: Option<LinkTarget>,
    /// Member whose data this entry mirrors (RAR5 file copy).
    pub redirect: Option<String>,
    /// Byte offset of the payload inside the current volume file.
    pub data_offset: u64,
    /// Size of the member's header block.
    pub head_size: u64,
    /// Volume number stored in the header (RAR5), 0-based.
    pub volume_in_header: Option<u32>,
    /// Format version needed to unpack.
    pub unpacked_version: u16,
    /// Dictionary window size in bytes.
    pub window_size: u64,
}

impl MemberHeader {
    /// Returns `true` when the payload appears verbatim in the volumes.
    pub fn is_store(&self) -> bool {
        self.method == crate::entry::METHOD_STORE
    }
}

/// An opened archive being walked.
pub trait ArchiveHandle: Send {
    /// The archive-level flags.
    fn main(&self) -> MainHeader;

    /// Reads the next member header; `None` at end of archive.
    fn read_header(&mut self) -> Result<Option<MemberHeader>>;

    /// Skips the current member's data.
    fn skip(&mut self) -> Result<()>;

    /// Streams the current member's payload through the sink in test
    /// mode (CRC verified, nothing written to disk by the decoder).
    fn process(&mut self, sink: &mut dyn StreamSink) -> Result<()>;
}

/// The black-box decoder library.
pub trait Decoder: Send + Sync {
    /// Opens an archive for header walking and member processing.
    ///
    /// `password` decrypts encrypted headers; member payload passwords
    /// flow through [`StreamSink::need_password`] instead.
    fn open(
        &self,
        source: ArchiveSource,
        password: Option<Password>,
    ) -> Result<Box<dyn ArchiveHandle>>;
}

/// A sink that drops all data; used for dry runs and index scans.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl StreamSink for DiscardSink {
    fn data(&mut self, _chunk: &[u8]) -> ControlFlow {
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
        None
    }
}
