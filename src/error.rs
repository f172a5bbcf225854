//! Error types for the read engine.
//!
//! This module provides the [`Error`] enum which represents all failure
//! modes of path resolution, enumeration and the read paths, along with a
//! convenient [`Result<T>`] type alias.
//!
//! The FUSE binding translates errors to negative errno values through
//! [`Error::errno`]; the mapping follows the engine's compatibility
//! contract (wrong password reads as `EPERM`, a backward seek out of the
//! history window as `EIO`, and so on).

use std::io;

/// The main error type for engine operations.
///
/// Variants carry enough context to diagnose which archive, volume or
/// entry misbehaved. Errors are grouped roughly by origin:
///
/// | Category | Variants |
/// |----------|----------|
/// | I/O | [`Io`][Self::Io] |
/// | Resolution | [`NotFound`][Self::NotFound], [`NotADirectory`][Self::NotADirectory] |
/// | Permission | [`ReadOnly`][Self::ReadOnly] |
/// | Archive format | [`InvalidFormat`][Self::InvalidFormat], [`VolumeMissing`][Self::VolumeMissing] |
/// | Encryption | [`WrongPassword`][Self::WrongPassword], [`PasswordRequired`][Self::PasswordRequired] |
/// | Streaming | [`SeekOutOfWindow`][Self::SeekOutOfWindow], [`ExtractorFailed`][Self::ExtractorFailed], [`BufferStarved`][Self::BufferStarved] |
/// | EOF index | [`IndexUnsupported`][Self::IndexUnsupported], [`IndexInvalid`][Self::IndexInvalid] |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on the source directory or a volume file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The path does not resolve to a local file or an archive member.
    #[error("No such entry: {path}")]
    NotFound {
        /// The virtual path that failed to resolve.
        path: String,
    },

    /// A directory operation was attempted on a non-directory entry.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// The offending virtual path.
        path: String,
    },

    /// A write-mode operation targeted an in-archive entry.
    ///
    /// Members of mounted archives are strictly read-only; open with write
    /// intent, truncate, and every mutating operation report this error.
    #[error("Archive members are read-only: {path}")]
    ReadOnly {
        /// The virtual path of the archive member.
        path: String,
    },

    /// An archive failed to parse.
    ///
    /// The string describes what was expected vs. found. During directory
    /// enumeration this error is non-fatal: the archive is skipped and the
    /// listing continues with whatever was collected.
    #[error("Invalid archive: {0}")]
    InvalidFormat(String),

    /// A volume file of a multi-volume set cannot be opened.
    #[error("Volume {volume} missing: expected at '{path}'")]
    VolumeMissing {
        /// The volume index (0-based) that is missing.
        volume: u32,
        /// The expected path of the missing volume.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The password is missing and the archive payload is encrypted.
    #[error("password required for encrypted archive '{archive}'")]
    PasswordRequired {
        /// The archive that demanded a password.
        archive: String,
    },

    /// The supplied password failed to decrypt the payload.
    ///
    /// Detected either by the dry-run check at open time or by the output
    /// buffer never filling after the extractor started.
    #[error("wrong password for archive '{archive}'")]
    WrongPassword {
        /// The archive the password was tried against.
        archive: String,
    },

    /// A backward seek reached beyond the history window.
    ///
    /// Compressed streams cannot rewind; only the trailing
    /// history-window bytes of already-produced output are replayable.
    #[error("seek to {offset} is {distance} bytes behind the stream, beyond the history window")]
    SeekOutOfWindow {
        /// The requested logical offset.
        offset: u64,
        /// How far behind the current stream position the request ended.
        distance: u64,
    },

    /// The extractor task terminated abnormally.
    #[error("extractor failed for '{archive}': {reason}")]
    ExtractorFailed {
        /// The archive being extracted.
        archive: String,
        /// A description of the failure.
        reason: String,
    },

    /// A synchronous fill completed without producing any data.
    ///
    /// Reported when the ring buffer stays empty after `SYNC_READ` even
    /// though end of stream was not reached.
    #[error("stream buffer never filled")]
    BufferStarved,

    /// The EOF-index sidecar uses an unsupported version.
    ///
    /// Version 0 headers predate the endian-stable layout and are
    /// always rejected.
    #[error("unsupported EOF-index version {version}")]
    IndexUnsupported {
        /// The version field found in the sidecar header.
        version: u16,
    },

    /// The EOF-index sidecar is malformed or does not cover the request.
    #[error("invalid EOF-index: {0}")]
    IndexInvalid(String),

    /// The operation was cancelled by engine shutdown.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the negative errno the FUSE binding should report.
    ///
    /// Policy decisions from the read contract are encoded here: wrong or
    /// missing passwords surface as `EPERM` on read, out-of-window seeks
    /// and extractor failures as `EIO`.
    pub fn errno(&self) -> i32 {
        const EPERM: i32 = 1;
        const ENOENT: i32 = 2;
        const EIO: i32 = 5;
        const ENOTDIR: i32 = 20;

        match self {
            Error::Io(e) => -e.raw_os_error().unwrap_or(EIO),
            Error::NotFound { .. } => -ENOENT,
            Error::NotADirectory { .. } => -ENOTDIR,
            Error::ReadOnly { .. } => -EPERM,
            Error::PasswordRequired { .. } | Error::WrongPassword { .. } => -EPERM,
            _ => -EIO,
        }
    }

    /// Returns `true` if this is an encryption-related error.
    pub fn is_encryption_error(&self) -> bool {
        matches!(
            self,
            Error::WrongPassword { .. } | Error::PasswordRequired { .. }
        )
    }

    /// Returns `true` if the error is non-fatal during enumeration.
    ///
    /// Such errors skip the offending archive and keep the partial
    /// listing already collected.
    pub fn is_listing_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat(_) | Error::VolumeMissing { .. } | Error::WrongPassword { .. }
        )
    }
}

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_errno_mapping() {
        let err = Error::NotFound { path: "/a/b".into() };
        assert_eq!(err.errno(), -2);

        let err = Error::ReadOnly {
            path: "/arc/file".into(),
        };
        assert_eq!(err.errno(), -1);

        let err = Error::WrongPassword {
            archive: "x.rar".into(),
        };
        assert_eq!(err.errno(), -1);

        let err = Error::SeekOutOfWindow {
            offset: 0,
            distance: 4096,
        };
        assert_eq!(err.errno(), -5);

        let err = Error::BufferStarved;
        assert_eq!(err.errno(), -5);
    }

    #[test]
    fn test_is_encryption_error() {
        assert!(
            Error::WrongPassword {
                archive: "a".into()
            }
            .is_encryption_error()
        );
        assert!(
            Error::PasswordRequired {
                archive: "a".into()
            }
            .is_encryption_error()
        );
        assert!(!Error::BufferStarved.is_encryption_error());
    }

    #[test]
    fn test_listing_errors_are_non_fatal() {
        assert!(Error::InvalidFormat("bad signature".into()).is_listing_error());
        assert!(!Error::NotFound { path: "/x".into() }.is_listing_error());
    }

    #[test]
    fn test_volume_missing_source_chain() {
        let err = Error::VolumeMissing {
            volume: 2,
            path: "a.part03.rar".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("a.part03.rar"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
