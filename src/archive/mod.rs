//! Archive access: the decoder contract, the header enumerator and
//! nested-archive payload views.

pub mod decoder;
pub mod enumerate;
pub mod nested;

pub use decoder::{
    ArchiveHandle, ArchiveSource, ControlFlow, Decoder, HostOs, LinkTarget, MainHeader,
    MemberHeader, StreamSink,
};
pub use enumerate::{Enumerator, is_archive_candidate};
pub use nested::nested_view;
