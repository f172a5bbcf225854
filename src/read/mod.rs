//! The read dispatcher's per-mode implementations.
//!
//! The mode is fixed at open time: store-mode members read straight
//! from volume files ([`raw`]), compressed members read through the
//! extractor pipeline ([`rar`]), and `#info` paths serve a formatted
//! header report ([`info`]). Native passthrough and directory handles
//! live with the engine itself.

pub mod info;
pub mod rar;
pub mod raw;

pub use info::InfoReader;
pub use rar::RarReader;
pub use raw::RawReader;
