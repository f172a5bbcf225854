//! Multi-volume set arithmetic.
//!
//! Two independent concerns live here: mapping between volume indices and
//! volume *filenames* under both RAR numbering schemes ([`name`]), and
//! mapping a member's logical byte offset to a `(volume, chunk)` pair
//! ([`layout`]).

pub mod layout;
pub mod name;

pub use layout::{VolumeLayout, VolumeLocation};
pub use name::{VolumeFormat, VolumeScheme, first_name, nth_name, parse};
