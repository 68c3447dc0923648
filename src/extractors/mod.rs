//! Request extractors.

pub mod options;
pub use options::{HeaderOptions, OPTION_HEADERS};
