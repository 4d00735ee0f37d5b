//! Shared utilities for skein CLI binaries.
//!
//! Log level selection and logger setup, plus the byte and number
//! formatting used in progress and summary output.

pub mod args;
pub mod format;
pub mod logging;

pub use args::LogLevel;
pub use format::{format_bytes, format_number, parse_byte_size};
pub use logging::init_logging;
