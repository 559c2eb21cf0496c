#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for I/O operations.
///
/// Defines [`IoError`] variants for file access and JPEG encoding/decoding failures.
pub mod error;

/// JPEG image encoding and decoding.
///
/// Pure Rust JPEG codec for reading and writing RGB images.
pub mod jpeg;

/// Enumeration of the JPEG files of a directory.
pub mod dir;

pub use crate::error::IoError;
