#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// color transformations module.
pub mod color;

/// side by side image composition.
pub mod concat;

/// image cropping module.
pub mod crop;

/// image flipping module.
pub mod flip;

/// module containing parallization utilities.
pub mod parallel;

/// saturation weighted blending of several predictions of the same image.
pub mod recombine;

/// utility functions for resizing images.
pub mod resize;
