#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Chroma DNN
//!
//! The colorization decoder, its color-biased ensemble and its training.
//!
//! A frozen backbone, any [`FeatureExtractor`], turns a grayscale image into four feature
//! maps. A [`ColorNet`] fuses them with the grayscale image into the U and V chrominance
//! channels, and a [`ColorizerEnsemble`] blends four such decoders by saturation.

/// The backbone feature maps and the extractors producing them.
pub mod backbone;

/// Versioned bincode checkpoints of the decoder.
pub mod checkpoint;

/// The feature fusion decoder.
pub mod colornet;

/// Color biases and the saturation weighted ensemble.
pub mod ensemble;

/// Error type for the dnn module.
pub mod error;

/// End to end colorization of JPEG files.
pub mod pipeline;

/// Training of a decoder on a directory of color images.
pub mod train;

/// Kernel shapes and initialization of the decoder parameters.
pub mod weights;

pub use crate::backbone::{BackboneFeatures, FeatureExtractor};
pub use crate::checkpoint::Checkpoint;
pub use crate::colornet::ColorNet;
pub use crate::ensemble::{ColorBias, ColorizerEnsemble, SaturationWeights};
pub use crate::error::DnnError;
pub use crate::pipeline::Colorizer;
pub use crate::train::{TrainConfig, TrainSession};

#[cfg(feature = "onnx")]
pub use crate::backbone::{OnnxBackbone, OnnxBackboneConfig};
