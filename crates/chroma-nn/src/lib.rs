#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Chroma Neural Network Operations
//!
//! Forward and backward passes of the layers used by the colorization decoder. Feature maps
//! are `(height, width, channels)` tensors of a single example and kernels use the HWIO
//! layout `(kernel_height, kernel_width, in_channels, out_channels)`.
//!
//! ## Example: SAME convolution
//!
//! ```rust
//! use chroma_nn::conv::conv2d_same;
//! use chroma_tensor::{Tensor3, Tensor4};
//!
//! let input = Tensor3::<f32>::from_shape_val([8, 8, 4], 1.0);
//! let kernel = Tensor4::<f32>::from_shape_val([3, 3, 4, 2], 0.1);
//!
//! let output = conv2d_same(&input, &kernel).unwrap();
//! assert_eq!(output.shape, [8, 8, 2]);
//! ```

/// Pointwise activations and their derivatives.
pub mod activation;

/// Batch normalization with moving statistics.
pub mod batch_norm;

/// Stride one convolutions with SAME zero padding.
pub mod conv;

mod error;
pub use error::NnError;

mod gemm;

/// Weight initialization.
pub mod init;

/// Bilinear upsampling of feature maps.
pub mod upsample;

/// Whether a layer runs as part of a training step or for inference.
///
/// The phase is passed explicitly down every call that behaves differently while training.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Normalize with the statistics of the current example.
    Train,
    /// Normalize with the accumulated moving statistics only.
    Inference,
}
