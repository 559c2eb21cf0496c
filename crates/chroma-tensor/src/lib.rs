#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! `chroma-tensor` provides the owned, row-major [`Tensor`] used for images, feature maps and
//! convolution kernels across the chroma crates.
//!
//! ```rust
//! use chroma_tensor::Tensor4;
//!
//! // a 3x3 kernel with 2 input and 4 output channels (HWIO layout)
//! let kernel = Tensor4::<f32>::zeros([3, 3, 2, 4]);
//! assert_eq!(kernel.numel(), 72);
//! ```

/// Bincode encoding and decoding for tensors.
#[cfg(feature = "bincode")]
pub mod bincode;

/// Serde serialization and deserialization for tensors.
#[cfg(feature = "serde")]
pub mod serde;

/// Tensor module containing the main tensor implementation and error types.
pub mod tensor;

pub use crate::tensor::{Tensor, TensorError};

/// Type alias for a 1-dimensional tensor.
pub type Tensor1<T> = Tensor<T, 1>;

/// Type alias for a 2-dimensional tensor.
pub type Tensor2<T> = Tensor<T, 2>;

/// Type alias for a 3-dimensional tensor.
pub type Tensor3<T> = Tensor<T, 3>;

/// Type alias for a 4-dimensional tensor.
pub type Tensor4<T> = Tensor<T, 4>;
