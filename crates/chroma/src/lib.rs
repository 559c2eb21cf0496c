//! # Chroma
//!
//! Grayscale image colorization with a feature fusion network, re-exporting the chroma
//! crates under one roof.

#[doc(inline)]
pub use chroma_tensor as tensor;

#[doc(inline)]
pub use chroma_image as image;

#[doc(inline)]
pub use chroma_imgproc as imgproc;

#[doc(inline)]
pub use chroma_io as io;

#[doc(inline)]
pub use chroma_nn as nn;

#[doc(inline)]
pub use chroma_dnn as dnn;
