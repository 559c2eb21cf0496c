/// An error type for the image module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImageError {
    /// Error when the underlying tensor cannot be built.
    #[error("Failed to create the image tensor: {0}")]
    TensorError(#[from] chroma_tensor::TensorError),

    /// Error when channel and shape are not valid.
    #[error("Data length ({0}) does not match the image size ({1})")]
    InvalidChannelShape(usize, usize),

    /// Error when the image size is not valid.
    #[error("Invalid image size. Got: {0}x{1}, expected: {2}x{3}")]
    InvalidImageSize(usize, usize, usize, usize),

    /// Error when the image cannot be casted.
    #[error("Failed to cast image data to {0}")]
    CastError(String),

    /// Error when the channel index is out of bounds.
    #[error("Channel index {0} is out of bounds {1}")]
    ChannelIndexOutOfBounds(usize, usize),

    /// Error when an image list has no elements.
    #[error("At least one image is required")]
    EmptyImageList,

    /// Error when the number of weights does not match the number of images.
    #[error("Got {0} weights for {1} images")]
    WeightCountMismatch(usize, usize),
}
