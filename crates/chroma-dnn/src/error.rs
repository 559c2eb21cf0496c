use std::path::PathBuf;

/// An error type for the colorization network, its checkpoints and training.
#[derive(thiserror::Error, Debug)]
pub enum DnnError {
    /// A backbone feature map does not have the shape the decoder expects.
    #[error("Feature map {name} has shape {actual:?}, expected {expected:?}")]
    FeatureShapeMismatch {
        /// The name of the feature map.
        name: &'static str,
        /// The shape derived from the image size and the decoder weights.
        expected: [usize; 3],
        /// The shape that was given.
        actual: [usize; 3],
    },

    /// The decoder halves the image three times.
    #[error("Image size {0}x{1} is not a positive multiple of 8")]
    InvalidImageSize(usize, usize),

    /// The loss of a training step is NaN or infinite.
    #[error("Non finite loss {loss} at step {step}")]
    NonFiniteLoss {
        /// The global step of the failing update.
        step: u64,
        /// The loss value.
        loss: f32,
    },

    /// A checkpoint was written by an incompatible version.
    #[error("Unsupported checkpoint version {0}, expected {1}")]
    CheckpointVersion(u32, u32),

    /// A checkpoint lacks a parameter or has it with a wrong shape.
    #[error("Invalid checkpoint parameter {0}")]
    CheckpointParameter(String),

    /// Error to encode a checkpoint.
    #[error("Failed to encode the checkpoint. {0}")]
    CheckpointEncodeError(#[from] bincode::error::EncodeError),

    /// Error to decode a checkpoint.
    #[error("Failed to decode the checkpoint. {0}")]
    CheckpointDecodeError(#[from] bincode::error::DecodeError),

    /// Error to manipulate a file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to serialize the training configuration.
    #[error("Failed to serialize the configuration. {0}")]
    ConfigError(#[from] serde_json::Error),

    /// The name of a color bias is not known.
    #[error("Unknown color bias {0}, expected one of red, green, blue, blue_green")]
    UnknownColorBias(String),

    /// Saturation weights could not be parsed.
    #[error("Invalid saturation weights {0}")]
    InvalidSaturationWeights(String),

    /// The model behind a lock was poisoned by a panicking writer.
    #[error("The model lock is poisoned")]
    LockPoisoned,

    /// No image of the training directory could be used.
    #[error("No usable training image in {0}")]
    NoTrainingImages(PathBuf),

    /// The backbone failed to load or to run, or returned an unexpected output.
    #[error("Backbone error. {0}")]
    BackboneError(String),

    /// Error from a network operator.
    #[error(transparent)]
    NnError(#[from] chroma_nn::NnError),

    /// Error from an image operation.
    #[error(transparent)]
    ImageError(#[from] chroma_image::ImageError),

    /// Error from the tensor.
    #[error(transparent)]
    TensorError(#[from] chroma_tensor::TensorError),

    /// Error reading or writing images.
    #[error(transparent)]
    IoError(#[from] chroma_io::IoError),
}

impl<T> From<std::sync::PoisonError<T>> for DnnError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        DnnError::LockPoisoned
    }
}
