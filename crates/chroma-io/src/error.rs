/// An error type for the io module.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(std::path::PathBuf),

    /// Invalid file extension.
    #[error("File does not have a valid extension: {0}")]
    InvalidFileExtension(std::path::PathBuf),

    /// Error to open the file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error while walking a directory.
    #[error("Failed to list the directory. {0}")]
    WalkDirError(#[from] walkdir::Error),

    /// Error to decode the JPEG image.
    #[error("Error with Jpeg decoding. {0}")]
    JpegDecodingError(#[from] zune_jpeg::errors::DecodeErrors),

    /// Error to encode the JPEG image.
    #[error("Error with Jpeg encoding. {0}")]
    JpegEncodingError(#[from] jpeg_encoder::EncodingError),

    /// The decoded buffer is neither grayscale nor RGB.
    #[error("Unsupported number of decoded bytes {0} for a {1}x{2} image")]
    UnsupportedChannels(usize, usize, usize),

    /// The image does not fit the 16 bit dimensions of a JPEG frame.
    #[error("Image of {0}x{1} pixels is too large to be encoded as JPEG")]
    ImageTooLarge(usize, usize),

    /// Error to create the image.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] chroma_image::ImageError),
}
