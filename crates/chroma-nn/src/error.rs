use chroma_tensor::TensorError;

/// An error type for the neural network operators.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum NnError {
    /// The shapes of the operands of a layer do not agree.
    #[error("Shape mismatch in {op}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The operation that rejected the operands.
        op: &'static str,
        /// The expected shape.
        expected: Vec<usize>,
        /// The shape that was given.
        actual: Vec<usize>,
    },

    /// Only odd kernel sizes have a centered SAME padding.
    #[error("Unsupported kernel size {0}x{1}, expected odd sizes")]
    EvenKernelSize(usize, usize),

    /// The standard deviation of an initializer is not positive.
    #[error("Invalid standard deviation {0}")]
    InvalidStdDev(f32),

    /// Error from the underlying tensor.
    #[error(transparent)]
    TensorError(#[from] TensorError),
}

impl NnError {
    pub(crate) fn shape_mismatch(op: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            op,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
