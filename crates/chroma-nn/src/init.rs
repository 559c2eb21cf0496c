use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::NnError;
use chroma_tensor::Tensor;

/// Fill a tensor with samples of a zero mean normal distribution truncated at two standard
/// deviations.
///
/// Samples falling outside of `[-2 stddev, 2 stddev]` are drawn again.
///
/// # Arguments
///
/// * `shape` - The shape of the tensor.
/// * `stddev` - The standard deviation of the untruncated distribution.
/// * `rng` - The random number generator.
///
/// # Example
///
/// ```
/// use chroma_nn::init::truncated_normal;
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let kernel = truncated_normal([3, 3, 64, 3], 0.01, &mut rng).unwrap();
/// assert!(kernel.as_slice().iter().all(|w| w.abs() <= 0.02));
/// ```
pub fn truncated_normal<const N: usize, R: Rng + ?Sized>(
    shape: [usize; N],
    stddev: f32,
    rng: &mut R,
) -> Result<Tensor<f32, N>, NnError> {
    if !(stddev > 0.0 && stddev.is_finite()) {
        return Err(NnError::InvalidStdDev(stddev));
    }
    let normal = Normal::new(0.0f32, stddev).map_err(|_| NnError::InvalidStdDev(stddev))?;
    let bound = 2.0 * stddev;

    let numel = shape.iter().product::<usize>();
    let data = (0..numel)
        .map(|_| loop {
            let x = normal.sample(rng);
            if x.abs() <= bound {
                break x;
            }
        })
        .collect();

    Ok(Tensor::from_shape_vec(shape, data)?)
}
