use rayon::iter::{
    IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator,
};

use crate::NnError;
use chroma_tensor::Tensor;

/// Slope of the leaky rectifier for negative inputs.
pub const LEAKY_SLOPE: f32 = 0.01;

fn par_map<const N: usize>(
    x: &Tensor<f32, N>,
    f: impl Fn(f32) -> f32 + Send + Sync,
) -> Tensor<f32, N> {
    Tensor {
        storage: x.storage.par_iter().map(|&v| f(v)).collect(),
        shape: x.shape,
        strides: x.strides,
    }
}

fn par_zip_map<const N: usize>(
    x: &Tensor<f32, N>,
    grad: &Tensor<f32, N>,
    f: impl Fn(f32, f32) -> f32 + Send + Sync,
) -> Result<Tensor<f32, N>, NnError> {
    if x.shape != grad.shape {
        return Err(NnError::shape_mismatch(
            "activation gradient",
            &x.shape,
            &grad.shape,
        ));
    }
    let mut out = Tensor::<f32, N>::zeros(x.shape);
    out.as_slice_mut()
        .par_iter_mut()
        .zip(x.storage.par_iter())
        .zip(grad.storage.par_iter())
        .for_each(|((o, &v), &g)| *o = f(v, g));
    Ok(out)
}

/// Rectified linear unit, `max(x, 0)`.
pub fn relu<const N: usize>(x: &Tensor<f32, N>) -> Tensor<f32, N> {
    par_map(x, |v| v.max(0.0))
}

/// Gradient of [`relu`] given its input and the gradient of its output.
pub fn relu_backward<const N: usize>(
    x: &Tensor<f32, N>,
    grad_output: &Tensor<f32, N>,
) -> Result<Tensor<f32, N>, NnError> {
    par_zip_map(x, grad_output, |v, g| if v > 0.0 { g } else { 0.0 })
}

/// Leaky rectifier, `max(0.01 x, x)`.
///
/// # Example
///
/// ```
/// use chroma_nn::activation::leaky_relu;
/// use chroma_tensor::Tensor1;
///
/// let x = Tensor1::<f32>::from_shape_vec([3], vec![-2.0, 0.0, 3.0]).unwrap();
/// assert_eq!(leaky_relu(&x).as_slice(), &[-0.02, 0.0, 3.0]);
/// ```
pub fn leaky_relu<const N: usize>(x: &Tensor<f32, N>) -> Tensor<f32, N> {
    par_map(x, |v| v.max(LEAKY_SLOPE * v))
}

/// Gradient of [`leaky_relu`] given its input and the gradient of its output.
pub fn leaky_relu_backward<const N: usize>(
    x: &Tensor<f32, N>,
    grad_output: &Tensor<f32, N>,
) -> Result<Tensor<f32, N>, NnError> {
    par_zip_map(x, grad_output, |v, g| {
        if v > 0.0 {
            g
        } else {
            LEAKY_SLOPE * g
        }
    })
}

/// Logistic sigmoid, `1 / (1 + exp(-x))`.
pub fn sigmoid<const N: usize>(x: &Tensor<f32, N>) -> Tensor<f32, N> {
    par_map(x, |v| 1.0 / (1.0 + (-v).exp()))
}

/// Gradient of [`sigmoid`] given its output and the gradient of its output.
pub fn sigmoid_backward<const N: usize>(
    y: &Tensor<f32, N>,
    grad_output: &Tensor<f32, N>,
) -> Result<Tensor<f32, N>, NnError> {
    par_zip_map(y, grad_output, |s, g| g * s * (1.0 - s))
}

/// Element wise sum of two tensors of the same shape, in parallel.
pub fn add<const N: usize>(
    a: &Tensor<f32, N>,
    b: &Tensor<f32, N>,
) -> Result<Tensor<f32, N>, NnError> {
    par_zip_map(a, b, |x, y| x + y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chroma_tensor::Tensor1;

    #[test]
    fn test_relu() -> Result<(), NnError> {
        let x = Tensor1::<f32>::from_shape_vec([4], vec![-1.0, 0.0, 0.5, 2.0])?;
        assert_eq!(relu(&x).as_slice(), &[0.0, 0.0, 0.5, 2.0]);

        let g = Tensor1::<f32>::from_shape_val([4], 3.0);
        assert_eq!(relu_backward(&x, &g)?.as_slice(), &[0.0, 0.0, 3.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_leaky_relu_backward() -> Result<(), NnError> {
        let x = Tensor1::<f32>::from_shape_vec([3], vec![-4.0, 1.0, -0.1])?;
        let g = Tensor1::<f32>::from_shape_vec([3], vec![1.0, 2.0, -5.0])?;
        let grad = leaky_relu_backward(&x, &g)?;
        assert_relative_eq!(grad.as_slice()[0], 0.01);
        assert_relative_eq!(grad.as_slice()[1], 2.0);
        assert_relative_eq!(grad.as_slice()[2], -0.05);
        Ok(())
    }

    #[test]
    fn test_sigmoid_bounds_and_gradient() -> Result<(), NnError> {
        let x = Tensor1::<f32>::from_shape_vec([5], vec![-100.0, -1.0, 0.0, 1.0, 100.0])?;
        let y = sigmoid(&x);
        assert!(y.as_slice().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_relative_eq!(y.as_slice()[2], 0.5);

        let g = Tensor1::<f32>::from_shape_val([5], 1.0);
        let grad = sigmoid_backward(&y, &g)?;
        assert_relative_eq!(grad.as_slice()[2], 0.25);

        let eps = 1e-3f32;
        let s = |v: f32| 1.0 / (1.0 + (-v).exp());
        let numeric = (s(1.0 + eps) - s(1.0 - eps)) / (2.0 * eps);
        assert_relative_eq!(grad.as_slice()[3], numeric, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_add() -> Result<(), NnError> {
        let a = Tensor1::<f32>::from_shape_vec([2], vec![1.0, 2.0])?;
        let b = Tensor1::<f32>::from_shape_vec([2], vec![0.5, -1.0])?;
        let c = add(&a, &b)?;
        assert_eq!(c.as_slice(), &[1.5, 1.0]);

        let d = Tensor1::<f32>::zeros([3]);
        assert!(add(&a, &d).is_err());
        Ok(())
    }
}
