use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

use crate::NnError;
use chroma_tensor::Tensor3;

/// Bilinear taps of every output coordinate along one axis.
///
/// Output coordinate `o` samples the input at `o * in_len / out_len`, without the half pixel
/// offset, between the neighbours `i0` and `i1` clamped to the border. Returns `(i0, i1, f)`
/// with `f` the weight of `i1`.
fn axis_taps(in_len: usize, out_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|o| {
            let x = o as f32 * scale;
            let i0 = (x.floor() as usize).min(in_len - 1);
            let i1 = (i0 + 1).min(in_len - 1);
            (i0, i1, x - i0 as f32)
        })
        .collect()
}

/// For every input coordinate, the output coordinates reading it and their weights.
fn transpose_taps(taps: &[(usize, usize, f32)], in_len: usize) -> Vec<Vec<(usize, f32)>> {
    let mut readers = vec![Vec::new(); in_len];
    for (o, &(i0, i1, f)) in taps.iter().enumerate() {
        readers[i0].push((o, 1.0 - f));
        readers[i1].push((o, f));
    }
    readers
}

/// Resize a `(H, W, C)` feature map with bilinear interpolation.
///
/// Uses the same sampling as the image resize: output `(v, u)` reads the input at
/// `(v * H / out_h, u * W / out_w)`, with neighbours clamped at the border.
///
/// # Example
///
/// ```
/// use chroma_nn::upsample::upsample_bilinear;
/// use chroma_tensor::Tensor3;
///
/// let x = Tensor3::<f32>::from_shape_vec([1, 2, 1], vec![0.0, 1.0]).unwrap();
/// let y = upsample_bilinear(&x, 1, 4).unwrap();
/// assert_eq!(y.as_slice(), &[0.0, 0.5, 1.0, 1.0]);
/// ```
pub fn upsample_bilinear(
    input: &Tensor3<f32>,
    out_height: usize,
    out_width: usize,
) -> Result<Tensor3<f32>, NnError> {
    let [h, w, c] = input.shape;
    if h == 0 || w == 0 {
        return Err(NnError::shape_mismatch(
            "bilinear upsample input",
            &[1, 1, c],
            &input.shape,
        ));
    }

    let mut output = Tensor3::<f32>::zeros([out_height, out_width, c]);
    if output.numel() == 0 {
        return Ok(output);
    }

    let ys = axis_taps(h, out_height);
    let xs = axis_taps(w, out_width);
    let src = input.as_slice();

    output
        .as_slice_mut()
        .par_chunks_exact_mut(out_width * c)
        .zip(ys)
        .for_each(|(out_row, (y0, y1, fy))| {
            let row0 = &src[y0 * w * c..(y0 + 1) * w * c];
            let row1 = &src[y1 * w * c..(y1 + 1) * w * c];
            for (out_pixel, &(x0, x1, fx)) in out_row.chunks_exact_mut(c).zip(xs.iter()) {
                for (k, out) in out_pixel.iter_mut().enumerate() {
                    let top = (1.0 - fx) * row0[x0 * c + k] + fx * row0[x1 * c + k];
                    let bottom = (1.0 - fx) * row1[x0 * c + k] + fx * row1[x1 * c + k];
                    *out = (1.0 - fy) * top + fy * bottom;
                }
            }
        });

    Ok(output)
}

/// Gradient of [`upsample_bilinear`] with respect to its input.
///
/// # Arguments
///
/// * `grad_output` - The gradient of the upsampled map, `(out_h, out_w, C)`.
/// * `in_height` - The height of the forward input.
/// * `in_width` - The width of the forward input.
pub fn upsample_bilinear_backward(
    grad_output: &Tensor3<f32>,
    in_height: usize,
    in_width: usize,
) -> Result<Tensor3<f32>, NnError> {
    let [out_height, out_width, c] = grad_output.shape;
    if in_height == 0 || in_width == 0 {
        return Err(NnError::shape_mismatch(
            "bilinear upsample input",
            &[1, 1, c],
            &[in_height, in_width, c],
        ));
    }

    let mut grad_input = Tensor3::<f32>::zeros([in_height, in_width, c]);
    if grad_output.numel() == 0 {
        return Ok(grad_input);
    }

    let y_readers = transpose_taps(&axis_taps(in_height, out_height), in_height);
    let x_readers = transpose_taps(&axis_taps(in_width, out_width), in_width);
    let grad = grad_output.as_slice();

    // each input row gathers from the output rows that read it, no two tasks share a row
    grad_input
        .as_slice_mut()
        .par_chunks_exact_mut(in_width * c)
        .zip(y_readers)
        .for_each(|(gin_row, rows)| {
            for (oy, wy) in rows {
                let gout_row = &grad[oy * out_width * c..(oy + 1) * out_width * c];
                for (gin_pixel, cols) in gin_row.chunks_exact_mut(c).zip(x_readers.iter()) {
                    for &(ox, wx) in cols {
                        let weight = wy * wx;
                        let gout_pixel = &gout_row[ox * c..(ox + 1) * c];
                        for (g, &go) in gin_pixel.iter_mut().zip(gout_pixel) {
                            *g += weight * go;
                        }
                    }
                }
            }
        });

    Ok(grad_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn feature_map(shape: [usize; 3]) -> Tensor3<f32> {
        Tensor3::from_shape_fn(shape, |[i, j, k]| ((i * 5 + j * 3 + k) % 7) as f32 * 0.3)
    }

    #[test]
    fn test_upsample_x2() -> Result<(), NnError> {
        #[rustfmt::skip]
        let x = Tensor3::<f32>::from_shape_vec([2, 2, 1], vec![
            0.0, 1.0,
            2.0, 3.0,
        ])?;
        let y = upsample_bilinear(&x, 4, 4)?;

        #[rustfmt::skip]
        let expected = [
            0.0, 0.5, 1.0, 1.0,
            1.0, 1.5, 2.0, 2.0,
            2.0, 2.5, 3.0, 3.0,
            2.0, 2.5, 3.0, 3.0,
        ];
        assert_eq!(y.as_slice(), &expected);
        Ok(())
    }

    #[test]
    fn test_upsample_channels_are_independent() -> Result<(), NnError> {
        let x = feature_map([3, 2, 4]);
        let y = upsample_bilinear(&x, 6, 4)?;
        assert_eq!(y.shape, [6, 4, 4]);
        for k in 0..4 {
            let channel =
                Tensor3::from_shape_fn([3, 2, 1], |[i, j, _]| *x.get_unchecked([i, j, k]));
            let yk = upsample_bilinear(&channel, 6, 4)?;
            for i in 0..6 {
                for j in 0..4 {
                    assert_eq!(y.get_unchecked([i, j, k]), yk.get_unchecked([i, j, 0]));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_upsample_backward_is_adjoint() -> Result<(), NnError> {
        // <up(x), g> == <x, up^T(g)> for any x and g
        let x = feature_map([3, 4, 2]);
        let g = Tensor3::from_shape_fn([6, 8, 2], |[i, j, k]| {
            ((i * 3 + j * 7 + k * 2) % 5) as f32 - 2.0
        });

        let y = upsample_bilinear(&x, 6, 8)?;
        let gx = upsample_bilinear_backward(&g, 3, 4)?;

        let dot = |a: &Tensor3<f32>, b: &Tensor3<f32>| -> f64 {
            a.as_slice()
                .iter()
                .zip(b.as_slice())
                .map(|(&x, &y)| x as f64 * y as f64)
                .sum()
        };
        let lhs = dot(&y, &g);
        let rhs = dot(&x, &gx);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_upsample_empty_input() {
        let x = Tensor3::<f32>::zeros([0, 2, 1]);
        assert!(upsample_bilinear(&x, 4, 4).is_err());
    }
}
