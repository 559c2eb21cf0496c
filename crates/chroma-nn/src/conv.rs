use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

use crate::{gemm::sgemm_acc, NnError};
use chroma_tensor::{Tensor3, Tensor4};

/// Positions `p` in `[0, len)` such that `p + offset` is also in `[0, len)`.
#[inline]
fn overlap(len: usize, offset: isize) -> (usize, usize) {
    let lo = (-offset).max(0) as usize;
    let hi = (len as isize - offset).clamp(0, len as isize) as usize;
    (lo.min(hi), hi)
}

fn check_shapes(input: &Tensor3<f32>, kernel: &Tensor4<f32>) -> Result<(), NnError> {
    let [kh, kw, cin, _] = kernel.shape;
    if kh % 2 == 0 || kw % 2 == 0 {
        return Err(NnError::EvenKernelSize(kh, kw));
    }
    if input.shape[2] != cin {
        return Err(NnError::shape_mismatch(
            "conv2d input channels",
            &[cin],
            &[input.shape[2]],
        ));
    }
    Ok(())
}

/// 2D convolution with stride one and SAME zero padding.
///
/// Every output position `(y, x)` is the sum over the kernel taps `(ky, kx)` of
/// `input[y + ky - kh / 2, x + kx - kw / 2, :] * kernel[ky, kx, :, :]`, with the input read
/// as zero outside of its borders, so the output keeps the spatial size of the input.
///
/// Each tap is evaluated as a matrix product over a whole output row, with output rows
/// computed in parallel.
///
/// # Arguments
///
/// * `input` - The input feature map with shape `(H, W, Cin)`.
/// * `kernel` - The kernel with shape `(kh, kw, Cin, Cout)`, `kh` and `kw` odd.
///
/// # Returns
///
/// The output feature map with shape `(H, W, Cout)`.
///
/// # Example
///
/// ```
/// use chroma_nn::conv::conv2d_same;
/// use chroma_tensor::{Tensor3, Tensor4};
///
/// let input = Tensor3::<f32>::from_shape_vec([1, 3, 1], vec![1.0, 2.0, 3.0]).unwrap();
/// let kernel = Tensor4::<f32>::from_shape_vec([1, 3, 1, 1], vec![1.0, 1.0, 1.0]).unwrap();
///
/// let output = conv2d_same(&input, &kernel).unwrap();
/// assert_eq!(output.as_slice(), &[3.0, 6.0, 5.0]);
/// ```
pub fn conv2d_same(input: &Tensor3<f32>, kernel: &Tensor4<f32>) -> Result<Tensor3<f32>, NnError> {
    check_shapes(input, kernel)?;

    let [h, w, cin] = input.shape;
    let [kh, kw, _, cout] = kernel.shape;
    let (ph, pw) = ((kh / 2) as isize, (kw / 2) as isize);

    let mut output = Tensor3::<f32>::zeros([h, w, cout]);
    if output.numel() == 0 {
        return Ok(output);
    }

    let src = input.as_slice();
    let weights = kernel.as_slice();

    output
        .as_slice_mut()
        .par_chunks_exact_mut(w * cout)
        .enumerate()
        .for_each(|(y, out_row)| {
            for ky in 0..kh {
                let iy = y as isize + ky as isize - ph;
                if iy < 0 || iy >= h as isize {
                    continue;
                }
                let in_row = &src[iy as usize * w * cin..(iy as usize + 1) * w * cin];

                for kx in 0..kw {
                    let offset = kx as isize - pw;
                    let (lo, hi) = overlap(w, offset);
                    if lo == hi {
                        continue;
                    }
                    let ix = (lo as isize + offset) as usize;
                    let t = ky * kw + kx;
                    let tap = &weights[t * cin * cout..(t + 1) * cin * cout];

                    sgemm_acc(
                        hi - lo,
                        cin,
                        cout,
                        &in_row[ix * cin..],
                        cin,
                        1,
                        tap,
                        cout,
                        1,
                        &mut out_row[lo * cout..],
                        cout,
                        1,
                    );
                }
            }
        });

    Ok(output)
}

/// Gradients of [`conv2d_same`] with respect to its input and its kernel.
///
/// # Arguments
///
/// * `input` - The input of the forward pass with shape `(H, W, Cin)`.
/// * `kernel` - The kernel of the forward pass with shape `(kh, kw, Cin, Cout)`.
/// * `grad_output` - The gradient of the objective with respect to the output, `(H, W, Cout)`.
///
/// # Returns
///
/// The gradients with respect to the input `(H, W, Cin)` and the kernel `(kh, kw, Cin, Cout)`.
pub fn conv2d_same_backward(
    input: &Tensor3<f32>,
    kernel: &Tensor4<f32>,
    grad_output: &Tensor3<f32>,
) -> Result<(Tensor3<f32>, Tensor4<f32>), NnError> {
    check_shapes(input, kernel)?;

    let [h, w, cin] = input.shape;
    let [kh, kw, _, cout] = kernel.shape;
    if grad_output.shape != [h, w, cout] {
        return Err(NnError::shape_mismatch(
            "conv2d output gradient",
            &[h, w, cout],
            &grad_output.shape,
        ));
    }
    let (ph, pw) = ((kh / 2) as isize, (kw / 2) as isize);

    let mut grad_input = Tensor3::<f32>::zeros([h, w, cin]);
    let mut grad_kernel = Tensor4::<f32>::zeros(kernel.shape);
    if input.numel() == 0 || grad_output.numel() == 0 {
        return Ok((grad_input, grad_kernel));
    }

    let src = input.as_slice();
    let grad = grad_output.as_slice();
    let weights = kernel.as_slice();

    // input gradient: each input row gathers from the output rows it contributed to
    grad_input
        .as_slice_mut()
        .par_chunks_exact_mut(w * cin)
        .enumerate()
        .for_each(|(iy, gin_row)| {
            for ky in 0..kh {
                let y = iy as isize + ph - ky as isize;
                if y < 0 || y >= h as isize {
                    continue;
                }
                let gout_row = &grad[y as usize * w * cout..(y as usize + 1) * w * cout];

                for kx in 0..kw {
                    // input column ix reads output column ix + pw - kx
                    let offset = pw - kx as isize;
                    let (lo, hi) = overlap(w, offset);
                    if lo == hi {
                        continue;
                    }
                    let x = (lo as isize + offset) as usize;
                    let t = ky * kw + kx;
                    let tap = &weights[t * cin * cout..(t + 1) * cin * cout];

                    // gin[ix, ci] += gout[x, co] * tap[ci, co]
                    sgemm_acc(
                        hi - lo,
                        cout,
                        cin,
                        &gout_row[x * cout..],
                        cout,
                        1,
                        tap,
                        1,
                        cout,
                        &mut gin_row[lo * cin..],
                        cin,
                        1,
                    );
                }
            }
        });

    // kernel gradient: one tap per task
    grad_kernel
        .as_slice_mut()
        .par_chunks_exact_mut(cin * cout)
        .enumerate()
        .for_each(|(t, gtap)| {
            let (ky, kx) = (t / kw, t % kw);
            let offset = kx as isize - pw;
            let (lo, hi) = overlap(w, offset);
            if lo == hi {
                return;
            }
            let ix = (lo as isize + offset) as usize;

            for y in 0..h {
                let iy = y as isize + ky as isize - ph;
                if iy < 0 || iy >= h as isize {
                    continue;
                }
                let in_row = &src[iy as usize * w * cin..(iy as usize + 1) * w * cin];
                let gout_row = &grad[y * w * cout..(y + 1) * w * cout];

                // gtap[ci, co] += in[ix, ci]^T * gout[x, co]
                sgemm_acc(
                    cin,
                    hi - lo,
                    cout,
                    &in_row[ix * cin..],
                    1,
                    cin,
                    &gout_row[lo * cout..],
                    cout,
                    1,
                    gtap,
                    cout,
                    1,
                );
            }
        });

    Ok((grad_input, grad_kernel))
}
