/// Number of elements spanned by a strided `rows x cols` matrix.
#[inline]
fn span(rows: usize, cols: usize, rs: usize, cs: usize) -> usize {
    (rows - 1) * rs + (cols - 1) * cs + 1
}

/// Accumulate `C += A * B` with `matrixmultiply::sgemm`.
///
/// `A` is `m x k`, `B` is `k x n` and `C` is `m x n`, each given as a slice with its row and
/// column strides. The strides of `C` must address distinct elements.
///
/// # Panics
///
/// Panics if any of the matrices does not fit in its slice.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sgemm_acc(
    m: usize,
    k: usize,
    n: usize,
    a: &[f32],
    rsa: usize,
    csa: usize,
    b: &[f32],
    rsb: usize,
    csb: usize,
    c: &mut [f32],
    rsc: usize,
    csc: usize,
) {
    if m == 0 || n == 0 || k == 0 {
        return;
    }

    assert!(span(m, k, rsa, csa) <= a.len(), "A matrix out of bounds");
    assert!(span(k, n, rsb, csb) <= b.len(), "B matrix out of bounds");
    assert!(span(m, n, rsc, csc) <= c.len(), "C matrix out of bounds");

    // SAFETY: the three matrices were checked to lie within their slices.
    unsafe {
        matrixmultiply::sgemm(
            /* m */ m,
            /* k */ k,
            /* n */ n,
            /* alpha */ 1.0,
            /* a */ a.as_ptr(),
            /* rsa */ rsa as isize,
            /* csa */ csa as isize,
            /* b */ b.as_ptr(),
            /* rsb */ rsb as isize,
            /* csb */ csb as isize,
            /* beta */ 1.0,
            /* c */ c.as_mut_ptr(),
            /* rsc */ rsc as isize,
            /* csc */ csc as isize,
        );
    }
}
