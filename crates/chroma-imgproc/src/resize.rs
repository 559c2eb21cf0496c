use chroma_image::{Image, ImageError};
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

/// Source coordinates for one destination coordinate.
///
/// Returns the two neighbouring source indices and the weight of the second one.
#[inline]
fn source_coords(dst: usize, scale: f32, src_len: usize) -> (usize, usize, f32) {
    let x = dst as f32 * scale;
    let x0 = (x.floor() as usize).min(src_len - 1);
    let x1 = (x0 + 1).min(src_len - 1);
    (x0, x1, x - x0 as f32)
}

/// Resize an image with bilinear interpolation.
///
/// Destination pixel `(u, v)` samples the source at `(u * in_w / out_w, v * in_h / out_h)`,
/// without the half pixel offset, and clamps the neighbours to the image border. This is
/// the same sampling used by the decoder to upsample feature maps, so images and features
/// resized with it stay aligned.
///
/// # Arguments
///
/// * `src` - The input image.
/// * `dst` - The output image with the target size.
///
/// # Errors
///
/// Fails when either image is empty.
///
/// # Example
///
/// ```
/// use chroma_image::{Image, ImageSize};
/// use chroma_imgproc::resize::resize_bilinear;
///
/// let image = Image::<f32, 1>::new([2, 1].into(), vec![0.0, 1.0]).unwrap();
/// let mut resized = Image::<f32, 1>::from_size_val([4, 1].into(), 0.0).unwrap();
///
/// resize_bilinear(&image, &mut resized).unwrap();
///
/// assert_eq!(resized.as_slice(), &[0.0, 0.5, 1.0, 1.0]);
/// ```
pub fn resize_bilinear<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
) -> Result<(), ImageError> {
    if src.numel() == 0 || dst.numel() == 0 {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let (src_rows, src_cols) = (src.rows(), src.cols());
    let scale_y = src_rows as f32 / dst.rows() as f32;
    let scale_x = src_cols as f32 / dst.cols() as f32;

    let xs = (0..dst.cols())
        .map(|u| source_coords(u, scale_x, src_cols))
        .collect::<Vec<_>>();

    let src_data = src.as_slice();
    let dst_cols = dst.cols();

    dst.as_slice_mut()
        .par_chunks_exact_mut(dst_cols * C)
        .enumerate()
        .for_each(|(v, dst_row)| {
            let (y0, y1, fy) = source_coords(v, scale_y, src_rows);
            let row0 = &src_data[y0 * src_cols * C..(y0 + 1) * src_cols * C];
            let row1 = &src_data[y1 * src_cols * C..(y1 + 1) * src_cols * C];

            for (dst_pixel, &(x0, x1, fx)) in dst_row.chunks_exact_mut(C).zip(xs.iter()) {
                for (c, out) in dst_pixel.iter_mut().enumerate() {
                    let top = row0[x0 * C + c] + (row0[x1 * C + c] - row0[x0 * C + c]) * fx;
                    let bottom = row1[x0 * C + c] + (row1[x1 * C + c] - row1[x0 * C + c]) * fx;
                    *out = top + (bottom - top) * fy;
                }
            }
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chroma_image::ImageSize;

    #[test]
    fn upsample_x2() -> Result<(), ImageError> {
        #[rustfmt::skip]
        let image = Image::<f32, 1>::new(
            [2, 2].into(),
            vec![
                0.0, 1.0,
                2.0, 3.0,
            ],
        )?;
        let mut resized = Image::<f32, 1>::from_size_val([4, 4].into(), 0.0)?;
        resize_bilinear(&image, &mut resized)?;

        #[rustfmt::skip]
        let expected = [
            0.0, 0.5, 1.0, 1.0,
            1.0, 1.5, 2.0, 2.0,
            2.0, 2.5, 3.0, 3.0,
            2.0, 2.5, 3.0, 3.0,
        ];
        assert_eq!(resized.as_slice(), &expected);
        Ok(())
    }

    #[test]
    fn downsample_keeps_constant() -> Result<(), ImageError> {
        let image = Image::<f32, 3>::from_size_val([640, 480].into(), 0.3)?;
        let mut resized = Image::<f32, 3>::from_size_val([224, 224].into(), 0.0)?;
        resize_bilinear(&image, &mut resized)?;
        assert_eq!(resized.size(), ImageSize { width: 224, height: 224 });
        for &x in resized.as_slice() {
            assert_relative_eq!(x, 0.3, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn same_size_is_identity() -> Result<(), ImageError> {
        let data = (0..5 * 3 * 2).map(|i| i as f32).collect();
        let image = Image::<f32, 2>::new([5, 3].into(), data)?;
        let mut resized = Image::<f32, 2>::from_size_val(image.size(), 0.0)?;
        resize_bilinear(&image, &mut resized)?;
        assert_eq!(resized, image);
        Ok(())
    }

    #[test]
    fn empty_image() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::from_size_val([0, 0].into(), 0.0)?;
        let mut resized = Image::<f32, 1>::from_size_val([2, 2].into(), 0.0)?;
        assert!(resize_bilinear(&image, &mut resized).is_err());
        Ok(())
    }
}
