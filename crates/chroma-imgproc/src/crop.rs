use chroma_image::{Image, ImageError, ImageSize};
use rand::Rng;
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

/// Crop an image to a specified region.
///
/// # Arguments
///
/// * `src` - The source image to crop.
/// * `dst` - The destination image to store the cropped image.
/// * `x` - The x-coordinate of the top-left corner of the region to crop.
/// * `y` - The y-coordinate of the top-left corner of the region to crop.
///
/// # Errors
///
/// Fails when the region does not fit inside the source image.
///
/// # Examples
///
/// ```rust
/// use chroma_image::{Image, ImageSize};
/// use chroma_imgproc::crop::crop_image;
///
/// let image = Image::<_, 1>::new(ImageSize { width: 4, height: 4 }, vec![
///     0u8, 1, 2, 3,
///     4u8, 5, 6, 7,
///     8u8, 9, 10, 11,
///     12u8, 13, 14, 15
/// ]).unwrap();
///
/// let mut cropped = Image::<_, 1>::from_size_val(ImageSize { width: 2, height: 2 }, 0u8).unwrap();
///
/// crop_image(&image, &mut cropped, 1, 1).unwrap();
///
/// assert_eq!(cropped.as_slice(), &[5u8, 6, 9, 10]);
/// ```
pub fn crop_image<T, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
    x: usize,
    y: usize,
) -> Result<(), ImageError>
where
    T: Copy + Send + Sync,
{
    if x + dst.cols() > src.cols() || y + dst.rows() > src.rows() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            x + dst.cols(),
            y + dst.rows(),
        ));
    }

    let dst_cols = dst.cols();
    if dst_cols == 0 {
        return Ok(());
    }

    dst.as_slice_mut()
        .par_chunks_exact_mut(dst_cols * C)
        .enumerate()
        .for_each(|(i, dst_row)| {
            // get the slice at the top left corner
            let offset = (y + i) * src.cols() * C + x * C;
            dst_row.copy_from_slice(&src.as_slice()[offset..offset + dst_cols * C]);
        });

    Ok(())
}

/// Crop a region of the given size at a uniformly sampled position.
///
/// # Arguments
///
/// * `src` - The source image, at least as large as `size`.
/// * `size` - The size of the crop.
/// * `rng` - The random number generator used to place the crop.
///
/// # Errors
///
/// Fails when the source image is smaller than the crop.
///
/// # Example
///
/// ```
/// use chroma_image::{Image, ImageSize};
/// use chroma_imgproc::crop::random_crop;
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let image = Image::<f32, 3>::from_size_val([300, 250].into(), 0.5).unwrap();
/// let mut rng = StdRng::seed_from_u64(42);
///
/// let cropped = random_crop(&image, [224, 224].into(), &mut rng).unwrap();
/// assert_eq!(cropped.size(), ImageSize { width: 224, height: 224 });
/// ```
pub fn random_crop<T, const C: usize, R>(
    src: &Image<T, C>,
    size: ImageSize,
    rng: &mut R,
) -> Result<Image<T, C>, ImageError>
where
    T: Copy + Send + Sync + num_traits::Zero,
    R: Rng + ?Sized,
{
    if size.width > src.cols() || size.height > src.rows() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            size.width,
            size.height,
        ));
    }

    let x = rng.random_range(0..=src.cols() - size.width);
    let y = rng.random_range(0..=src.rows() - size.height);

    let mut dst = Image::from_size_val(size, T::zero())?;
    crop_image(src, &mut dst, x, y)?;

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_crop() -> Result<(), ImageError> {
        let image_size = ImageSize {
            width: 2,
            height: 3,
        };

        #[rustfmt::skip]
        let image = Image::<_, 3>::new(
            image_size,
            vec![
                0u8, 1, 2, 3, 4, 5,
                6u8, 7, 8, 9, 10, 11,
                12u8, 13, 14, 15, 16, 17,
            ],
        )?;

        let mut cropped = Image::<_, 3>::from_size_val([1, 2].into(), 0u8)?;
        crop_image(&image, &mut cropped, 1, 1)?;

        assert_eq!(cropped.as_slice(), &[9u8, 10, 11, 15, 16, 17]);
        Ok(())
    }

    #[test]
    fn test_crop_out_of_bounds() -> Result<(), ImageError> {
        let image = Image::<u8, 1>::from_size_val([4, 4].into(), 0)?;
        let mut cropped = Image::<u8, 1>::from_size_val([2, 2].into(), 0)?;
        assert!(crop_image(&image, &mut cropped, 3, 0).is_err());
        assert!(crop_image(&image, &mut cropped, 2, 2).is_ok());
        Ok(())
    }

    #[test]
    fn test_random_crop_is_a_window() -> Result<(), ImageError> {
        // every pixel stores its own (x, y) so the crop reveals where it was taken
        let size = ImageSize {
            width: 12,
            height: 9,
        };
        let data = (0..size.height)
            .flat_map(|y| (0..size.width).flat_map(move |x| [x as f32, y as f32]))
            .collect();
        let image = Image::<f32, 2>::new(size, data)?;

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..16 {
            let cropped = random_crop(&image, [5, 4].into(), &mut rng)?;
            let x0 = cropped.as_slice()[0];
            let y0 = cropped.as_slice()[1];
            assert!(x0 <= 7.0 && y0 <= 5.0);
            for (i, pixel) in cropped.as_slice().chunks_exact(2).enumerate() {
                assert_eq!(pixel[0], x0 + (i % 5) as f32);
                assert_eq!(pixel[1], y0 + (i / 5) as f32);
            }
        }
        Ok(())
    }

    #[test]
    fn test_random_crop_too_small() -> Result<(), ImageError> {
        let image = Image::<f32, 3>::from_size_val([100, 300].into(), 0.0)?;
        let mut rng = StdRng::seed_from_u64(0);
        assert!(random_crop(&image, [224, 224].into(), &mut rng).is_err());
        Ok(())
    }
}
