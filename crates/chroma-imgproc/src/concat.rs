use chroma_image::{Image, ImageError, ImageSize};
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};

/// Place two images side by side.
///
/// The output is `left.width + right.width` wide and as tall as the taller input. Both
/// images are aligned to the top-left corner of their half; rows that the shorter image
/// does not cover are filled with zeros.
///
/// # Arguments
///
/// * `left` - The image placed on the left.
/// * `right` - The image placed on the right.
///
/// # Returns
///
/// The concatenated image.
///
/// # Example
///
/// ```
/// use chroma_image::{Image, ImageSize};
/// use chroma_imgproc::concat::concat_horizontal;
///
/// let left = Image::<u8, 1>::new([1, 2].into(), vec![1, 2]).unwrap();
/// let right = Image::<u8, 1>::new([2, 1].into(), vec![3, 4]).unwrap();
///
/// let joined = concat_horizontal(&left, &right).unwrap();
///
/// assert_eq!(joined.size(), ImageSize { width: 3, height: 2 });
/// assert_eq!(joined.as_slice(), &[1, 3, 4, 2, 0, 0]);
/// ```
pub fn concat_horizontal<T, const C: usize>(
    left: &Image<T, C>,
    right: &Image<T, C>,
) -> Result<Image<T, C>, ImageError>
where
    T: Copy + Send + Sync + num_traits::Zero,
{
    let size = ImageSize {
        width: left.width() + right.width(),
        height: left.height().max(right.height()),
    };

    let mut dst = Image::from_size_val(size, T::zero())?;
    if dst.numel() == 0 {
        return Ok(dst);
    }

    let left_stride = left.width() * C;
    let right_stride = right.width() * C;

    dst.as_slice_mut()
        .par_chunks_exact_mut(size.width * C)
        .enumerate()
        .for_each(|(row, dst_row)| {
            let (dst_left, dst_right) = dst_row.split_at_mut(left_stride);
            if row < left.height() {
                let offset = row * left_stride;
                dst_left.copy_from_slice(&left.as_slice()[offset..offset + left_stride]);
            }
            if row < right.height() {
                let offset = row * right_stride;
                dst_right.copy_from_slice(&right.as_slice()[offset..offset + right_stride]);
            }
        });

    Ok(dst)
}
