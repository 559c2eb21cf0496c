use crate::parallel;
use chroma_image::{Image, ImageError};

/// Saturation of a single RGB pixel, `0` for black pixels.
#[inline]
fn pixel_saturation(r: f32, g: f32, b: f32) -> f32 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max > 0.0 {
        (max - min) / max
    } else {
        0.0
    }
}

/// Convert an RGB image to an HSV image.
///
/// The input image is assumed to have 3 channels in the order R, G, B in the range [0, 1].
///
/// # Arguments
///
/// * `src` - The input RGB image assumed to have 3 channels.
/// * `dst` - The output HSV image.
///
/// # Returns
///
/// The HSV image with the following channels:
///
/// * H: The hue channel in the range [0, 1) (0-360 degrees).
/// * S: The saturation channel in the range [0, 1].
/// * V: The value channel in the range [0, 1].
///
/// Precondition: the input and output images must have the same size.
///
/// # Example
///
/// ```
/// use chroma_image::{Image, ImageSize};
/// use chroma_imgproc::color::hsv_from_rgb;
///
/// let image = Image::<f32, 3>::new(
///     ImageSize {
///        width: 4,
///        height: 5,
///     },
///     vec![0f32; 4 * 5 * 3],
/// )
/// .unwrap();
///
/// let mut hsv = Image::<f32, 3>::from_size_val(image.size(), 0.0).unwrap();
///
/// hsv_from_rgb(&image, &mut hsv).unwrap();
///
/// assert_eq!(hsv.num_channels(), 3);
/// assert_eq!(hsv.size().width, 4);
/// assert_eq!(hsv.size().height, 5);
/// ```
pub fn hsv_from_rgb(src: &Image<f32, 3>, dst: &mut Image<f32, 3>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let (r, g, b) = (src_pixel[0], src_pixel[1], src_pixel[2]);

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let h = if delta == 0.0 {
            0.0
        } else if max == r {
            ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            (b - r) / delta + 2.0
        } else {
            (r - g) / delta + 4.0
        };

        dst_pixel[0] = h / 6.0;
        dst_pixel[1] = pixel_saturation(r, g, b);
        dst_pixel[2] = max;
    });

    Ok(())
}

/// Compute the HSV saturation channel of an RGB image.
///
/// Equivalent to the second channel of [`hsv_from_rgb`] without computing hue and value.
///
/// # Arguments
///
/// * `src` - The input RGB image in the range [0, 1].
/// * `dst` - The output saturation image in the range [0, 1].
///
/// Precondition: the input and output images must have the same size.
///
/// # Example
///
/// ```
/// use chroma_image::Image;
/// use chroma_imgproc::color::saturation_from_rgb;
///
/// let image = Image::<f32, 3>::new([2, 1].into(), vec![1.0, 0.5, 0.5, 0.3, 0.3, 0.3]).unwrap();
/// let mut saturation = Image::<f32, 1>::from_size_val(image.size(), 0.0).unwrap();
///
/// saturation_from_rgb(&image, &mut saturation).unwrap();
/// assert_eq!(saturation.as_slice(), &[0.5, 0.0]);
/// ```
pub fn saturation_from_rgb(
    src: &Image<f32, 3>,
    dst: &mut Image<f32, 1>,
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        dst_pixel[0] = pixel_saturation(src_pixel[0], src_pixel[1], src_pixel[2]);
    });

    Ok(())
}
