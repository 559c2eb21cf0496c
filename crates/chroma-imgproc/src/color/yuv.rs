use crate::parallel;
use chroma_image::{Image, ImageError};

/// Forward transform, rows are the Y, U and V coefficients for R, G and B.
const RGB2YUV: [[f32; 3]; 3] = [
    [0.299, 0.587, 0.114],
    [-0.169, -0.331, 0.499],
    [0.499, -0.418, -0.0813],
];

/// Offsets added to Y, U and V, centering the chrominance at 0.5.
const RGB2YUV_BIAS: [f32; 3] = [0.0, 0.5, 0.5];

/// Inverse transform in the 8-bit domain, rows are the R, G and B coefficients for Y, U and V.
const YUV2RGB: [[f32; 3]; 3] = [
    [1.0, 0.0, 1.402],
    [1.0, -0.34414, -0.71414],
    [1.0, 1.772, 0.0],
];

/// Inverse offsets with the chrominance centering folded in, in the 8-bit domain.
const YUV2RGB_BIAS: [f32; 3] = [-179.45599365, 135.45983887, -226.81599426];

fn check_sizes<const C1: usize, const C2: usize>(
    src: &Image<f32, C1>,
    dst: &Image<f32, C2>,
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }
    Ok(())
}

/// Convert an RGB image to a YUV image with centered chrominance.
///
/// The input image is assumed to have 3 channels in the order R, G, B in the range [0, 1].
///
/// # Arguments
///
/// * `src` - The input RGB image assumed to have 3 channels.
/// * `dst` - The output YUV image.
///
/// # Returns
///
/// The YUV image with the following channels:
///
/// * Y: The luminance channel in the range [0, 1].
/// * U: The blue-difference chrominance, centered at 0.5.
/// * V: The red-difference chrominance, centered at 0.5.
///
/// No clamping is applied.
///
/// Precondition: the input and output images must have the same size.
///
/// # Example
///
/// ```
/// use chroma_image::{Image, ImageSize};
/// use chroma_imgproc::color::yuv_from_rgb;
///
/// let image = Image::<f32, 3>::from_size_val([4, 5].into(), 0.5).unwrap();
///
/// let mut yuv = Image::from_size_val(image.size(), 0.0).unwrap();
///
/// yuv_from_rgb(&image, &mut yuv).unwrap();
///
/// assert!((yuv.as_slice()[1] - 0.5).abs() < 1e-3);
/// ```
pub fn yuv_from_rgb(src: &Image<f32, 3>, dst: &mut Image<f32, 3>) -> Result<(), ImageError> {
    check_sizes(src, dst)?;

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        for (out, (coeffs, bias)) in dst_pixel
            .iter_mut()
            .zip(RGB2YUV.iter().zip(RGB2YUV_BIAS.iter()))
        {
            *out = coeffs[0] * src_pixel[0]
                + coeffs[1] * src_pixel[1]
                + coeffs[2] * src_pixel[2]
                + bias;
        }
    });

    Ok(())
}

/// Convert a YUV image with centered chrominance back to an RGB image.
///
/// The input is scaled to the 8-bit domain, transformed, clamped to [0, 255] and scaled back,
/// so the output is always a valid RGB image in the range [0, 1] even when the chrominance
/// comes from an unconstrained prediction.
///
/// # Arguments
///
/// * `src` - The input YUV image.
/// * `dst` - The output RGB image in the range [0, 1].
///
/// Precondition: the input and output images must have the same size.
///
/// # Example
///
/// ```
/// use chroma_image::{Image, ImageSize};
/// use chroma_imgproc::color::rgb_from_yuv;
///
/// // a saturated chrominance that falls outside of the RGB cube
/// let image = Image::<f32, 3>::new([1, 1].into(), vec![1.0, 1.0, 1.0]).unwrap();
///
/// let mut rgb = Image::from_size_val(image.size(), 0.0).unwrap();
///
/// rgb_from_yuv(&image, &mut rgb).unwrap();
///
/// assert!(rgb.as_slice().iter().all(|&x| (0.0..=1.0).contains(&x)));
/// ```
pub fn rgb_from_yuv(src: &Image<f32, 3>, dst: &mut Image<f32, 3>) -> Result<(), ImageError> {
    check_sizes(src, dst)?;

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let y = src_pixel[0] * 255.0;
        let u = src_pixel[1] * 255.0;
        let v = src_pixel[2] * 255.0;

        for (out, (coeffs, bias)) in dst_pixel
            .iter_mut()
            .zip(YUV2RGB.iter().zip(YUV2RGB_BIAS.iter()))
        {
            let value = coeffs[0] * y + coeffs[1] * u + coeffs[2] * v + bias;
            *out = value.clamp(0.0, 255.0) / 255.0;
        }
    });

    Ok(())
}

/// Split a YUV image into its luminance plane and its chrominance planes.
///
/// Precondition: all the images must have the same size.
pub fn luma_chroma_from_yuv(
    src: &Image<f32, 3>,
    luma: &mut Image<f32, 1>,
    chroma: &mut Image<f32, 2>,
) -> Result<(), ImageError> {
    check_sizes(src, luma)?;
    check_sizes(src, chroma)?;

    parallel::par_iter_rows(src, luma, |src_pixel, dst_pixel| {
        dst_pixel[0] = src_pixel[0];
    });
    parallel::par_iter_rows(src, chroma, |src_pixel, dst_pixel| {
        dst_pixel[0] = src_pixel[1];
        dst_pixel[1] = src_pixel[2];
    });

    Ok(())
}

/// Join a luminance plane with predicted chrominance planes into a YUV image.
///
/// Precondition: all the images must have the same size.
///
/// # Example
///
/// ```
/// use chroma_image::Image;
/// use chroma_imgproc::color::yuv_from_luma_chroma;
///
/// let luma = Image::<f32, 1>::from_size_val([2, 2].into(), 0.3).unwrap();
/// let chroma = Image::<f32, 2>::from_size_val([2, 2].into(), 0.5).unwrap();
/// let mut yuv = Image::<f32, 3>::from_size_val([2, 2].into(), 0.0).unwrap();
///
/// yuv_from_luma_chroma(&luma, &chroma, &mut yuv).unwrap();
///
/// assert_eq!(&yuv.as_slice()[..3], &[0.3, 0.5, 0.5]);
/// ```
pub fn yuv_from_luma_chroma(
    luma: &Image<f32, 1>,
    chroma: &Image<f32, 2>,
    dst: &mut Image<f32, 3>,
) -> Result<(), ImageError> {
    check_sizes(luma, dst)?;
    check_sizes(chroma, dst)?;

    parallel::par_iter_rows_two(luma, chroma, dst, |y, uv, dst_pixel| {
        dst_pixel[0] = y[0];
        dst_pixel[1] = uv[0];
        dst_pixel[2] = uv[1];
    });

    Ok(())
}
