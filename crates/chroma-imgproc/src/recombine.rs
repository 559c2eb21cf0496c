use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::{ParallelSlice, ParallelSliceMut},
};

use crate::color::saturation_from_rgb;
use chroma_image::{Image, ImageError, ImageSize};

fn check_inputs(images: &[Image<f32, 3>], weights: &[f32]) -> Result<ImageSize, ImageError> {
    let first = images.first().ok_or(ImageError::EmptyImageList)?;
    if weights.len() != images.len() {
        return Err(ImageError::WeightCountMismatch(weights.len(), images.len()));
    }
    let size = first.size();
    for image in images.iter().skip(1) {
        if image.size() != size {
            return Err(ImageError::InvalidImageSize(
                image.cols(),
                image.rows(),
                size.width,
                size.height,
            ));
        }
    }
    Ok(size)
}

/// Per pixel relative weights, interleaved as `num_pixels x images.len()`.
fn interleaved_weights(
    images: &[Image<f32, 3>],
    weights: &[f32],
) -> Result<(ImageSize, Vec<f32>), ImageError> {
    let size = check_inputs(images, weights)?;
    let n = images.len();

    let saturations = images
        .iter()
        .map(|image| {
            let mut saturation = Image::from_size_val(size, 0.0)?;
            saturation_from_rgb(image, &mut saturation)?;
            Ok(saturation)
        })
        .collect::<Result<Vec<Image<f32, 1>>, ImageError>>()?;

    let mut relative = vec![0.0f32; size.width * size.height * n];
    relative
        .par_chunks_exact_mut(n)
        .enumerate()
        .for_each(|(i, out)| {
            let mut denominator = 0.0;
            for ((o, saturation), &w) in out.iter_mut().zip(&saturations).zip(weights) {
                *o = w * saturation.as_slice()[i];
                denominator += *o;
            }

            if denominator > 0.0 {
                out.iter_mut().for_each(|o| *o /= denominator);
            } else {
                // every prediction is colorless at this pixel
                out.fill(1.0 / n as f32);
            }
        });

    Ok((size, relative))
}

/// Compute the relative weight of each prediction at every pixel.
///
/// The weight of prediction `i` at a pixel is its HSV saturation scaled by the trust
/// weight `weights[i]`, normalized so that the weights of all the predictions sum to one.
/// Where every prediction has zero weighted saturation the weights fall back to `1 / N`.
///
/// # Arguments
///
/// * `images` - The RGB predictions in the range [0, 1], all of the same size.
/// * `weights` - One trust weight per prediction.
///
/// # Returns
///
/// One single channel weight image per prediction.
///
/// # Errors
///
/// Fails when `images` is empty, when the number of weights differs from the number of
/// images or when the images do not share the same size.
pub fn relative_saturation_weights(
    images: &[Image<f32, 3>],
    weights: &[f32],
) -> Result<Vec<Image<f32, 1>>, ImageError> {
    let (size, relative) = interleaved_weights(images, weights)?;
    let n = images.len();

    (0..n)
        .map(|k| Image::new(size, relative.iter().skip(k).step_by(n).copied().collect()))
        .collect()
}

/// Blend several RGB predictions of the same image into one, trusting the most saturated.
///
/// Each output pixel is the convex combination of the input pixels with the weights of
/// [`relative_saturation_weights`], applied to the three channels alike.
///
/// # Arguments
///
/// * `images` - The RGB predictions in the range [0, 1], all of the same size.
/// * `weights` - One trust weight per prediction.
///
/// # Returns
///
/// The blended RGB image.
///
/// # Example
///
/// ```
/// use chroma_image::Image;
/// use chroma_imgproc::recombine::recombine_by_saturation;
///
/// let red = Image::<f32, 3>::new([1, 1].into(), vec![1.0, 0.0, 0.0]).unwrap();
/// let gray = Image::<f32, 3>::new([1, 1].into(), vec![0.5, 0.5, 0.5]).unwrap();
///
/// // the colorless prediction gets no weight
/// let blended = recombine_by_saturation(&[red.clone(), gray], &[0.5, 0.5]).unwrap();
/// assert_eq!(blended, red);
/// ```
pub fn recombine_by_saturation(
    images: &[Image<f32, 3>],
    weights: &[f32],
) -> Result<Image<f32, 3>, ImageError> {
    let (size, relative) = interleaved_weights(images, weights)?;
    let n = images.len();

    let mut dst = Image::<f32, 3>::from_size_val(size, 0.0)?;
    dst.as_slice_mut()
        .par_chunks_exact_mut(3)
        .zip(relative.par_chunks_exact(n))
        .enumerate()
        .for_each(|(i, (dst_pixel, pixel_weights))| {
            let offset = i * 3;
            for (image, &w) in images.iter().zip(pixel_weights) {
                let src_pixel = &image.as_slice()[offset..offset + 3];
                for (d, &s) in dst_pixel.iter_mut().zip(src_pixel) {
                    *d += w * s;
                }
            }
        });

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const WEIGHTS: [f32; 4] = [1. / 8., 7. / 32., 7. / 32., 7. / 16.];

    fn colorful(seed: f32) -> Result<Image<f32, 3>, ImageError> {
        let data = (0..6 * 5 * 3)
            .map(|i| ((i as f32 + seed) * 0.618).fract())
            .collect();
        Image::new([6, 5].into(), data)
    }

    #[test]
    fn weights_sum_to_one() -> Result<(), ImageError> {
        let images = (0..4)
            .map(|k| colorful(k as f32 * 3.7))
            .collect::<Result<Vec<_>, _>>()?;

        let relative = relative_saturation_weights(&images, &WEIGHTS)?;
        assert_eq!(relative.len(), 4);

        for i in 0..6 * 5 {
            let sum: f32 = relative.iter().map(|w| w.as_slice()[i]).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn identical_inputs_are_unchanged() -> Result<(), ImageError> {
        let image = colorful(1.0)?;
        let images = vec![image.clone(); 4];

        let blended = recombine_by_saturation(&images, &WEIGHTS)?;
        for (a, b) in blended.as_slice().iter().zip(image.as_slice()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn colorless_inputs_take_the_uniform_fallback() -> Result<(), ImageError> {
        let images = [0.0, 0.2, 0.6, 1.0]
            .iter()
            .map(|&v| Image::<f32, 3>::from_size_val([4, 4].into(), v))
            .collect::<Result<Vec<_>, _>>()?;

        let relative = relative_saturation_weights(&images, &WEIGHTS)?;
        for w in relative.iter() {
            assert!(w.as_slice().iter().all(|&x| x == 0.25));
        }

        let blended = recombine_by_saturation(&images, &WEIGHTS)?;
        for &x in blended.as_slice() {
            assert!(x.is_finite());
            assert_relative_eq!(x, 0.45, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn saturation_decides_the_blend() -> Result<(), ImageError> {
        // saturation 1.0 and 0.5 with equal trust weights
        let a = Image::<f32, 3>::new([1, 1].into(), vec![0.0, 0.0, 1.0])?;
        let b = Image::<f32, 3>::new([1, 1].into(), vec![1.0, 0.5, 0.5])?;

        let relative = relative_saturation_weights(&[a.clone(), b.clone()], &[1.0, 1.0])?;
        assert_relative_eq!(relative[0].as_slice()[0], 2.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(relative[1].as_slice()[0], 1.0 / 3.0, epsilon = 1e-6);

        let blended = recombine_by_saturation(&[a, b], &[1.0, 1.0])?;
        let expected = [1.0 / 3.0, 1.0 / 6.0, 2.0 / 3.0 + 1.0 / 6.0];
        for (x, e) in blended.as_slice().iter().zip(expected.iter()) {
            assert_relative_eq!(x, e, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn invalid_inputs() -> Result<(), ImageError> {
        assert_eq!(
            recombine_by_saturation(&[], &[]),
            Err(ImageError::EmptyImageList)
        );

        let a = Image::<f32, 3>::from_size_val([2, 2].into(), 0.5)?;
        let b = Image::<f32, 3>::from_size_val([2, 3].into(), 0.5)?;
        assert_eq!(
            recombine_by_saturation(&[a.clone()], &[1.0, 1.0]),
            Err(ImageError::WeightCountMismatch(2, 1))
        );
        assert!(recombine_by_saturation(&[a, b], &[1.0, 1.0]).is_err());
        Ok(())
    }

    #[test]
    fn zero_width_inputs() -> Result<(), ImageError> {
        let image = Image::<f32, 3>::new([0, 4].into(), vec![])?;

        let mut yuv = image.clone();
        crate::color::yuv_from_rgb(&image, &mut yuv)?;

        let blended = recombine_by_saturation(&[image.clone(), image], &[0.5, 0.5])?;
        assert_eq!(blended.size(), [0, 4].into());
        assert_eq!(blended.numel(), 0);
        Ok(())
    }
}
