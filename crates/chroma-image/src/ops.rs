use crate::{Image, ImageError};

/// Quantize a `[0, 1]` float image into 8 bits.
///
/// Values are clamped to `[0, 1]` and rounded to the nearest integer after scaling by 255.
///
/// ```
/// use chroma_image::Image;
/// use chroma_image::ops::quantize_u8;
///
/// let image = Image::<f32, 1>::new([3, 1].into(), vec![-0.2, 0.5, 1.7]).unwrap();
/// let image_u8 = quantize_u8(&image).unwrap();
/// assert_eq!(image_u8.as_slice(), &[0, 128, 255]);
/// ```
pub fn quantize_u8<const C: usize>(src: &Image<f32, C>) -> Result<Image<u8, C>, ImageError> {
    let data = src
        .as_slice()
        .iter()
        .map(|&x| (x.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    Image::new(src.size(), data)
}
