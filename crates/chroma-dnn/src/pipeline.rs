use std::path::{Path, PathBuf};

use chroma_image::{ops, Image, ImageSize};
use chroma_imgproc::{
    color::{gray_from_rgb, rgb_from_gray},
    concat::concat_horizontal,
    resize::resize_bilinear,
};
use chroma_io::{
    dir::list_jpeg_files,
    jpeg::{read_image_jpeg_rgb8, write_image_jpeg_rgb8},
};

use crate::{backbone::FeatureExtractor, ensemble::ColorizerEnsemble, error::DnnError};

/// Side of the square images the decoders run on.
pub const IMAGE_SIZE: usize = 224;

/// Default quality of the written JPEG files.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// The images produced for one input.
#[derive(Clone, Debug)]
pub struct Colorized {
    /// The input resized to the network size.
    pub original: Image<f32, 3>,
    /// Its grayscale version replicated to three channels.
    pub grayscale: Image<f32, 3>,
    /// The blended prediction of the ensemble.
    pub colorized: Image<f32, 3>,
}

impl Colorized {
    /// The `[grayscale | colorized | original]` strip.
    pub fn composite(&self) -> Result<Image<f32, 3>, DnnError> {
        let left = concat_horizontal(&self.grayscale, &self.colorized)?;
        Ok(concat_horizontal(&left, &self.original)?)
    }
}

/// Number of processed and failed files of a directory run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColorizeSummary {
    /// Files written to the output directory.
    pub processed: usize,
    /// Files that could not be read, colorized or written.
    pub failed: usize,
}

/// Grayscale to color inference: backbone, ensemble and composition.
pub struct Colorizer {
    backbone: Box<dyn FeatureExtractor>,
    ensemble: ColorizerEnsemble,
    image_size: usize,
}

impl Colorizer {
    /// Create a colorizer running on [`IMAGE_SIZE`] square images.
    pub fn new(backbone: Box<dyn FeatureExtractor>, ensemble: ColorizerEnsemble) -> Self {
        Self {
            backbone,
            ensemble,
            image_size: IMAGE_SIZE,
        }
    }

    /// Use another network input size, a positive multiple of 8.
    pub fn with_image_size(mut self, image_size: usize) -> Self {
        self.image_size = image_size;
        self
    }

    /// Colorize an 8 bit RGB image.
    ///
    /// The image is resized to the network size and converted to grayscale before the
    /// prediction, so color inputs are recolorized.
    pub fn colorize_image(&mut self, image: &Image<u8, 3>) -> Result<Colorized, DnnError> {
        let image_f32 = image.cast_and_scale(1.0f32 / 255.0)?;

        let size = ImageSize {
            width: self.image_size,
            height: self.image_size,
        };
        let mut original = Image::from_size_val(size, 0.0f32)?;
        resize_bilinear(&image_f32, &mut original)?;

        let mut gray = Image::from_size_val(size, 0.0f32)?;
        gray_from_rgb(&original, &mut gray)?;
        let mut grayscale = Image::from_size_val(size, 0.0f32)?;
        rgb_from_gray(&gray, &mut grayscale)?;

        let features = self.backbone.extract(&grayscale)?;
        let colorized = self.ensemble.colorize(&features, &grayscale)?;

        Ok(Colorized {
            original,
            grayscale,
            colorized,
        })
    }

    /// Colorize a JPEG file and write the composite under the same file name.
    ///
    /// # Returns
    ///
    /// The path of the written composite.
    pub fn colorize_file(
        &mut self,
        image_path: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        quality: u8,
    ) -> Result<PathBuf, DnnError> {
        let image_path = image_path.as_ref();
        let file_name = image_path
            .file_name()
            .ok_or_else(|| chroma_io::IoError::InvalidFileExtension(image_path.to_path_buf()))?;

        let image = read_image_jpeg_rgb8(image_path)?;
        let composite = self.colorize_image(&image)?.composite()?;

        let output_path = output_dir.as_ref().join(file_name);
        write_image_jpeg_rgb8(&output_path, &ops::quantize_u8(&composite)?, quality)?;
        Ok(output_path)
    }

    /// Colorize every JPEG file of a directory into the output directory.
    ///
    /// A file that fails is logged and skipped; the others are still processed.
    pub fn colorize_dir(
        &mut self,
        image_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        quality: u8,
    ) -> Result<ColorizeSummary, DnnError> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;

        let image_paths = list_jpeg_files(image_dir)?;
        log::info!("found {} images to colorize", image_paths.len());

        let mut summary = ColorizeSummary::default();
        for image_path in image_paths.iter() {
            log::info!("evaluating {}", image_path.display());
            match self.colorize_file(image_path, output_dir, quality) {
                Ok(output_path) => {
                    log::info!("saved the evaluation to {}", output_path.display());
                    summary.processed += 1;
                }
                Err(e @ DnnError::FeatureShapeMismatch { .. }) => return Err(e),
                Err(e) => {
                    log::error!("failed to colorize {}: {e}", image_path.display());
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backbone::BackboneFeatures, colornet::ColorNet, ensemble::SaturationWeights};
    use rand::{rngs::StdRng, SeedableRng};

    /// Average pools the grayscale image into constant feature maps.
    struct PoolingBackbone;

    impl FeatureExtractor for PoolingBackbone {
        fn extract(&mut self, gray_rgb: &Image<f32, 3>) -> Result<BackboneFeatures, DnnError> {
            let mean = gray_rgb.as_slice().iter().sum::<f32>() / gray_rgb.numel().max(1) as f32;
            let mut features = BackboneFeatures::zeros(gray_rgb.height(), gray_rgb.width());
            for map in [
                &mut features.conv1_2,
                &mut features.conv2_2,
                &mut features.conv3_3,
                &mut features.conv4_3,
            ] {
                map.fill(mean);
            }
            Ok(features)
        }
    }

    /// Returns features of the wrong depth.
    struct BrokenBackbone;

    impl FeatureExtractor for BrokenBackbone {
        fn extract(&mut self, gray_rgb: &Image<f32, 3>) -> Result<BackboneFeatures, DnnError> {
            let mut features = BackboneFeatures::zeros(gray_rgb.height(), gray_rgb.width());
            features.conv4_3 = chroma_tensor::Tensor3::zeros([1, 1, 3]);
            Ok(features)
        }
    }

    fn ensemble() -> Result<ColorizerEnsemble, DnnError> {
        let mut rng = StdRng::seed_from_u64(8);
        Ok(ColorizerEnsemble {
            models: [
                ColorNet::new(&mut rng)?,
                ColorNet::new(&mut rng)?,
                ColorNet::new(&mut rng)?,
                ColorNet::new(&mut rng)?,
            ],
            weights: SaturationWeights::default(),
        })
    }

    #[test]
    fn test_colorize_image_composite() -> Result<(), DnnError> {
        let mut colorizer =
            Colorizer::new(Box::new(PoolingBackbone), ensemble()?).with_image_size(16);

        let image = Image::<u8, 3>::from_size_val([20, 12].into(), 200)?;
        let colorized = colorizer.colorize_image(&image)?;
        assert_eq!(colorized.original.size(), [16, 16].into());
        assert_eq!(colorized.colorized.size(), [16, 16].into());

        let composite = colorized.composite()?;
        assert_eq!(composite.size(), [48, 16].into());
        assert!(composite
            .as_slice()
            .iter()
            .all(|v| (-1e-5..=1.0 + 1e-5).contains(v)));
        Ok(())
    }

    #[test]
    fn test_colorize_dir() -> Result<(), DnnError> {
        let input_dir = tempfile::tempdir()?;
        let output_dir = tempfile::tempdir()?;

        let image = Image::<u8, 3>::from_size_val([24, 16].into(), 90)?;
        write_image_jpeg_rgb8(input_dir.path().join("a.jpg"), &image, 90)?;
        write_image_jpeg_rgb8(input_dir.path().join("b.jpeg"), &image, 90)?;
        std::fs::write(input_dir.path().join("broken.jpg"), b"not a jpeg")?;

        let mut colorizer =
            Colorizer::new(Box::new(PoolingBackbone), ensemble()?).with_image_size(16);
        let summary = colorizer.colorize_dir(input_dir.path(), output_dir.path(), 90)?;
        assert_eq!(
            summary,
            ColorizeSummary {
                processed: 2,
                failed: 1
            }
        );

        let written = read_image_jpeg_rgb8(output_dir.path().join("a.jpg"))?;
        assert_eq!(written.size(), [48, 16].into());
        assert!(output_dir.path().join("b.jpeg").exists());
        Ok(())
    }

    #[test]
    fn test_colorize_dir_stops_on_feature_mismatch() -> Result<(), DnnError> {
        let input_dir = tempfile::tempdir()?;
        let output_dir = tempfile::tempdir()?;
        let image = Image::<u8, 3>::from_size_val([16, 16].into(), 90)?;
        write_image_jpeg_rgb8(input_dir.path().join("a.jpg"), &image, 90)?;

        let mut colorizer =
            Colorizer::new(Box::new(BrokenBackbone), ensemble()?).with_image_size(16);
        assert!(matches!(
            colorizer.colorize_dir(input_dir.path(), output_dir.path(), 90),
            Err(DnnError::FeatureShapeMismatch { .. })
        ));
        Ok(())
    }
}
