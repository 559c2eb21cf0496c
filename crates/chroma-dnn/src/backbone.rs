use chroma_image::Image;
use chroma_tensor::Tensor3;

use crate::error::DnnError;

/// Channels of the backbone feature maps, from the shallowest to the deepest.
pub const FEATURE_CHANNELS: [(&str, usize); 4] = [
    ("conv1_2", 64),
    ("conv2_2", 128),
    ("conv3_3", 256),
    ("conv4_3", 512),
];

/// Activations of a VGG16 style backbone for a single image.
///
/// Every map is laid out as `(height, width, channels)`. For an image of `H x W` pixels the
/// maps have the sizes `H x W`, `H/2 x W/2`, `H/4 x W/4` and `H/8 x W/8`.
#[derive(Clone, Debug, PartialEq)]
pub struct BackboneFeatures {
    /// Full resolution features with 64 channels.
    pub conv1_2: Tensor3<f32>,
    /// Half resolution features with 128 channels.
    pub conv2_2: Tensor3<f32>,
    /// Quarter resolution features with 256 channels.
    pub conv3_3: Tensor3<f32>,
    /// Eighth resolution features with 512 channels.
    pub conv4_3: Tensor3<f32>,
}

impl BackboneFeatures {
    /// The shapes the feature maps must have for an image of the given size.
    pub fn expected_shapes(height: usize, width: usize) -> [(&'static str, [usize; 3]); 4] {
        let mut shapes = [("", [0; 3]); 4];
        for (level, (shape, (name, channels))) in
            shapes.iter_mut().zip(FEATURE_CHANNELS).enumerate()
        {
            *shape = (name, [height >> level, width >> level, channels]);
        }
        shapes
    }

    /// Zero valued features for an image of the given size.
    pub fn zeros(height: usize, width: usize) -> Self {
        let [c12, c22, c33, c43] = Self::expected_shapes(height, width).map(|(_, s)| s);
        Self {
            conv1_2: Tensor3::zeros(c12),
            conv2_2: Tensor3::zeros(c22),
            conv3_3: Tensor3::zeros(c33),
            conv4_3: Tensor3::zeros(c43),
        }
    }

    /// The feature maps paired with their names, from the shallowest to the deepest.
    pub fn named_maps(&self) -> [(&'static str, &Tensor3<f32>); 4] {
        [
            ("conv1_2", &self.conv1_2),
            ("conv2_2", &self.conv2_2),
            ("conv3_3", &self.conv3_3),
            ("conv4_3", &self.conv4_3),
        ]
    }

    /// Check the maps against the sizes derived from an image of `height x width` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`DnnError::InvalidImageSize`] when the size is not a positive multiple of 8 and
    /// [`DnnError::FeatureShapeMismatch`] for the first map with an unexpected shape.
    pub fn validate(&self, height: usize, width: usize) -> Result<(), DnnError> {
        if height == 0 || width == 0 || height % 8 != 0 || width % 8 != 0 {
            return Err(DnnError::InvalidImageSize(width, height));
        }
        for ((name, map), (_, expected)) in self
            .named_maps()
            .into_iter()
            .zip(Self::expected_shapes(height, width))
        {
            if map.shape != expected {
                return Err(DnnError::FeatureShapeMismatch {
                    name,
                    expected,
                    actual: map.shape,
                });
            }
        }
        Ok(())
    }
}

/// A pretrained network providing the features the decoder is conditioned on.
///
/// The extractor receives the grayscale image replicated to three channels, with values in
/// `[0, 1]`.
pub trait FeatureExtractor: Send {
    /// Compute the backbone activations of one image.
    fn extract(&mut self, gray_rgb: &Image<f32, 3>) -> Result<BackboneFeatures, DnnError>;
}

#[cfg(feature = "onnx")]
pub use onnx::{OnnxBackbone, OnnxBackboneConfig};

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::PathBuf;

    use chroma_image::Image;
    use chroma_tensor::Tensor3;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor as OrtTensor;

    use super::{BackboneFeatures, FeatureExtractor};
    use crate::error::DnnError;

    /// Configuration of an [`OnnxBackbone`].
    #[derive(Clone, Debug)]
    pub struct OnnxBackboneConfig {
        /// Path to the ONNX export of the backbone.
        pub model_path: PathBuf,
        /// Number of threads to use for inference.
        pub num_threads: usize,
        /// Name of the `(1, 3, H, W)` image input.
        pub input_name: String,
        /// Factor applied to the `[0, 1]` pixels before they are fed to the graph.
        pub input_scale: f32,
        /// Names of the outputs holding `conv1_2`, `conv2_2`, `conv3_3` and `conv4_3`.
        pub output_names: [String; 4],
    }

    impl OnnxBackboneConfig {
        /// Default names of a VGG16 export for the given model file.
        pub fn new(model_path: impl Into<PathBuf>) -> Self {
            Self {
                model_path: model_path.into(),
                num_threads: 4,
                input_name: "images".to_string(),
                input_scale: 1.0,
                output_names: super::FEATURE_CHANNELS.map(|(name, _)| name.to_string()),
            }
        }
    }

    /// VGG16 feature extractor running an ONNX graph with `ort`.
    ///
    /// Pre-requisites:
    /// - ORT_DYLIB_PATH environment variable must be set to the path of the ORT dylib.
    pub struct OnnxBackbone {
        session: Session,
        config: OnnxBackboneConfig,
    }

    impl OnnxBackbone {
        /// Load the graph described by the configuration.
        pub fn new(config: OnnxBackboneConfig) -> Result<Self, DnnError> {
            log::info!("loading backbone from {}", config.model_path.display());
            let session = Session::builder()
                .map_err(ort_error)?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(ort_error)?
                .with_intra_threads(config.num_threads)
                .map_err(ort_error)?
                .commit_from_file(&config.model_path)
                .map_err(ort_error)?;
            Ok(Self { session, config })
        }
    }

    impl FeatureExtractor for OnnxBackbone {
        fn extract(&mut self, gray_rgb: &Image<f32, 3>) -> Result<BackboneFeatures, DnnError> {
            let (height, width) = (gray_rgb.height(), gray_rgb.width());

            // HWC -> NCHW
            let plane = height * width;
            let mut nchw = vec![0f32; 3 * plane];
            for (i, pixel) in gray_rgb.as_slice().chunks_exact(3).enumerate() {
                for (c, &v) in pixel.iter().enumerate() {
                    nchw[c * plane + i] = v * self.config.input_scale;
                }
            }
            let input =
                OrtTensor::from_array(([1usize, 3, height, width], nchw)).map_err(ort_error)?;

            let outputs = self
                .session
                .run(ort::inputs![self.config.input_name.as_str() => input])
                .map_err(ort_error)?;

            let mut maps = Vec::with_capacity(4);
            for name in self.config.output_names.iter() {
                let value = outputs
                    .get(name.as_str())
                    .ok_or_else(|| DnnError::BackboneError(format!("missing output {name}")))?;
                let (shape, data) = value.try_extract_tensor::<f32>().map_err(ort_error)?;
                maps.push(hwc_from_nchw(name, &shape[..], data)?);
            }

            let [conv1_2, conv2_2, conv3_3, conv4_3]: [Tensor3<f32>; 4] = maps
                .try_into()
                .map_err(|_| DnnError::BackboneError("expected four outputs".to_string()))?;

            Ok(BackboneFeatures {
                conv1_2,
                conv2_2,
                conv3_3,
                conv4_3,
            })
        }
    }

    fn ort_error(e: impl std::fmt::Display) -> DnnError {
        DnnError::BackboneError(e.to_string())
    }

    fn hwc_from_nchw(name: &str, shape: &[i64], data: &[f32]) -> Result<Tensor3<f32>, DnnError> {
        let &[1, c, h, w] = shape else {
            return Err(DnnError::BackboneError(format!(
                "output {name} has shape {shape:?}, expected (1, C, H, W)"
            )));
        };
        let (c, h, w) = (c as usize, h as usize, w as usize);
        let plane = h * w;
        let mut hwc = vec![0f32; data.len()];
        for (k, channel) in data.chunks_exact(plane.max(1)).enumerate().take(c) {
            for (i, &v) in channel.iter().enumerate() {
                hwc[i * c + k] = v;
            }
        }
        Ok(Tensor3::from_shape_vec([h, w, c], hwc)?)
    }
}
