use chroma_nn::{batch_norm::BatchNorm, init::truncated_normal};
use chroma_tensor::Tensor4;
use rand::Rng;

use crate::error::DnnError;

/// Standard deviation of the truncated normal the kernels are drawn from.
pub const WEIGHT_STDDEV: f32 = 0.01;

/// Names and HWIO shapes of the decoder kernels, in pipeline order.
pub const KERNEL_SHAPES: [(&str, [usize; 4]); 6] = [
    ("wc1", [1, 1, 512, 256]),
    ("wc2", [3, 3, 256, 128]),
    ("wc3", [3, 3, 128, 64]),
    ("wc4", [3, 3, 64, 3]),
    ("wc5", [3, 3, 3, 3]),
    ("wc6", [3, 3, 3, 2]),
];

/// Names and channel counts of the batch normalization layers.
///
/// The first five normalize the decoder inputs, the last four the outputs of the
/// convolutions of the same name.
pub const NORM_CHANNELS: [(&str, usize); 9] = [
    ("conv4_3", 512),
    ("conv3_3", 256),
    ("conv2_2", 128),
    ("conv1_2", 64),
    ("grayscale", 3),
    ("wc2", 128),
    ("wc3", 64),
    ("wc4", 3),
    ("wc5", 3),
];

/// The convolution kernels of the decoder, in HWIO layout.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorNetWeights {
    /// 1x1 kernel reducing `conv4_3` from 512 to 256 channels.
    pub wc1: Tensor4<f32>,
    /// 3x3 kernel, 256 to 128 channels.
    pub wc2: Tensor4<f32>,
    /// 3x3 kernel, 128 to 64 channels.
    pub wc3: Tensor4<f32>,
    /// 3x3 kernel, 64 to 3 channels.
    pub wc4: Tensor4<f32>,
    /// 3x3 kernel, 3 to 3 channels.
    pub wc5: Tensor4<f32>,
    /// 3x3 kernel producing the two chrominance channels.
    pub wc6: Tensor4<f32>,
}

impl ColorNetWeights {
    /// Draw every kernel from a normal distribution truncated at two standard deviations.
    ///
    /// # Example
    ///
    /// ```
    /// use chroma_dnn::weights::ColorNetWeights;
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let weights = ColorNetWeights::random(&mut StdRng::seed_from_u64(0)).unwrap();
    /// assert_eq!(weights.wc6.shape, [3, 3, 3, 2]);
    /// ```
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Result<Self, DnnError> {
        let [wc1, wc2, wc3, wc4, wc5, wc6] = KERNEL_SHAPES.map(|(_, shape)| shape);
        Ok(Self {
            wc1: truncated_normal(wc1, WEIGHT_STDDEV, rng)?,
            wc2: truncated_normal(wc2, WEIGHT_STDDEV, rng)?,
            wc3: truncated_normal(wc3, WEIGHT_STDDEV, rng)?,
            wc4: truncated_normal(wc4, WEIGHT_STDDEV, rng)?,
            wc5: truncated_normal(wc5, WEIGHT_STDDEV, rng)?,
            wc6: truncated_normal(wc6, WEIGHT_STDDEV, rng)?,
        })
    }

    /// All zero kernels of the decoder shapes.
    pub fn zeros() -> Self {
        let [wc1, wc2, wc3, wc4, wc5, wc6] = KERNEL_SHAPES.map(|(_, shape)| Tensor4::zeros(shape));
        Self {
            wc1,
            wc2,
            wc3,
            wc4,
            wc5,
            wc6,
        }
    }

    /// The kernels paired with their names, in pipeline order.
    pub fn named(&self) -> [(&'static str, &Tensor4<f32>); 6] {
        [
            ("wc1", &self.wc1),
            ("wc2", &self.wc2),
            ("wc3", &self.wc3),
            ("wc4", &self.wc4),
            ("wc5", &self.wc5),
            ("wc6", &self.wc6),
        ]
    }

    /// Mutable kernels paired with their names, in pipeline order.
    pub fn named_mut(&mut self) -> [(&'static str, &mut Tensor4<f32>); 6] {
        [
            ("wc1", &mut self.wc1),
            ("wc2", &mut self.wc2),
            ("wc3", &mut self.wc3),
            ("wc4", &mut self.wc4),
            ("wc5", &mut self.wc5),
            ("wc6", &mut self.wc6),
        ]
    }
}

/// One value per batch normalization layer of the decoder.
///
/// Holds the layers themselves, their forward caches or their parameter gradients.
#[derive(Clone, Debug, PartialEq)]
pub struct NormLayers<T> {
    /// Normalization of the `conv4_3` backbone features.
    pub conv4_3: T,
    /// Normalization of the `conv3_3` backbone features.
    pub conv3_3: T,
    /// Normalization of the `conv2_2` backbone features.
    pub conv2_2: T,
    /// Normalization of the `conv1_2` backbone features.
    pub conv1_2: T,
    /// Normalization of the grayscale image.
    pub grayscale: T,
    /// Normalization after `wc2`.
    pub wc2: T,
    /// Normalization after `wc3`.
    pub wc3: T,
    /// Normalization after `wc4`.
    pub wc4: T,
    /// Normalization after `wc5`.
    pub wc5: T,
}

impl<T> NormLayers<T> {
    /// Build every entry from its name and channel count.
    pub fn from_fn(mut f: impl FnMut(&'static str, usize) -> T) -> Self {
        let [conv4_3, conv3_3, conv2_2, conv1_2, grayscale, wc2, wc3, wc4, wc5] =
            NORM_CHANNELS.map(|(name, channels)| f(name, channels));
        Self {
            conv4_3,
            conv3_3,
            conv2_2,
            conv1_2,
            grayscale,
            wc2,
            wc3,
            wc4,
            wc5,
        }
    }

    /// The entries paired with their names, in the order of [`NORM_CHANNELS`].
    pub fn named(&self) -> [(&'static str, &T); 9] {
        [
            ("conv4_3", &self.conv4_3),
            ("conv3_3", &self.conv3_3),
            ("conv2_2", &self.conv2_2),
            ("conv1_2", &self.conv1_2),
            ("grayscale", &self.grayscale),
            ("wc2", &self.wc2),
            ("wc3", &self.wc3),
            ("wc4", &self.wc4),
            ("wc5", &self.wc5),
        ]
    }

    /// Mutable entries paired with their names, in the order of [`NORM_CHANNELS`].
    pub fn named_mut(&mut self) -> [(&'static str, &mut T); 9] {
        [
            ("conv4_3", &mut self.conv4_3),
            ("conv3_3", &mut self.conv3_3),
            ("conv2_2", &mut self.conv2_2),
            ("conv1_2", &mut self.conv1_2),
            ("grayscale", &mut self.grayscale),
            ("wc2", &mut self.wc2),
            ("wc3", &mut self.wc3),
            ("wc4", &mut self.wc4),
            ("wc5", &mut self.wc5),
        ]
    }
}

impl NormLayers<BatchNorm> {
    /// Freshly initialized layers: unit scale, zero shift, zero mean and unit variance.
    pub fn new() -> Self {
        Self::from_fn(|_, channels| BatchNorm::new(channels))
    }
}

impl Default for NormLayers<BatchNorm> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_random_weights() -> Result<(), DnnError> {
        let weights = ColorNetWeights::random(&mut StdRng::seed_from_u64(7))?;
        for ((name, kernel), (expected_name, shape)) in weights.named().into_iter().zip(KERNEL_SHAPES)
        {
            assert_eq!(name, expected_name);
            assert_eq!(kernel.shape, shape);
            assert!(kernel
                .as_slice()
                .iter()
                .all(|w| w.abs() <= 2.0 * WEIGHT_STDDEV));
        }
        Ok(())
    }

    #[test]
    fn test_norm_layers_order() {
        let norms = NormLayers::<BatchNorm>::new();
        for ((name, norm), (expected_name, channels)) in norms.named().into_iter().zip(NORM_CHANNELS)
        {
            assert_eq!(name, expected_name);
            assert_eq!(norm.channels(), channels);
        }
        assert_eq!(norms.wc2.channels(), 128);
    }
}
