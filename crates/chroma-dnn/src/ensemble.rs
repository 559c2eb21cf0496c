use std::{fmt, path::Path, str::FromStr};

use chroma_image::Image;
use chroma_imgproc::recombine::recombine_by_saturation;

use crate::{
    backbone::BackboneFeatures,
    checkpoint::load_checkpoint,
    colornet::{luma_from_rgb, rgb_from_prediction, ColorNet},
    error::DnnError,
};

/// The color a model was biased towards by its training set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorBias {
    /// Biased to red tones.
    Red,
    /// Biased to green tones.
    Green,
    /// Biased to blue tones.
    Blue,
    /// Biased to blue-green tones.
    BlueGreen,
}

impl ColorBias {
    /// Every bias, in the order the ensemble combines them.
    pub const ALL: [ColorBias; 4] = [
        ColorBias::Red,
        ColorBias::Green,
        ColorBias::Blue,
        ColorBias::BlueGreen,
    ];

    /// The stable name of the bias.
    pub fn name(&self) -> &'static str {
        match self {
            ColorBias::Red => "red",
            ColorBias::Green => "green",
            ColorBias::Blue => "blue",
            ColorBias::BlueGreen => "blue_green",
        }
    }

    /// The checkpoint file name of the model trained for this bias, `model_<name>.ckpt`.
    pub fn checkpoint_file_name(&self) -> String {
        format!("model_{}.ckpt", self.name())
    }
}

impl fmt::Display for ColorBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorBias {
    type Err = DnnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColorBias::ALL
            .into_iter()
            .find(|bias| bias.name() == s)
            .ok_or_else(|| DnnError::UnknownColorBias(s.to_string()))
    }
}

/// How much the saturation of each biased prediction is trusted.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SaturationWeights {
    /// Weight of the red biased model.
    pub red: f32,
    /// Weight of the green biased model.
    pub green: f32,
    /// Weight of the blue biased model.
    pub blue: f32,
    /// Weight of the blue-green biased model.
    pub blue_green: f32,
}

impl Default for SaturationWeights {
    fn default() -> Self {
        Self {
            red: 1.0 / 8.0,
            green: 7.0 / 32.0,
            blue: 7.0 / 32.0,
            blue_green: 7.0 / 16.0,
        }
    }
}

impl SaturationWeights {
    /// The weight of a bias.
    pub fn get(&self, bias: ColorBias) -> f32 {
        match bias {
            ColorBias::Red => self.red,
            ColorBias::Green => self.green,
            ColorBias::Blue => self.blue,
            ColorBias::BlueGreen => self.blue_green,
        }
    }

    /// The weights in the order of [`ColorBias::ALL`].
    pub fn to_array(&self) -> [f32; 4] {
        ColorBias::ALL.map(|bias| self.get(bias))
    }
}

impl FromStr for SaturationWeights {
    type Err = DnnError;

    /// Parse `red,green,blue,blue_green`, e.g. `0.125,0.21875,0.21875,0.4375`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DnnError::InvalidSaturationWeights(format!("{s}: {e}")))?;

        let [red, green, blue, blue_green] = values[..] else {
            return Err(DnnError::InvalidSaturationWeights(format!(
                "{s}: expected 4 values, got {}",
                values.len()
            )));
        };

        if values.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DnnError::InvalidSaturationWeights(format!(
                "{s}: weights must be finite and non negative"
            )));
        }

        Ok(Self {
            red,
            green,
            blue,
            blue_green,
        })
    }
}

/// Four decoders, one per [`ColorBias`], whose predictions are blended by saturation.
#[derive(Clone, Debug)]
pub struct ColorizerEnsemble {
    /// The decoders in the order of [`ColorBias::ALL`].
    pub models: [ColorNet; 4],
    /// The trust placed in each decoder.
    pub weights: SaturationWeights,
}

impl ColorizerEnsemble {
    /// Load `model_<bias>.ckpt` for every bias from a directory.
    ///
    /// # Arguments
    ///
    /// * `models_dir` - The directory holding the four checkpoints.
    /// * `weights` - The saturation weights of the biases.
    pub fn load(models_dir: impl AsRef<Path>, weights: SaturationWeights) -> Result<Self, DnnError> {
        let models_dir = models_dir.as_ref();
        let mut models = Vec::with_capacity(4);
        for bias in ColorBias::ALL {
            let path = models_dir.join(bias.checkpoint_file_name());
            log::info!("loading the {bias} biased model from {}", path.display());
            let checkpoint = load_checkpoint(&path)?;
            if let Some(trained_for) = checkpoint.bias.as_deref().filter(|b| *b != bias.name()) {
                log::warn!("{} was trained for the {trained_for} bias", path.display());
            }
            models.push(checkpoint.to_model()?);
        }

        let models: [ColorNet; 4] = models
            .try_into()
            .map_err(|_| DnnError::CheckpointParameter("expected four models".to_string()))?;

        Ok(Self { models, weights })
    }

    /// Colorize a grayscale image.
    ///
    /// The four decoders run in parallel on the same features. Each prediction is joined with
    /// the luminance of the input and converted to RGB before the saturation weighted blend.
    ///
    /// # Arguments
    ///
    /// * `features` - The backbone activations of the grayscale image.
    /// * `gray_rgb` - The grayscale image replicated to three channels.
    ///
    /// # Returns
    ///
    /// The colorized RGB image, of the size of `gray_rgb`.
    pub fn colorize(
        &self,
        features: &BackboneFeatures,
        gray_rgb: &Image<f32, 3>,
    ) -> Result<Image<f32, 3>, DnnError> {
        let luma = luma_from_rgb(gray_rgb)?;
        let predict = |model: &ColorNet| -> Result<Image<f32, 3>, DnnError> {
            let chroma = model.predict(features, gray_rgb)?;
            rgb_from_prediction(&luma, &chroma)
        };

        let [red, green, blue, blue_green] = &self.models;
        let ((red, green), (blue, blue_green)) = rayon::join(
            || rayon::join(|| predict(red), || predict(green)),
            || rayon::join(|| predict(blue), || predict(blue_green)),
        );

        let predictions = [red?, green?, blue?, blue_green?];
        Ok(recombine_by_saturation(
            &predictions,
            &self.weights.to_array(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{save_checkpoint, Checkpoint};
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_color_bias_names() -> Result<(), DnnError> {
        for bias in ColorBias::ALL {
            assert_eq!(bias.name().parse::<ColorBias>()?, bias);
        }
        assert_eq!(ColorBias::BlueGreen.to_string(), "blue_green");
        assert_eq!(
            ColorBias::BlueGreen.checkpoint_file_name(),
            "model_blue_green.ckpt"
        );
        assert!("purple".parse::<ColorBias>().is_err());
        assert_eq!(serde_json::to_string(&ColorBias::BlueGreen)?, "\"blue_green\"");
        Ok(())
    }

    #[test]
    fn test_saturation_weights() -> Result<(), DnnError> {
        let defaults = SaturationWeights::default();
        assert_eq!(defaults.to_array(), [0.125, 0.21875, 0.21875, 0.4375]);
        assert_relative_eq!(defaults.to_array().iter().sum::<f32>(), 1.0);

        let parsed: SaturationWeights = "0.125, 0.21875,0.21875,0.4375".parse()?;
        assert_eq!(parsed, defaults);

        assert!("1,2,3".parse::<SaturationWeights>().is_err());
        assert!("1,2,x,4".parse::<SaturationWeights>().is_err());
        assert!("1,-2,3,4".parse::<SaturationWeights>().is_err());
        Ok(())
    }

    #[test]
    fn test_ensemble_of_identical_models() -> Result<(), DnnError> {
        let model = ColorNet::new(&mut StdRng::seed_from_u64(21))?;
        let ensemble = ColorizerEnsemble {
            models: [model.clone(), model.clone(), model.clone(), model.clone()],
            weights: SaturationWeights::default(),
        };

        let gray_rgb = Image::<f32, 3>::from_size_val([16, 16].into(), 0.4)?;
        let features = BackboneFeatures::zeros(16, 16);

        let colorized = ensemble.colorize(&features, &gray_rgb)?;
        let single = rgb_from_prediction(
            &luma_from_rgb(&gray_rgb)?,
            &model.predict(&features, &gray_rgb)?,
        )?;

        assert_eq!(colorized.size(), gray_rgb.size());
        for (a, b) in colorized.as_slice().iter().zip(single.as_slice()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_ensemble_load() -> Result<(), DnnError> {
        let tmp_dir = tempfile::tempdir()?;
        let mut rng = StdRng::seed_from_u64(3);
        let mut expected = Vec::new();
        for bias in ColorBias::ALL {
            let model = ColorNet::new(&mut rng)?;
            let checkpoint = Checkpoint::from_model(&model, 10, Some(bias.name()));
            save_checkpoint(tmp_dir.path().join(bias.checkpoint_file_name()), &checkpoint)?;
            expected.push(model);
        }

        let ensemble = ColorizerEnsemble::load(tmp_dir.path(), SaturationWeights::default())?;
        assert_eq!(ensemble.models.to_vec(), expected);

        std::fs::remove_file(tmp_dir.path().join("model_blue.ckpt"))?;
        assert!(ColorizerEnsemble::load(tmp_dir.path(), SaturationWeights::default()).is_err());
        Ok(())
    }
}
