use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use chroma_image::{ops, Image, ImageSize};
use chroma_imgproc::{
    color::{gray_from_rgb, luma_chroma_from_yuv, rgb_from_gray, yuv_from_rgb},
    concat::concat_horizontal,
    crop::random_crop,
    flip::{horizontal_flip, vertical_flip},
    resize::resize_bilinear,
};
use chroma_io::{
    dir::list_jpeg_files,
    jpeg::{read_image_jpeg_rgb8, write_image_jpeg_rgb8},
};
use chroma_nn::Phase;
use chroma_tensor::Tensor3;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use crate::{
    backbone::{BackboneFeatures, FeatureExtractor},
    checkpoint::{save_checkpoint, Checkpoint},
    colornet::{luma_from_rgb, rgb_from_prediction, ColorNet},
    ensemble::ColorBias,
    error::DnnError,
};

const SUMMARY_JPEG_QUALITY: u8 = 95;

/// Parameters of a training session.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Step size of the gradient descent.
    pub learning_rate: f32,
    /// Number of complete passes over the training images.
    pub num_epochs: u64,
    /// Write a summary image every this many steps.
    pub image_save_rate: u64,
    /// Write the incremental checkpoint every this many steps.
    pub model_save_rate: u64,
    /// Path of the incremental checkpoint.
    pub checkpoint_path: PathBuf,
    /// Path of the model written when training ends.
    pub final_model_path: PathBuf,
    /// Directory of the summary images and of the session configuration.
    pub summary_dir: PathBuf,
    /// Side of the square training crops, a positive multiple of 8.
    pub crop_size: usize,
    /// Randomly flip the crops horizontally and vertically.
    pub augment: bool,
    /// Seed of the crops, flips, shuffling and initial weights.
    pub seed: Option<u64>,
    /// The color bias of the training images, recorded in the checkpoints.
    pub bias: Option<ColorBias>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-4,
            num_epochs: 1_000_000_000,
            image_save_rate: 1000,
            model_save_rate: 100_000,
            checkpoint_path: PathBuf::from("model.ckpt"),
            final_model_path: PathBuf::from("final.ckpt"),
            summary_dir: PathBuf::from("summary"),
            crop_size: 224,
            augment: false,
            seed: None,
            bias: None,
        }
    }
}

/// The outcome of one training example.
#[derive(Clone, Debug)]
pub struct StepReport {
    /// The global step after the example.
    pub step: u64,
    /// Mean squared error of both chrominance channels, with the moving statistics.
    pub cost: f32,
    /// The prediction of the updated model converted to RGB.
    pub prediction_rgb: Image<f32, 3>,
}

/// The outcome of [`TrainSession::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainReport {
    /// The global step when training ended.
    pub steps: u64,
    /// Number of image reads that failed and were skipped.
    pub skipped: usize,
    /// Whether the stop flag ended the training before the epoch limit.
    pub stopped: bool,
}

/// Trains one [`ColorNet`] on a directory of color images.
pub struct TrainSession {
    config: TrainConfig,
    model: Arc<RwLock<ColorNet>>,
    global_step: u64,
    stop: Arc<AtomicBool>,
    rng: StdRng,
    skipped: usize,
}

impl TrainSession {
    /// Start a session from a randomly initialized model.
    pub fn new(config: TrainConfig) -> Result<Self, DnnError> {
        let mut rng = session_rng(config.seed);
        let model = ColorNet::new(&mut rng)?;
        Self::with_model(config, model, 0, rng)
    }

    /// Continue the training of a checkpoint.
    pub fn resume(config: TrainConfig, checkpoint: &Checkpoint) -> Result<Self, DnnError> {
        let model = checkpoint.to_model()?;
        log::info!("resuming the training at step {}", checkpoint.global_step);
        let rng = session_rng(config.seed);
        Self::with_model(config, model, checkpoint.global_step, rng)
    }

    fn with_model(
        config: TrainConfig,
        model: ColorNet,
        global_step: u64,
        rng: StdRng,
    ) -> Result<Self, DnnError> {
        if config.crop_size == 0 || config.crop_size % 8 != 0 {
            return Err(DnnError::InvalidImageSize(config.crop_size, config.crop_size));
        }

        Ok(Self {
            config,
            model: Arc::new(RwLock::new(model)),
            global_step,
            stop: Arc::new(AtomicBool::new(false)),
            rng,
            skipped: 0,
        })
    }

    /// The flag ending the training after the current example, e.g. from a Ctrl-C handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// The model being trained.
    pub fn model(&self) -> Arc<RwLock<ColorNet>> {
        self.model.clone()
    }

    /// Number of examples processed so far, including the resumed ones.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// The session parameters.
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Train on one example.
    ///
    /// The model takes one gradient step on the squared error of the U channel, then one on
    /// the V channel, and the global step advances once. The cost is measured afterwards with
    /// the moving statistics.
    ///
    /// # Arguments
    ///
    /// * `features` - The backbone activations of `gray_rgb`.
    /// * `gray_rgb` - The grayscale version of the example replicated to three channels.
    /// * `color_rgb` - The example itself, in the range [0, 1].
    pub fn train_step(
        &mut self,
        features: &BackboneFeatures,
        gray_rgb: &Image<f32, 3>,
        color_rgb: &Image<f32, 3>,
    ) -> Result<StepReport, DnnError> {
        let target = chroma_from_rgb(color_rgb)?;

        for channel in 0..2 {
            let (prediction, cache) = self
                .model
                .read()?
                .forward(features, gray_rgb, Phase::Train)?;
            let (loss, grad) = channel_squared_error(&prediction, &target, channel)?;
            if !loss.is_finite() {
                return Err(DnnError::NonFiniteLoss {
                    step: self.global_step,
                    loss,
                });
            }

            let mut model = self.model.write()?;
            let gradients = model.backward(&cache, &grad)?;
            model.update_moving_statistics(&cache);
            model.apply_gradients(&gradients, self.config.learning_rate)?;
        }
        self.global_step += 1;

        let prediction = self.model.read()?.predict(features, gray_rgb)?;
        let cost = mean_squared_error(&prediction, &target);
        if !cost.is_finite() {
            return Err(DnnError::NonFiniteLoss {
                step: self.global_step,
                loss: cost,
            });
        }
        let prediction_rgb = rgb_from_prediction(&luma_from_rgb(gray_rgb)?, &prediction)?;

        Ok(StepReport {
            step: self.global_step,
            cost,
            prediction_rgb,
        })
    }

    /// Train on the JPEG images of a directory until the epoch limit or the stop flag.
    ///
    /// The final model is written whatever the outcome; an error of the training itself is
    /// returned after that save.
    ///
    /// # Arguments
    ///
    /// * `image_dir` - The directory of the color training images.
    /// * `backbone` - The feature extractor run on the grayscale crops.
    pub fn run(
        &mut self,
        image_dir: impl AsRef<Path>,
        backbone: &mut dyn FeatureExtractor,
    ) -> Result<TrainReport, DnnError> {
        let image_dir = image_dir.as_ref();
        let image_paths = list_jpeg_files(image_dir)?;
        if image_paths.is_empty() {
            return Err(DnnError::NoTrainingImages(image_dir.to_path_buf()));
        }
        log::info!(
            "found {} images under {}",
            image_paths.len(),
            image_dir.display()
        );

        fs::create_dir_all(&self.config.summary_dir)?;
        let config_file = fs::File::create(self.config.summary_dir.join("config.json"))?;
        serde_json::to_writer_pretty(config_file, &self.config)?;

        log::info!("beginning training");
        let outcome = self.run_epochs(image_dir, &image_paths, backbone);

        let final_model_path = self.config.final_model_path.clone();
        let saved = self.save_model(&final_model_path);
        match &saved {
            Ok(()) => log::info!("saved the final model to {}", final_model_path.display()),
            Err(e) => log::error!("failed to save the final model: {e}"),
        }

        let stopped = outcome?;
        saved?;

        if self.skipped > 0 {
            log::warn!("skipped {} unreadable images", self.skipped);
        }

        Ok(TrainReport {
            steps: self.global_step,
            skipped: self.skipped,
            stopped,
        })
    }

    /// Returns whether the stop flag ended the loop.
    fn run_epochs(
        &mut self,
        image_dir: &Path,
        image_paths: &[PathBuf],
        backbone: &mut dyn FeatureExtractor,
    ) -> Result<bool, DnnError> {
        let num_images = image_paths.len() as u64;
        let mut order = image_paths.to_vec();

        for epoch in 0..self.config.num_epochs {
            order.shuffle(&mut self.rng);
            let mut trained = 0;

            for image_path in order.iter() {
                if self.stop.load(Ordering::SeqCst) {
                    log::info!("training stopped at the request of the user");
                    return Ok(true);
                }

                let (gray_rgb, color_rgb) = match self.load_example(image_path) {
                    Ok(example) => example,
                    Err(e) => {
                        log::warn!("skipping {}: {e}", image_path.display());
                        self.skipped += 1;
                        continue;
                    }
                };
                trained += 1;

                let features = backbone.extract(&gray_rgb)?;
                let report = self.train_step(&features, &gray_rgb, &color_rgb)?;
                let step = report.step;
                log::info!("step {step} cost {}", report.cost);

                if step % self.config.image_save_rate.max(1) == 0 {
                    let summary_path = self.config.summary_dir.join(format!(
                        "{}_{}.jpg",
                        step / num_images,
                        step % num_images
                    ));
                    write_summary(&summary_path, &gray_rgb, &report.prediction_rgb, &color_rgb)?;
                    log::info!("image summary saved to {}", summary_path.display());
                }

                if step % self.config.model_save_rate.max(1) == 0 && step != 0 {
                    let checkpoint_path = self.config.checkpoint_path.clone();
                    self.save_model(&checkpoint_path)?;
                    log::info!("model saved to {}", checkpoint_path.display());
                }
            }

            if trained == 0 {
                return Err(DnnError::NoTrainingImages(image_dir.to_path_buf()));
            }
            log::debug!("epoch {epoch} done");
        }

        log::info!("done training, epoch limit reached");
        Ok(false)
    }

    /// Read an image and cut a random crop, returning its grayscale and color versions.
    fn load_example(&mut self, path: &Path) -> Result<(Image<f32, 3>, Image<f32, 3>), DnnError> {
        let image = read_image_jpeg_rgb8(path)?.cast_and_scale(1.0f32 / 255.0)?;
        let crop_size = self.config.crop_size;

        let image = if image.width() < crop_size || image.height() < crop_size {
            let scale = crop_size as f32 / image.width().min(image.height()).max(1) as f32;
            let size = ImageSize {
                width: ((image.width() as f32 * scale).ceil() as usize).max(crop_size),
                height: ((image.height() as f32 * scale).ceil() as usize).max(crop_size),
            };
            let mut resized = Image::from_size_val(size, 0.0f32)?;
            resize_bilinear(&image, &mut resized)?;
            resized
        } else {
            image
        };

        let mut color = random_crop(&image, [crop_size, crop_size].into(), &mut self.rng)?;
        if self.config.augment {
            if self.rng.random_bool(0.5) {
                color = horizontal_flip(&color)?;
            }
            if self.rng.random_bool(0.5) {
                color = vertical_flip(&color)?;
            }
        }

        let mut gray = Image::from_size_val(color.size(), 0.0f32)?;
        gray_from_rgb(&color, &mut gray)?;
        let mut gray_rgb = Image::from_size_val(color.size(), 0.0f32)?;
        rgb_from_gray(&gray, &mut gray_rgb)?;

        Ok((gray_rgb, color))
    }

    /// Write the model to `path`, holding the read lock for the whole serialization.
    fn save_model(&self, path: &Path) -> Result<(), DnnError> {
        let model = self.model.read()?;
        let bias = self.config.bias.map(|b| b.name());
        save_checkpoint(path, &Checkpoint::from_model(&model, self.global_step, bias))
    }
}

fn session_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// The `(H, W, 2)` U and V channels of an RGB image.
fn chroma_from_rgb(rgb: &Image<f32, 3>) -> Result<Tensor3<f32>, DnnError> {
    let mut yuv = Image::from_size_val(rgb.size(), 0.0f32)?;
    yuv_from_rgb(rgb, &mut yuv)?;

    let mut luma = Image::from_size_val(rgb.size(), 0.0f32)?;
    let mut chroma = Image::<f32, 2>::from_size_val(rgb.size(), 0.0f32)?;
    luma_chroma_from_yuv(&yuv, &mut luma, &mut chroma)?;
    Ok(chroma.into_tensor())
}

/// Sum of the squared errors of one channel and its gradient, zero on the other channel.
fn channel_squared_error(
    prediction: &Tensor3<f32>,
    target: &Tensor3<f32>,
    channel: usize,
) -> Result<(f32, Tensor3<f32>), DnnError> {
    let mut loss = 0.0f64;
    let mut grad = vec![0.0f32; prediction.numel()];
    for (i, (p, t)) in prediction
        .as_slice()
        .iter()
        .zip(target.as_slice())
        .enumerate()
        .skip(channel)
        .step_by(2)
    {
        let diff = p - t;
        loss += (diff as f64).powi(2);
        grad[i] = 2.0 * diff;
    }
    Ok((loss as f32, Tensor3::from_shape_vec(prediction.shape, grad)?))
}

fn mean_squared_error(prediction: &Tensor3<f32>, target: &Tensor3<f32>) -> f32 {
    let sum: f64 = prediction
        .as_slice()
        .iter()
        .zip(target.as_slice())
        .map(|(p, t)| ((p - t) as f64).powi(2))
        .sum();
    (sum / prediction.numel().max(1) as f64) as f32
}

/// Write `[grayscale | prediction | original]` as a JPEG.
fn write_summary(
    path: &Path,
    gray_rgb: &Image<f32, 3>,
    prediction_rgb: &Image<f32, 3>,
    color_rgb: &Image<f32, 3>,
) -> Result<(), DnnError> {
    let summary = concat_horizontal(&concat_horizontal(gray_rgb, prediction_rgb)?, color_rgb)?;
    write_image_jpeg_rgb8(path, &ops::quantize_u8(&summary)?, SUMMARY_JPEG_QUALITY)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::load_checkpoint;
    use approx::assert_relative_eq;

    struct ZeroBackbone;

    impl FeatureExtractor for ZeroBackbone {
        fn extract(&mut self, gray_rgb: &Image<f32, 3>) -> Result<BackboneFeatures, DnnError> {
            Ok(BackboneFeatures::zeros(gray_rgb.height(), gray_rgb.width()))
        }
    }

    fn test_config(dir: &Path) -> TrainConfig {
        TrainConfig {
            num_epochs: 2,
            image_save_rate: 2,
            model_save_rate: 3,
            checkpoint_path: dir.join("model.ckpt"),
            final_model_path: dir.join("final.ckpt"),
            summary_dir: dir.join("summary"),
            crop_size: 16,
            seed: Some(17),
            bias: Some(ColorBias::Blue),
            ..Default::default()
        }
    }

    fn colorful_image(width: usize, height: usize) -> Result<Image<u8, 3>, DnnError> {
        let data = (0..width * height)
            .flat_map(|i| {
                let (x, y) = (i % width, i / width);
                [(x * 10 % 256) as u8, (y * 15 % 256) as u8, 128]
            })
            .collect();
        Ok(Image::new([width, height].into(), data)?)
    }

    fn training_dir() -> Result<tempfile::TempDir, DnnError> {
        let dir = tempfile::tempdir()?;
        write_image_jpeg_rgb8(dir.path().join("a.jpg"), &colorful_image(24, 16)?, 95)?;
        write_image_jpeg_rgb8(dir.path().join("b.jpg"), &colorful_image(32, 20)?, 95)?;
        write_image_jpeg_rgb8(dir.path().join("c.jpeg"), &colorful_image(10, 8)?, 95)?;
        fs::write(dir.path().join("broken.jpg"), b"not a jpeg")?;
        Ok(dir)
    }

    #[test]
    fn test_train_step() -> Result<(), DnnError> {
        let tmp_dir = tempfile::tempdir()?;
        let mut session = TrainSession::new(test_config(tmp_dir.path()))?;
        let initial = session.model().read()?.clone();

        let color = colorful_image(16, 16)?.cast_and_scale(1.0f32 / 255.0)?;
        let mut gray = Image::from_size_val(color.size(), 0.0f32)?;
        gray_from_rgb(&color, &mut gray)?;
        let mut gray_rgb = Image::from_size_val(color.size(), 0.0f32)?;
        rgb_from_gray(&gray, &mut gray_rgb)?;
        let features = ZeroBackbone.extract(&gray_rgb)?;

        let report = session.train_step(&features, &gray_rgb, &color)?;
        assert_eq!(report.step, 1);
        assert_eq!(session.global_step(), 1);
        assert!(report.cost.is_finite() && report.cost >= 0.0);
        assert_eq!(report.prediction_rgb.size(), color.size());

        let trained = session.model().read()?.clone();
        assert_ne!(trained.weights.wc6, initial.weights.wc6);
        assert_ne!(
            trained.norms.grayscale.moving_mean,
            initial.norms.grayscale.moving_mean
        );
        Ok(())
    }

    #[test]
    fn test_channel_squared_error() -> Result<(), DnnError> {
        let prediction = Tensor3::from_shape_vec([1, 2, 2], vec![0.5, 0.25, 1.0, 0.0])?;
        let target = Tensor3::from_shape_vec([1, 2, 2], vec![0.0, 0.5, 0.5, 0.5])?;

        let (loss_u, grad_u) = channel_squared_error(&prediction, &target, 0)?;
        assert_relative_eq!(loss_u, 0.5);
        assert_eq!(grad_u.as_slice(), &[1.0, 0.0, 1.0, 0.0]);

        let (loss_v, grad_v) = channel_squared_error(&prediction, &target, 1)?;
        assert_relative_eq!(loss_v, 0.3125);
        assert_eq!(grad_v.as_slice(), &[0.0, -0.5, 0.0, -1.0]);

        assert_relative_eq!(mean_squared_error(&prediction, &target), 0.8125 / 4.0);
        Ok(())
    }

    #[test]
    fn test_run() -> Result<(), DnnError> {
        let image_dir = training_dir()?;
        let out_dir = tempfile::tempdir()?;
        let config = test_config(out_dir.path());

        let mut session = TrainSession::new(config.clone())?;
        let report = session.run(image_dir.path(), &mut ZeroBackbone)?;
        assert_eq!(
            report,
            TrainReport {
                steps: 6,
                skipped: 2,
                stopped: false
            }
        );

        // four listed files, summaries every two steps
        for name in ["0_2.jpg", "1_0.jpg", "1_2.jpg"] {
            let summary = read_image_jpeg_rgb8(config.summary_dir.join(name))?;
            assert_eq!(summary.size(), [48, 16].into());
        }
        assert!(config.summary_dir.join("config.json").exists());

        let checkpoint = load_checkpoint(&config.checkpoint_path)?;
        assert_eq!(checkpoint.global_step, 6);
        assert_eq!(checkpoint.bias.as_deref(), Some("blue"));

        let final_model = load_checkpoint(&config.final_model_path)?;
        assert_eq!(final_model.global_step, 6);
        assert_eq!(final_model.to_model()?, *session.model().read()?);
        Ok(())
    }

    #[test]
    fn test_stop_flag() -> Result<(), DnnError> {
        let image_dir = training_dir()?;
        let out_dir = tempfile::tempdir()?;
        let config = test_config(out_dir.path());

        let mut session = TrainSession::new(config.clone())?;
        session.stop_flag().store(true, Ordering::SeqCst);
        let report = session.run(image_dir.path(), &mut ZeroBackbone)?;

        assert!(report.stopped);
        assert_eq!(report.steps, 0);
        assert_eq!(load_checkpoint(&config.final_model_path)?.global_step, 0);
        assert!(!config.checkpoint_path.exists());
        Ok(())
    }

    #[test]
    fn test_resume() -> Result<(), DnnError> {
        let image_dir = training_dir()?;
        let out_dir = tempfile::tempdir()?;
        let config = TrainConfig {
            num_epochs: 1,
            ..test_config(out_dir.path())
        };

        let mut first = TrainSession::new(config.clone())?;
        first.run(image_dir.path(), &mut ZeroBackbone)?;

        let checkpoint = load_checkpoint(&config.final_model_path)?;
        let mut second = TrainSession::resume(config.clone(), &checkpoint)?;
        assert_eq!(second.global_step(), 3);
        assert_eq!(*second.model().read()?, checkpoint.to_model()?);

        let report = second.run(image_dir.path(), &mut ZeroBackbone)?;
        assert_eq!(report.steps, 6);
        Ok(())
    }

    #[test]
    fn test_run_without_usable_images() -> Result<(), DnnError> {
        let image_dir = tempfile::tempdir()?;
        let out_dir = tempfile::tempdir()?;

        let mut session = TrainSession::new(test_config(out_dir.path()))?;
        assert!(matches!(
            session.run(image_dir.path(), &mut ZeroBackbone),
            Err(DnnError::NoTrainingImages(_))
        ));

        fs::write(image_dir.path().join("broken.jpg"), b"not a jpeg")?;
        assert!(matches!(
            session.run(image_dir.path(), &mut ZeroBackbone),
            Err(DnnError::NoTrainingImages(_))
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_crop_size() {
        let config = TrainConfig {
            crop_size: 20,
            ..Default::default()
        };
        assert!(matches!(
            TrainSession::new(config),
            Err(DnnError::InvalidImageSize(20, 20))
        ));
    }

    #[test]
    fn test_config_json() -> Result<(), DnnError> {
        let config: TrainConfig =
            serde_json::from_str(r#"{"num_epochs": 3, "bias": "blue_green"}"#)?;
        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.bias, Some(ColorBias::BlueGreen));
        assert_relative_eq!(config.learning_rate, 5e-4);
        assert_eq!(config.checkpoint_path, PathBuf::from("model.ckpt"));
        Ok(())
    }
}
