use std::{
    fs,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use chroma_nn::batch_norm::BatchNorm;
use chroma_tensor::{Tensor1, Tensor4};

use crate::{
    colornet::ColorNet,
    error::DnnError,
    weights::{ColorNetWeights, NormLayers, KERNEL_SHAPES, NORM_CHANNELS},
};

/// Version of the checkpoint layout written by this crate.
pub const CHECKPOINT_VERSION: u32 = 1;

/// The persisted state of a [`ColorNet`].
///
/// Kernels are stored by name, batch normalizations by name as
/// `[gamma, beta, moving_mean, moving_variance]`.
#[derive(Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Checkpoint {
    /// Layout version, see [`CHECKPOINT_VERSION`].
    pub version: u32,
    /// Number of training examples processed when the checkpoint was written.
    pub global_step: u64,
    /// The color bias the model was trained for, if any.
    pub bias: Option<String>,
    /// The convolution kernels.
    pub kernels: Vec<(String, Tensor4<f32>)>,
    /// The batch normalization parameters and statistics.
    pub batch_norms: Vec<(String, [Tensor1<f32>; 4])>,
}

impl Checkpoint {
    /// Snapshot a model.
    pub fn from_model(model: &ColorNet, global_step: u64, bias: Option<&str>) -> Self {
        let kernels = model
            .weights
            .named()
            .into_iter()
            .map(|(name, kernel)| (name.to_string(), kernel.clone()))
            .collect();
        let batch_norms = model
            .norms
            .named()
            .into_iter()
            .map(|(name, norm)| {
                (
                    name.to_string(),
                    [
                        norm.gamma.clone(),
                        norm.beta.clone(),
                        norm.moving_mean.clone(),
                        norm.moving_variance.clone(),
                    ],
                )
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION,
            global_step,
            bias: bias.map(str::to_string),
            kernels,
            batch_norms,
        }
    }

    /// Rebuild the model, checking that every parameter is present with the expected shape.
    pub fn to_model(&self) -> Result<ColorNet, DnnError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(DnnError::CheckpointVersion(self.version, CHECKPOINT_VERSION));
        }

        let mut weights = ColorNetWeights::zeros();
        for ((name, kernel), (_, shape)) in weights.named_mut().into_iter().zip(KERNEL_SHAPES) {
            let stored = self
                .kernels
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, k)| k)
                .ok_or_else(|| DnnError::CheckpointParameter(format!("missing kernel {name}")))?;
            if stored.shape != shape {
                return Err(DnnError::CheckpointParameter(format!(
                    "kernel {name} has shape {:?}, expected {shape:?}",
                    stored.shape
                )));
            }
            *kernel = stored.clone();
        }

        let mut norms = NormLayers::<BatchNorm>::new();
        for ((name, norm), (_, channels)) in norms.named_mut().into_iter().zip(NORM_CHANNELS) {
            let [gamma, beta, mean, variance] = self
                .batch_norms
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, p)| p)
                .ok_or_else(|| {
                    DnnError::CheckpointParameter(format!("missing batch norm {name}"))
                })?;
            if [gamma, beta, mean, variance]
                .iter()
                .any(|t| t.shape != [channels])
            {
                return Err(DnnError::CheckpointParameter(format!(
                    "batch norm {name} does not have {channels} channels"
                )));
            }
            norm.gamma = gamma.clone();
            norm.beta = beta.clone();
            norm.moving_mean = mean.clone();
            norm.moving_variance = variance.clone();
        }

        Ok(ColorNet { weights, norms })
    }
}

/// Write a checkpoint with bincode.
///
/// The data goes to a temporary file next to `path` which is then renamed over it, so an
/// interrupted save leaves the previous checkpoint intact.
pub fn save_checkpoint(path: impl AsRef<Path>, checkpoint: &Checkpoint) -> Result<(), DnnError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    write_atomically(path, |writer| {
        bincode::encode_into_std_write(checkpoint, writer, bincode::config::standard())?;
        Ok(())
    })?;

    log::debug!(
        "checkpoint of step {} written to {}",
        checkpoint.global_step,
        path.display()
    );
    Ok(())
}

/// Read a checkpoint written by [`save_checkpoint`].
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint, DnnError> {
    let mut reader = BufReader::new(fs::File::open(path.as_ref())?);
    let checkpoint: Checkpoint =
        bincode::decode_from_std_read(&mut reader, bincode::config::standard())?;
    Ok(checkpoint)
}

/// Run `write` on a temporary file next to `path`, then rename it over `path`.
///
/// On failure the temporary file is removed and `path` is left untouched.
fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<fs::File>) -> Result<(), DnnError>,
) -> Result<(), DnnError> {
    let tmp_path = temporary_path(path);
    let written = fs::File::create(&tmp_path)
        .map_err(DnnError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            Ok(())
        })
        .and_then(|()| fs::rename(&tmp_path, path).map_err(DnnError::from));

    if written.is_err() && tmp_path.exists() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            log::warn!("failed to remove {}: {e}", tmp_path.display());
        }
    }
    written
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
