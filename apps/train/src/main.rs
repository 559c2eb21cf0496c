use argh::FromArgs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use chroma::dnn::{
    checkpoint::load_checkpoint, ColorBias, OnnxBackbone, OnnxBackboneConfig, TrainConfig,
    TrainSession,
};

#[derive(FromArgs)]
/// Train a colorization model on the color JPEG images of a directory
struct Args {
    /// directory of the color JPEG training images
    #[argh(positional)]
    image_dir: PathBuf,

    /// directory of the `[grayscale | prediction | original]` summaries written while training
    #[argh(positional)]
    summary_dir: PathBuf,

    /// path of the model written once training is completed or stopped
    #[argh(option, short = 'f', default = "PathBuf::from(\"final.ckpt\")")]
    final_model: PathBuf,

    /// number of complete passes over the training images
    #[argh(option, short = 'e')]
    epochs: Option<u64>,

    /// save a summary image every N steps
    #[argh(option, short = 'i')]
    image_save_rate: Option<u64>,

    /// save the incremental checkpoint every N steps
    #[argh(option, short = 'm')]
    model_save_rate: Option<u64>,

    /// path of the incremental checkpoint
    #[argh(option, default = "PathBuf::from(\"model.ckpt\")")]
    checkpoint: PathBuf,

    /// color bias of the training images: red, green, blue or blue_green
    #[argh(option)]
    bias: Option<ColorBias>,

    /// checkpoint to continue the training from
    #[argh(option)]
    resume: Option<PathBuf>,

    /// randomly flip the training crops
    #[argh(switch)]
    augment: bool,

    /// seed of the weight initialization, crops and shuffling
    #[argh(option)]
    seed: Option<u64>,

    /// path to the VGG16 ONNX backbone
    #[argh(option, default = "PathBuf::from(\"vgg16.onnx\")")]
    backbone: PathBuf,

    /// path to the ORT dylib
    #[argh(option)]
    ort_dylib_path: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    // set the ort dylib path
    if let Some(ort_dylib_path) = &args.ort_dylib_path {
        std::env::set_var("ORT_DYLIB_PATH", ort_dylib_path);
    }

    let defaults = TrainConfig::default();
    let config = TrainConfig {
        num_epochs: args.epochs.unwrap_or(defaults.num_epochs),
        image_save_rate: args.image_save_rate.unwrap_or(defaults.image_save_rate),
        model_save_rate: args.model_save_rate.unwrap_or(defaults.model_save_rate),
        checkpoint_path: args.checkpoint,
        final_model_path: args.final_model,
        summary_dir: args.summary_dir,
        augment: args.augment,
        seed: args.seed,
        bias: args.bias,
        ..defaults
    };

    let mut session = match &args.resume {
        Some(path) => TrainSession::resume(config, &load_checkpoint(path)?)?,
        None => TrainSession::new(config)?,
    };

    // stop after the current example on Ctrl-C
    let stop = session.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })?;

    let mut backbone = OnnxBackbone::new(OnnxBackboneConfig::new(&args.backbone))?;
    let report = session.run(&args.image_dir, &mut backbone)?;

    log::info!("finished training after {} steps", report.steps);
    if report.skipped > 0 {
        log::warn!("{} images could not be read", report.skipped);
    }

    Ok(())
}
