use argh::FromArgs;
use std::path::PathBuf;

use chroma::dnn::{
    pipeline::DEFAULT_JPEG_QUALITY, Colorizer, ColorizerEnsemble, OnnxBackbone,
    OnnxBackboneConfig, SaturationWeights,
};

#[derive(FromArgs)]
/// Colorize the grayscale JPEG images of a directory with the four color biased models
struct Args {
    /// directory of the JPEG images to colorize
    #[argh(positional)]
    image_dir: PathBuf,

    /// directory to write the `[grayscale | colorized | original]` images to
    #[argh(positional)]
    output_dir: PathBuf,

    /// directory holding model_red.ckpt, model_green.ckpt, model_blue.ckpt and
    /// model_blue_green.ckpt
    #[argh(option, default = "PathBuf::from(\"model\")")]
    models_dir: PathBuf,

    /// path to the VGG16 ONNX backbone
    #[argh(option, default = "PathBuf::from(\"vgg16.onnx\")")]
    backbone: PathBuf,

    /// path to the ORT dylib
    #[argh(option)]
    ort_dylib_path: Option<PathBuf>,

    /// saturation weights of the red, green, blue and blue-green models, e.g.
    /// 0.125,0.21875,0.21875,0.4375
    #[argh(option, default = "SaturationWeights::default()")]
    saturation_weights: SaturationWeights,

    /// quality of the written JPEG images
    #[argh(option, default = "DEFAULT_JPEG_QUALITY")]
    quality: u8,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    // set the ort dylib path
    if let Some(ort_dylib_path) = &args.ort_dylib_path {
        std::env::set_var("ORT_DYLIB_PATH", ort_dylib_path);
    }

    let backbone = OnnxBackbone::new(OnnxBackboneConfig::new(&args.backbone))?;
    let ensemble = ColorizerEnsemble::load(&args.models_dir, args.saturation_weights)?;
    let mut colorizer = Colorizer::new(Box::new(backbone), ensemble);

    let summary = colorizer.colorize_dir(&args.image_dir, &args.output_dir, args.quality)?;
    log::info!(
        "colorized {} images into {}",
        summary.processed,
        args.output_dir.display()
    );
    if summary.failed > 0 {
        log::warn!("{} images could not be colorized", summary.failed);
    }

    Ok(())
}
