mod gray;
mod hsv;
mod yuv;

pub use gray::{gray_from_rgb, rgb_from_gray};
pub use hsv::{hsv_from_rgb, saturation_from_rgb};
pub use yuv::{luma_chroma_from_yuv, rgb_from_yuv, yuv_from_luma_chroma, yuv_from_rgb};
