/// Registers FFmpeg components. Call once at startup before opening inputs
/// or encoders.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod annexb;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod hw;
pub mod input;
pub mod packet;
pub mod reader;
pub mod scaler;
pub mod stream;
