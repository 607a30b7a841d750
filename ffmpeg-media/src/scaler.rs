use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, flag::Flags};

pub struct Scaler {
    context: Context,
    src: (Pixel, u32, u32),
}

impl Scaler {
    /// Pixel format conversion at unchanged size.
    pub fn convert(src_format: Pixel, dst_format: Pixel, width: u32, height: u32) -> anyhow::Result<Self> {
        let context = Context::get(
            src_format,
            width,
            height,
            dst_format,
            width,
            height,
            Flags::BILINEAR,
        )?;
        Ok(Self {
            context,
            src: (src_format, width, height),
        })
    }

    /// True when a frame can go through this context without rebuilding it.
    pub fn accepts(&self, format: Pixel, width: u32, height: u32) -> bool {
        self.src == (format, width, height)
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

unsafe impl Send for Scaler {}
