use ffmpeg_next::format::Pixel;

use crate::scaler::Scaler;

/// Decoded picture straight out of the decoder, in whatever pixel format the
/// codec produced.
pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
}

impl From<ffmpeg_next::frame::Video> for RawVideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl RawVideoFrame {
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> Pixel {
        self.frame.format()
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }
}

/// Tightly packed BGR24 picture (`width * 3` bytes per row, no padding).
#[derive(Clone, Debug)]
pub struct PackedBgr {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Converts decoded frames to packed BGR24, rebuilding the conversion context
/// whenever the decoder changes format or size.
#[derive(Default)]
pub struct BgrConverter {
    scaler: Option<Scaler>,
}

impl BgrConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&mut self, frame: &RawVideoFrame) -> anyhow::Result<PackedBgr> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        if format == Pixel::BGR24 {
            return Ok(pack(frame.as_video()));
        }

        let rebuild = match &self.scaler {
            Some(scaler) => !scaler.accepts(format, width, height),
            None => true,
        };
        if rebuild {
            self.scaler = Some(Scaler::convert(format, Pixel::BGR24, width, height)?);
        }

        let mut converted = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame.as_video(), &mut converted)?;
        }
        Ok(pack(&converted))
    }
}

/// Copies plane 0 of a packed-format frame, dropping the stride padding.
fn pack(frame: &ffmpeg_next::frame::Video) -> PackedBgr {
    let width = frame.width();
    let height = frame.height();
    let row = width as usize * 3;
    let stride = frame.stride(0);
    let plane = frame.data(0);

    let mut data = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        data.extend_from_slice(&plane[start..start + row]);
    }
    PackedBgr {
        width,
        height,
        data,
    }
}

/// Builds a BGR24 ffmpeg frame from a packed buffer, honouring the frame's stride.
pub fn bgr_frame_from_packed(
    width: u32,
    height: u32,
    data: &[u8],
) -> anyhow::Result<ffmpeg_next::frame::Video> {
    if width == 0 || height == 0 {
        anyhow::bail!("invalid video size {}x{}", width, height);
    }
    let row = width as usize * 3;
    if data.len() != row * height as usize {
        anyhow::bail!(
            "packed buffer is {} bytes, expected {} for {}x{}",
            data.len(),
            row * height as usize,
            width,
            height
        );
    }

    let mut frame = ffmpeg_next::frame::Video::new(Pixel::BGR24, width, height);
    let stride = frame.stride(0);
    let plane = frame.data_mut(0);
    for (y, src) in data.chunks_exact(row).enumerate() {
        let start = y * stride;
        plane[start..start + row].copy_from_slice(src);
    }
    Ok(frame)
}
