use ffmpeg_next::{Dictionary, Rational, format::Pixel};

use crate::{
    frame::bgr_frame_from_packed,
    hw::{find_hw_encoder, pixel_format_for_encoder},
    packet::EncodedPacket,
    scaler::Scaler,
};

#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub keyframe_interval: u32,
    pub bitrate_kbps: u32,
    pub codec: String,
    /// Try nvenc/vaapi/qsv before the software codec.
    pub prefer_hardware: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
            keyframe_interval: 30,
            bitrate_kbps: 2000,
            codec: "libx264".to_string(),
            prefer_hardware: false,
        }
    }
}

/// Video encoder fed with packed BGR24 pictures. Output packets are Annex B
/// with SPS/PPS repeated in front of every keyframe (no global header), which
/// is what an RTP packetizer wants.
pub struct Encoder {
    inner: ffmpeg_next::codec::encoder::Video,
    codec_name: String,
    format: Pixel,
    settings: Settings,
    frame_index: i64,
    scaler: Option<Scaler>,
}

unsafe impl Send for Encoder {}

impl Encoder {
    pub fn new(settings: Settings, options: Option<Dictionary>) -> anyhow::Result<Self> {
        if settings.width == 0 || settings.height == 0 || settings.fps == 0 {
            anyhow::bail!(
                "invalid encoder geometry {}x{}@{}",
                settings.width,
                settings.height,
                settings.fps
            );
        }

        let hw_codec = if settings.prefer_hardware {
            find_hw_encoder(&settings.codec)
        } else {
            None
        };

        if let Some(hw_codec) = hw_codec {
            let hw_name = hw_codec.name().to_string();
            log::info!("attempting hardware encoder: {}", hw_name);
            match Self::open(hw_codec, &hw_name, &settings, options.clone()) {
                Ok(encoder) => return Ok(encoder),
                Err(e) => log::warn!(
                    "hardware encoder {} failed: {}, falling back to {}",
                    hw_name,
                    e,
                    settings.codec
                ),
            }
        }

        let sw_codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;
        let name = settings.codec.clone();
        Self::open(sw_codec, &name, &settings, options)
    }

    fn open(
        codec: ffmpeg_next::Codec,
        codec_name: &str,
        settings: &Settings,
        options: Option<Dictionary>,
    ) -> anyhow::Result<Self> {
        let format = pixel_format_for_encoder(Pixel::BGR24, codec_name);
        let ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        let mut encoder = ctx.encoder().video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(format);
        encoder.set_frame_rate(Some(Rational::new(settings.fps as i32, 1)));
        encoder.set_time_base(Rational::new(1, settings.fps as i32));
        encoder.set_gop(settings.keyframe_interval.max(1));
        encoder.set_max_b_frames(0);
        encoder.set_bit_rate(settings.bitrate_kbps as usize * 1000);

        let need_defaults = options.is_none();
        let mut opts = options.unwrap_or_default();
        if need_defaults {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
        }
        let inner = encoder.open_with(opts)?;
        log::info!(
            "encoder opened: {} {}x{}@{} gop={}",
            codec_name,
            settings.width,
            settings.height,
            settings.fps,
            settings.keyframe_interval
        );

        Ok(Self {
            inner,
            codec_name: codec_name.to_string(),
            format,
            settings: settings.clone(),
            frame_index: 0,
            scaler: None,
        })
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    /// Encodes one packed BGR24 picture and returns whatever packets the codec
    /// released (usually exactly one with `zerolatency`).
    pub fn encode_bgr(&mut self, width: u32, height: u32, data: &[u8]) -> anyhow::Result<Vec<EncodedPacket>> {
        if width != self.settings.width || height != self.settings.height {
            anyhow::bail!(
                "frame is {}x{}, encoder expects {}x{}",
                width,
                height,
                self.settings.width,
                self.settings.height
            );
        }
        let source = bgr_frame_from_packed(width, height, data)?;

        if self.scaler.is_none() {
            self.scaler = Some(Scaler::convert(Pixel::BGR24, self.format, width, height)?);
        }
        let mut converted = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(&source, &mut converted)?;
        }
        converted.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.inner.send_frame(&converted)?;
        self.receive_packets()
    }

    /// Flushes delayed packets at end of stream.
    pub fn finish(&mut self) -> anyhow::Result<Vec<EncodedPacket>> {
        self.inner.send_eof()?;
        self.receive_packets()
    }

    fn receive_packets(&mut self) -> anyhow::Result<Vec<EncodedPacket>> {
        let mut packets = Vec::new();
        loop {
            let mut packet = ffmpeg_next::codec::packet::Packet::empty();
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => packets.push(EncodedPacket::from(&packet)),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(packets)
    }
}
