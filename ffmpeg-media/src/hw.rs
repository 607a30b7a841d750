//! Hardware-accelerated encoder discovery.
//!
//! Finds nvenc/vaapi/qsv/v4l2m2m counterparts of a software encoder so the
//! caller can try them first and fall back to software when they fail to open.

/// Try to find a hardware-accelerated encoder for the given software codec name.
/// Returns the first available hardware encoder, or None if none is found.
pub fn find_hw_encoder(codec_name: &str) -> Option<ffmpeg_next::Codec> {
    let hw_names: &[&str] = match codec_name {
        "libx264" | "h264" => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        _ => &[],
    };

    for name in hw_names {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}

pub fn is_hardware_codec(codec_name: &str) -> bool {
    codec_name.contains("nvenc")
        || codec_name.contains("vaapi")
        || codec_name.contains("qsv")
        || codec_name.contains("v4l2m2m")
}

/// Returns a pixel format suitable for the encoder. Packed RGB sources are
/// mapped to YUV420P; hardware encoders prefer NV12.
pub fn pixel_format_for_encoder(
    source: ffmpeg_next::format::Pixel,
    codec_name: &str,
) -> ffmpeg_next::format::Pixel {
    use ffmpeg_next::format::Pixel;
    match source {
        Pixel::RGB24 | Pixel::BGR24 => {
            if is_hardware_codec(codec_name) {
                Pixel::NV12
            } else {
                Pixel::YUV420P
            }
        }
        _ => source,
    }
}
