use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{GenericImageView, GrayImage, ImageBuffer, Rgb, RgbImage, imageops};
use imageproc::drawing::draw_filled_rect_mut;
use serde::Serialize;

/// Packed BGR24 picture. The `Rgb` channels hold blue, green, red in that
/// order, which is what the scaler produces and the encoder expects.
pub type BgrImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// All-black picture.
pub fn black(width: u32, height: u32) -> BgrImage {
    BgrImage::new(width, height)
}

/// Paints `rect` with a solid BGR color, clipped to the picture.
pub fn fill_rect(image: &mut BgrImage, rect: Rect, bgr: [u8; 3]) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    draw_filled_rect_mut(image, rect.into(), Rgb(bgr));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

impl From<Rect> for imageproc::rect::Rect {
    fn from(rect: Rect) -> Self {
        imageproc::rect::Rect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height)
    }
}

/// One decoded source picture with its pipeline sequence number.
#[derive(Debug)]
pub struct Frame {
    sequence: u64,
    captured_at: DateTime<Utc>,
    image: BgrImage,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: DateTime<Utc>, image: BgrImage) -> Self {
        Self {
            sequence,
            captured_at,
            image,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &BgrImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copies `rect` out of the frame. The caller checks the bounds.
    pub(crate) fn crop(&self, rect: Rect) -> BgrImage {
        imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height).to_image()
    }
}

/// The part of a frame that is re-streamed.
#[derive(Debug, Clone)]
pub struct MainView {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub image: BgrImage,
}

/// Borrowed window onto the frame where the matrix code is printed.
#[derive(Debug, Clone, Copy)]
pub struct CodeRegion<'a> {
    frame: &'a Frame,
    rect: Rect,
}

impl<'a> CodeRegion<'a> {
    pub(crate) fn new(frame: &'a Frame, rect: Rect) -> Self {
        Self { frame, rect }
    }

    pub fn frame(&self) -> &'a Frame {
        self.frame
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    /// False when the region buffer cannot be read as described.
    pub fn is_readable(&self) -> bool {
        self.rect.fits(self.frame.width(), self.frame.height())
    }

    /// Region-relative BGR pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.rect.width || y >= self.rect.height {
            return None;
        }
        self.frame
            .image
            .get_pixel_checked(self.rect.x + x, self.rect.y + y)
            .map(|p| p.0)
    }

    /// Greyscale copy of the region. Only call on a readable region.
    pub fn to_luma(&self) -> GrayImage {
        let view = imageops::crop_imm(
            &self.frame.image,
            self.rect.x,
            self.rect.y,
            self.rect.width,
            self.rect.height,
        );
        let rgb = RgbImage::from_fn(self.rect.width, self.rect.height, |x, y| {
            let Rgb([b, g, r]) = view.get_pixel(x, y);
            Rgb([r, g, b])
        });
        imageops::grayscale(&rgb)
    }
}

/// Decoded matrix-code content: a JSON object when the text is one, the raw
/// text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QrData {
    Structured(serde_json::Map<String, serde_json::Value>),
    Text(String),
}

impl QrData {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(map)) => QrData::Structured(map),
            _ => QrData::Text(text.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            QrData::Text(text) => Some(text.as_str()),
            QrData::Structured(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, QrData::Structured(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub data: QrData,
    pub captured_at: DateTime<Utc>,
    pub sequence: u64,
}

impl DecodedPayload {
    /// Capture time as fractional epoch seconds.
    pub fn timestamp_secs(&self) -> f64 {
        self.captured_at.timestamp_micros() as f64 / 1_000_000.0
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.captured_at.timestamp_millis()
    }
}

/// One encoded access unit (Annex B) ready for packetization.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub data: Bytes,
    pub is_key: bool,
    /// Stream time of the access unit, measured from the encoder start.
    pub timestamp: Duration,
}

impl EncodedFrame {
    /// 90 kHz RTP clock value, wrapping.
    pub fn rtp_time(&self) -> u32 {
        (self.timestamp.as_micros() * 9 / 100) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_data_parse() {
        let structured = QrData::parse(r#"{"sku": "123", "qty": 2}"#);
        assert!(structured.is_structured());

        // valid JSON that is not an object stays text
        assert_eq!(QrData::parse("42"), QrData::Text("42".to_string()));
        assert_eq!(QrData::parse("[1,2]"), QrData::Text("[1,2]".to_string()));
        assert_eq!(
            QrData::parse("1700000000|1|2|5").as_text(),
            Some("1700000000|1|2|5")
        );
    }

    #[test]
    fn test_qr_data_serializes_untagged() {
        let text = serde_json::to_value(QrData::Text("hello".into())).unwrap();
        assert_eq!(text, serde_json::json!("hello"));
        let obj = serde_json::to_value(QrData::parse(r#"{"a":1}"#)).unwrap();
        assert_eq!(obj, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_region_luma_and_bounds() {
        let mut picture = black(8, 8);
        fill_rect(&mut picture, Rect::new(4, 4, 4, 4), [255, 255, 255]);
        let frame = Frame::new(1, Utc::now(), picture);

        let region = CodeRegion::new(&frame, Rect::new(4, 4, 4, 4));
        assert!(region.is_readable());
        let luma = region.to_luma();
        assert_eq!(luma.dimensions(), (4, 4));
        assert_eq!(luma.get_pixel(0, 0).0, [255]);
        assert_eq!(region.pixel(4, 0), None);

        let outside = CodeRegion::new(&frame, Rect::new(6, 6, 4, 4));
        assert!(!outside.is_readable());
    }

    #[test]
    fn test_luma_reads_channels_as_bgr() {
        // pure blue in BGR order is dark, pure green is bright
        let mut picture = black(2, 1);
        fill_rect(&mut picture, Rect::new(0, 0, 1, 1), [255, 0, 0]);
        fill_rect(&mut picture, Rect::new(1, 0, 1, 1), [0, 255, 0]);
        let frame = Frame::new(1, Utc::now(), picture);

        let luma = CodeRegion::new(&frame, Rect::new(0, 0, 2, 1)).to_luma();
        assert!(luma.get_pixel(0, 0).0[0] < 40);
        assert!(luma.get_pixel(1, 0).0[0] > 150);
    }

    #[test]
    fn test_fill_rect_clips_to_picture() {
        let mut picture = black(4, 4);
        fill_rect(&mut picture, Rect::new(2, 2, 10, 10), [9, 9, 9]);
        assert_eq!(picture.get_pixel(3, 3).0, [9, 9, 9]);
        assert_eq!(picture.get_pixel(1, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_rtp_time_is_90khz() {
        let frame = EncodedFrame {
            sequence: 0,
            data: Bytes::new(),
            is_key: true,
            timestamp: Duration::from_secs(2),
        };
        assert_eq!(frame.rtp_time(), 180_000);
    }
}
