use crate::media::types::{CodeRegion, QrData};

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Decoded(QrData),
    /// Nothing readable in the region. Expected for most frames.
    NoCode,
    /// The region itself could not be processed.
    Failed(String),
}

pub trait CodeDecoder: Send {
    fn decode(&mut self, region: &CodeRegion<'_>) -> DecodeOutcome;
}

/// QR decoder backed by `rqrr`.
#[derive(Debug, Default)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl CodeDecoder for RqrrDecoder {
    fn decode(&mut self, region: &CodeRegion<'_>) -> DecodeOutcome {
        if !region.is_readable() {
            return DecodeOutcome::Failed(format!(
                "region {:?} outside {}x{} frame",
                region.rect(),
                region.frame().width(),
                region.frame().height()
            ));
        }

        let mut image = rqrr::PreparedImage::prepare(region.to_luma());
        for grid in image.detect_grids() {
            match grid.decode() {
                Ok((_, content)) if !content.is_empty() => {
                    return DecodeOutcome::Decoded(QrData::parse(&content));
                }
                Ok(_) => {}
                Err(e) => {
                    // a finder pattern without a readable payload is still "no code"
                    log::debug!(
                        "[QRProcessor] frame {}: grid found but not decodable: {}",
                        region.frame().sequence(),
                        e
                    );
                }
            }
        }
        DecodeOutcome::NoCode
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use qrcode::{Color, QrCode};

    use super::*;
    use crate::media::types::{BgrImage, Frame, Rect, black, fill_rect};

    const MODULE_PX: u32 = 4;
    const QUIET: u32 = 4;

    /// White picture with `text` rendered as a QR code at `origin`.
    fn picture_with_code(width: u32, height: u32, origin: (u32, u32), text: &str) -> BgrImage {
        let mut picture = black(width, height);
        fill_rect(&mut picture, Rect::new(0, 0, width, height), [255, 255, 255]);

        let code = QrCode::new(text.as_bytes()).unwrap();
        let modules = code.width() as u32;
        for (i, color) in code.to_colors().into_iter().enumerate() {
            if color != Color::Dark {
                continue;
            }
            let mx = i as u32 % modules;
            let my = i as u32 / modules;
            fill_rect(
                &mut picture,
                Rect::new(
                    origin.0 + (QUIET + mx) * MODULE_PX,
                    origin.1 + (QUIET + my) * MODULE_PX,
                    MODULE_PX,
                    MODULE_PX,
                ),
                [0, 0, 0],
            );
        }
        picture
    }

    fn side_for(text: &str) -> u32 {
        let modules = QrCode::new(text.as_bytes()).unwrap().width() as u32;
        (modules + QUIET * 2) * MODULE_PX
    }

    #[test]
    fn test_decodes_text_code() {
        let text = "1700000000|12|10|5";
        let side = side_for(text);
        let picture = picture_with_code(side + 20, side + 20, (20, 20), text);
        let frame = Frame::new(1, Utc::now(), picture);
        let region = CodeRegion::new(&frame, Rect::new(20, 20, side, side));

        let outcome = RqrrDecoder::new().decode(&region);
        assert_eq!(outcome, DecodeOutcome::Decoded(QrData::Text(text.to_string())));
    }

    #[test]
    fn test_decodes_structured_code() {
        let text = r#"{"sku":"4006381333931","qty":1}"#;
        let side = side_for(text);
        let picture = picture_with_code(side, side, (0, 0), text);
        let frame = Frame::new(1, Utc::now(), picture);
        let region = CodeRegion::new(&frame, Rect::new(0, 0, side, side));

        match RqrrDecoder::new().decode(&region) {
            DecodeOutcome::Decoded(QrData::Structured(map)) => {
                assert_eq!(map["sku"], "4006381333931");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_blank_region_is_no_code() {
        let frame = Frame::new(1, Utc::now(), black(160, 160));
        let region = CodeRegion::new(&frame, Rect::new(0, 0, 160, 160));
        assert_eq!(RqrrDecoder::new().decode(&region), DecodeOutcome::NoCode);
    }

    #[test]
    fn test_unreadable_region_fails() {
        let frame = Frame::new(1, Utc::now(), black(32, 32));
        let region = CodeRegion::new(&frame, Rect::new(16, 16, 32, 32));
        assert!(matches!(
            RqrrDecoder::new().decode(&region),
            DecodeOutcome::Failed(_)
        ));
    }
}
