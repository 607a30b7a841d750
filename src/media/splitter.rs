use crate::{
    config::Settings,
    error::GeometryError,
    media::types::{CodeRegion, Frame, MainView, Rect},
};

/// Fixed crop geometry: the main view and the code region, both placed
/// inside the nominal source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub source_width: u32,
    pub source_height: u32,
    pub main: Rect,
    pub code: Rect,
}

impl Geometry {
    /// Main view at the configured offset, code region in the bottom-right
    /// corner of the nominal source.
    pub fn from_settings(settings: &Settings) -> Self {
        let size = settings.qrcode_size;
        Self {
            source_width: settings.original_width,
            source_height: settings.original_height,
            main: Rect::new(
                settings.frame_x,
                settings.frame_y,
                settings.frame_width,
                settings.frame_height,
            ),
            code: Rect::new(
                settings.original_width.saturating_sub(size),
                settings.original_height.saturating_sub(size),
                size,
                size,
            ),
        }
    }

    /// Checks that both crops lie inside the nominal source size.
    pub fn validate(&self) -> Result<(), GeometryError> {
        self.check_frame(self.source_width, self.source_height)
    }

    /// Checks that both crops can be cut from a `width`x`height` frame.
    pub fn check_frame(&self, width: u32, height: u32) -> Result<(), GeometryError> {
        for (region, rect) in [("main view", self.main), ("code", self.code)] {
            if !rect.fits(width, height) {
                return Err(GeometryError {
                    region,
                    x: rect.x,
                    y: rect.y,
                    width: rect.width,
                    height: rect.height,
                    frame_width: width,
                    frame_height: height,
                });
            }
        }
        Ok(())
    }

    /// Cuts one frame into its main view (copied, it outlives the frame) and
    /// its code region (borrowed).
    pub fn split<'a>(&self, frame: &'a Frame) -> Result<(MainView, CodeRegion<'a>), GeometryError> {
        self.check_frame(frame.width(), frame.height())?;
        let view = MainView {
            sequence: frame.sequence(),
            captured_at: frame.captured_at(),
            image: frame.crop(self.main),
        };
        Ok((view, CodeRegion::new(frame, self.code)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::media::types::{black, fill_rect};

    fn geometry() -> Geometry {
        let settings = Settings {
            original_width: 64,
            original_height: 80,
            frame_width: 64,
            frame_height: 48,
            qrcode_size: 16,
            ..Default::default()
        };
        Geometry::from_settings(&settings)
    }

    #[test]
    fn test_default_geometry_is_valid() {
        let geometry = Geometry::from_settings(&Settings::default());
        geometry.validate().unwrap();
        assert_eq!(geometry.main, Rect::new(0, 0, 640, 480));
        assert_eq!(geometry.code, Rect::new(480, 640, 160, 160));
    }

    #[test]
    fn test_split_cuts_both_regions_from_same_frame() {
        let mut picture = black(64, 80);
        fill_rect(&mut picture, Rect::new(48, 64, 16, 16), [255, 255, 255]);
        fill_rect(&mut picture, Rect::new(0, 0, 1, 1), [1, 2, 3]);
        let frame = Frame::new(7, Utc::now(), picture);

        let (view, region) = geometry().split(&frame).unwrap();
        assert_eq!(view.sequence, 7);
        assert_eq!(view.image.width(), 64);
        assert_eq!(view.image.height(), 48);
        assert_eq!(view.image.get_pixel(0, 0).0, [1, 2, 3]);
        assert_eq!(region.frame().sequence(), 7);
        assert_eq!(region.pixel(0, 0), Some([255, 255, 255]));
        assert_eq!(region.pixel(15, 15), Some([255, 255, 255]));
    }

    #[test]
    fn test_small_frame_is_geometry_error() {
        let frame = Frame::new(0, Utc::now(), black(32, 32));
        let err = geometry().split(&frame).unwrap_err();
        assert_eq!(err.frame_width, 32);
        assert_eq!(err.region, "main view");
    }

    #[test]
    fn test_validate_rejects_oversized_main_view() {
        let settings = Settings {
            original_width: 320,
            original_height: 240,
            ..Default::default()
        };
        assert!(Geometry::from_settings(&settings).validate().is_err());
    }
}
