//! Burns a wall-clock timestamp into the top-left corner of a picture so a
//! viewer can judge end-to-end latency.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::media::types::{BgrImage, Rect, fill_rect};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const SCALE: u32 = 2;
const ORIGIN: (u32, u32) = (10, 10);
const PADDING: u32 = 4;
const TEXT_COLOR: [u8; 3] = [0, 255, 255];
const BACKGROUND: [u8; 3] = [0, 0, 0];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 5x7 rows, most significant of the low five bits is the leftmost column.
fn glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => [0; 7],
    }
}

/// Draws `text` on a black box at the fixed origin, clipped to the picture.
pub fn draw_text(picture: &mut BgrImage, text: &str) {
    let advance = (GLYPH_WIDTH + 1) * SCALE;
    let chars = text.chars().count() as u32;
    let background = Rect::new(
        ORIGIN.0 - PADDING,
        ORIGIN.1 - PADDING,
        chars * advance + PADDING * 2,
        GLYPH_HEIGHT * SCALE + PADDING * 2,
    );
    fill_rect(picture, background, BACKGROUND);

    for (i, c) in text.chars().enumerate() {
        let left = ORIGIN.0 + i as u32 * advance;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let dot = Rect::new(
                    left + col * SCALE,
                    ORIGIN.1 + row as u32 * SCALE,
                    SCALE,
                    SCALE,
                );
                fill_rect(picture, dot, TEXT_COLOR);
            }
        }
    }
}

pub fn draw_timestamp(picture: &mut BgrImage, at: DateTime<Utc>, tz: Tz) {
    let text = at.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string();
    draw_text(picture, &text);
}
