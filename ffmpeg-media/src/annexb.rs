//! H.264 byte-stream helpers: start-code detection, NAL splitting and the
//! AVCC (length-prefixed) to Annex B conversion.

use bytes::{Bytes, BytesMut};

/// Annex B start code (4-byte)
const START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_IDR: u8 = 5;

/// Check if packet data is in Annex B format by looking at the start codes.
pub fn is_annexb_packet(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    if data[0] == 0x00 && data[1] == 0x00 && data[2] == 0x00 && data[3] == 0x01 {
        return true;
    }
    if data[0] == 0x00 && data[1] == 0x00 && data[2] == 0x01 {
        return true;
    }
    false
}

/// Converts AVCC (4-byte length + NAL) to Annex B (start code + NAL).
pub fn convert_avcc_to_annexb(avcc: &[u8]) -> Bytes {
    let mut out = BytesMut::new();
    let mut i = 0;
    while i + 4 <= avcc.len() {
        let len = (u32::from(avcc[i]) << 24
            | u32::from(avcc[i + 1]) << 16
            | u32::from(avcc[i + 2]) << 8
            | u32::from(avcc[i + 3])) as usize;
        i += 4;
        if len == 0 || i + len > avcc.len() {
            break;
        }
        out.extend_from_slice(START_CODE);
        out.extend_from_slice(&avcc[i..i + len]);
        i += len;
    }
    out.freeze()
}

/// Returns the payload as Annex B, converting from AVCC when needed.
pub fn ensure_annexb(data: Bytes) -> Bytes {
    if data.is_empty() || is_annexb_packet(&data) {
        data
    } else {
        convert_avcc_to_annexb(&data)
    }
}

/// Iterates the NAL units of an Annex B buffer, start codes stripped.
pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits { data, pos: 0 }
}

pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Position just past the next start code at or after `from`, plus the
/// position where that start code began.
fn next_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let begin = if i > from && data[i - 1] == 0 { i - 1 } else { i };
            return Some((begin, i + 3));
        }
        i += 1;
    }
    None
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pos >= self.data.len() {
                return None;
            }
            let start = match next_start_code(self.data, self.pos) {
                Some((_, after)) => after,
                None => {
                    // no start code at all: treat the rest as one NAL
                    let rest = &self.data[self.pos..];
                    self.pos = self.data.len();
                    return (!rest.is_empty()).then_some(rest);
                }
            };
            let end = match next_start_code(self.data, start) {
                Some((begin, _)) => begin,
                None => self.data.len(),
            };
            self.pos = end;
            let nal = &self.data[start..end];
            if !nal.is_empty() {
                return Some(nal);
            }
        }
    }
}

pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map(|b| b & 0x1F).unwrap_or(0)
}
