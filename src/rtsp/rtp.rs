//! RFC 6184 H.264 packetization (single NAL unit and FU-A).

use bytes::{BufMut, Bytes, BytesMut};
use ffmpeg_media::annexb::nal_units;

pub const MAX_PACKET: usize = 1400;
const HEADER_LEN: usize = 12;
const FU_A: u8 = 28;
const NAL_AUD: u8 = 9;

pub struct RtpPacketizer {
    ssrc: u32,
    sequence: u16,
    payload_type: u8,
    max_packet: usize,
}

impl RtpPacketizer {
    pub fn new(ssrc: u32, initial_sequence: u16, payload_type: u8) -> Self {
        Self {
            ssrc,
            sequence: initial_sequence,
            payload_type,
            max_packet: MAX_PACKET,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Splits one Annex B access unit into RTP packets. The marker bit is set
    /// on the last packet of the access unit.
    pub fn packetize(&mut self, access_unit: &[u8], timestamp: u32) -> Vec<Bytes> {
        let nals: Vec<&[u8]> = nal_units(access_unit)
            .filter(|nal| !nal.is_empty() && nal[0] & 0x1F != NAL_AUD)
            .collect();
        let max_payload = self.max_packet - HEADER_LEN;

        let mut packets = Vec::new();
        for (i, nal) in nals.iter().enumerate() {
            let last_nal = i + 1 == nals.len();
            if nal.len() <= max_payload {
                packets.push(self.packet(last_nal, timestamp, &[], nal));
                continue;
            }

            let indicator = (nal[0] & 0xE0) | FU_A;
            let nal_type = nal[0] & 0x1F;
            let body = &nal[1..];
            let chunk = max_payload - 2;
            let count = body.len().div_ceil(chunk);
            for (n, part) in body.chunks(chunk).enumerate() {
                let start = n == 0;
                let end = n + 1 == count;
                let header = nal_type | (if start { 0x80 } else { 0 }) | (if end { 0x40 } else { 0 });
                packets.push(self.packet(last_nal && end, timestamp, &[indicator, header], part));
            }
        }
        packets
    }

    fn packet(&mut self, marker: bool, timestamp: u32, prefix: &[u8], payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + prefix.len() + payload.len());
        buf.put_u8(0x80);
        buf.put_u8((if marker { 0x80 } else { 0 }) | self.payload_type);
        buf.put_u16(self.sequence);
        buf.put_u32(timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(prefix);
        buf.put_slice(payload);
        self.sequence = self.sequence.wrapping_add(1);
        buf.freeze()
    }
}

/// RTSP interleaved frame: `$`, channel, 16-bit length, packet.
pub fn interleaved(channel: u8, packet: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + packet.len());
    buf.put_u8(b'$');
    buf.put_u8(channel);
    buf.put_u16(packet.len() as u16);
    buf.put_slice(packet);
    buf.freeze()
}
