use bytes::Bytes;
use ffmpeg_next::Rational;

/// Demuxed packet together with the time base of the stream it came from.
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}

/// Compressed output of the encoder. `data` is an Annex B access unit.
#[derive(Clone, Debug)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub is_key: bool,
}

impl From<&ffmpeg_next::codec::packet::Packet> for EncodedPacket {
    fn from(packet: &ffmpeg_next::codec::packet::Packet) -> Self {
        Self {
            data: packet
                .data()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            pts: packet.pts(),
            is_key: packet.is_key(),
        }
    }
}
