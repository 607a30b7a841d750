use std::path::Path;

use crate::{
    decoder::Decoder,
    frame::{BgrConverter, PackedBgr},
    input::AvInput,
    stream::AvStream,
};

pub enum ReadEvent {
    Frame(PackedBgr),
    EndOfFile,
}

/// Demux + decode + BGR conversion of the best video stream of a file.
/// Once `EndOfFile` has been returned the reader stays drained; open a new
/// one to start over.
pub struct VideoFileReader {
    input: AvInput,
    stream: AvStream,
    decoder: Decoder,
    converter: BgrConverter,
    eof_sent: bool,
}

unsafe impl Send for VideoFileReader {}

impl VideoFileReader {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let input = AvInput::open(path)?;
        let stream = input.best_video_stream()?;
        let decoder = Decoder::new(&stream)?;
        log::debug!(
            "opened {} stream #{} {}x{} @ {:.2} fps",
            input.path().display(),
            stream.index(),
            stream.width(),
            stream.height(),
            stream.fps()
        );
        Ok(Self {
            input,
            stream,
            decoder,
            converter: BgrConverter::new(),
            eof_sent: false,
        })
    }

    pub fn fps(&self) -> f32 {
        self.stream.fps()
    }

    pub fn width(&self) -> u32 {
        self.stream.width()
    }

    pub fn height(&self) -> u32 {
        self.stream.height()
    }

    pub fn next_frame(&mut self) -> anyhow::Result<ReadEvent> {
        loop {
            if let Some(frame) = self.decoder.receive_frame()? {
                return Ok(ReadEvent::Frame(self.converter.convert(&frame)?));
            }
            if self.eof_sent {
                return Ok(ReadEvent::EndOfFile);
            }
            match self.input.read_packet() {
                Some(packet) => {
                    if packet.index() == self.decoder.stream_index() {
                        self.decoder.send_packet(packet)?;
                    }
                }
                None => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
            }
        }
    }
}
