use std::path::{Path, PathBuf};

use chrono::Utc;
use chrono_tz::Tz;
use ffmpeg_media::reader::{ReadEvent, VideoFileReader};

use crate::{
    error::SourceError,
    media::{
        overlay,
        types::{BgrImage, Frame},
    },
    pacing::Pacer,
};

pub enum SourceEvent {
    Frame(BgrImage),
    EndOfLoop,
}

/// A decodable media resource read front to back. `reopen` rewinds to the
/// start with fresh decoder state.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<SourceEvent, SourceError>;

    fn reopen(&mut self) -> Result<(), SourceError>;

    /// Picture size when the container declares it.
    fn dimensions(&self) -> Option<(u32, u32)> {
        None
    }
}

/// Wraps a packed BGR24 buffer, rejecting one whose length does not match
/// the stated size.
pub fn picture_from_packed(width: u32, height: u32, data: Vec<u8>) -> Result<BgrImage, SourceError> {
    let len = data.len();
    BgrImage::from_raw(width, height, data).ok_or_else(|| {
        SourceError::Read(format!(
            "picture is {} bytes, expected {} for {}x{}",
            len,
            width as usize * height as usize * 3,
            width,
            height
        ))
    })
}

/// Video file decoded through FFmpeg.
pub struct FfmpegSource {
    path: PathBuf,
    reader: VideoFileReader,
}

impl FfmpegSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let reader = Self::open_reader(&path)?;
        log::info!(
            "[VideoReader] opened {} ({}x{} @ {:.2} fps)",
            path.display(),
            reader.width(),
            reader.height(),
            reader.fps()
        );
        Ok(Self { path, reader })
    }

    fn open_reader(path: &Path) -> Result<VideoFileReader, SourceError> {
        VideoFileReader::open(path).map_err(|e| SourceError::Open {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        })
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<SourceEvent, SourceError> {
        match self.reader.next_frame() {
            Ok(ReadEvent::Frame(packed)) => {
                picture_from_packed(packed.width, packed.height, packed.data).map(SourceEvent::Frame)
            }
            Ok(ReadEvent::EndOfFile) => Ok(SourceEvent::EndOfLoop),
            Err(e) => Err(SourceError::Read(format!("{:#}", e))),
        }
    }

    fn reopen(&mut self) -> Result<(), SourceError> {
        self.reader = Self::open_reader(&self.path)?;
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.reader.width(), self.reader.height()) {
            (0, _) | (_, 0) => None,
            size => Some(size),
        }
    }
}

/// Turns a [`FrameSource`] into an endless, paced sequence of [`Frame`]s.
///
/// End of stream rewinds the source; sequence numbers keep counting. A read
/// error gets one reopen, a second consecutive error is returned.
pub struct FrameReader<S> {
    source: S,
    pacer: Pacer,
    overlay: Option<Tz>,
    next_sequence: u64,
    frames_this_loop: u64,
    loops: u64,
}

impl<S: FrameSource> FrameReader<S> {
    pub fn new(source: S, fps: u32, overlay: Option<Tz>) -> Self {
        Self {
            source,
            pacer: Pacer::from_fps(fps),
            overlay,
            next_sequence: 0,
            frames_this_loop: 0,
            loops: 0,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Sequence number the next frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn loops(&self) -> u64 {
        self.loops
    }

    pub fn next_frame(&mut self) -> Result<Frame, SourceError> {
        self.pacer.wait();
        let mut picture = self.read_picture()?;
        let captured_at = Utc::now();
        if let Some(tz) = self.overlay {
            overlay::draw_timestamp(&mut picture, captured_at, tz);
        }

        let frame = Frame::new(self.next_sequence, captured_at, picture);
        self.next_sequence += 1;
        Ok(frame)
    }

    fn read_picture(&mut self) -> Result<BgrImage, SourceError> {
        let mut retried = false;
        loop {
            match self.source.read() {
                Ok(SourceEvent::Frame(picture)) => {
                    self.frames_this_loop += 1;
                    return Ok(picture);
                }
                Ok(SourceEvent::EndOfLoop) => {
                    if self.frames_this_loop == 0 {
                        return Err(SourceError::Read("source produced no frames".to_string()));
                    }
                    self.loops += 1;
                    log::info!(
                        "[VideoReader] end of stream after {} frames, rewinding (loop {})",
                        self.frames_this_loop,
                        self.loops
                    );
                    self.frames_this_loop = 0;
                    self.source.reopen()?;
                }
                Err(e) if !retried => {
                    log::warn!("[VideoReader] {}, reopening source", e);
                    retried = true;
                    self.source.reopen()?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;
