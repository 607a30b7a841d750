use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{packet::RawPacket, stream::AvStream};

/// Demuxer over a media file.
pub struct AvInput {
    path: PathBuf,
    inner: ffmpeg_next::format::context::Input,
    streams: HashMap<usize, AvStream>,
}

impl AvInput {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| anyhow::anyhow!("open input {}: {}", path.display(), e))?;

        let mut streams = HashMap::new();
        for stream in input.streams() {
            streams.insert(stream.index(), AvStream::from(stream));
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: input,
            streams,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn streams(&self) -> &HashMap<usize, AvStream> {
        &self.streams
    }

    /// The stream FFmpeg ranks best among the video streams.
    pub fn best_video_stream(&self) -> anyhow::Result<AvStream> {
        let index = self
            .inner
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .map(|s| s.index())
            .ok_or(anyhow::anyhow!("no video stream in {}", self.path.display()))?;
        self.streams
            .get(&index)
            .cloned()
            .ok_or(anyhow::anyhow!("stream {} not found", index))
    }

    /// Next packet of any stream, `None` at end of file.
    pub fn read_packet(&mut self) -> Option<RawPacket> {
        self.inner
            .packets()
            .next()
            .map(|(stream, packet)| (packet, stream.time_base()).into())
    }
}
