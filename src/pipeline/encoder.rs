use std::sync::Arc;
use std::time::{Duration, Instant};

use ffmpeg_media::{
    annexb::ensure_annexb,
    encoder::{Encoder, Settings as EncoderSettings},
    packet::EncodedPacket,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{IdlePolicy, Settings},
    error::PipelineError,
    media::types::{EncodedFrame, MainView},
    pacing::Pacer,
    queue::DropQueue,
    rtsp::StreamHub,
    stats::{Counter, PipelineStats, RateMeter},
};

const FPS_LOG_EVERY: u64 = 300;

pub trait VideoEncoder: Send {
    /// Encodes one view, returning the access units the codec released.
    fn encode(&mut self, view: &MainView) -> anyhow::Result<Vec<EncodedPacket>>;

    /// Flushes whatever the codec still holds once the input has ended.
    fn finish(&mut self) -> anyhow::Result<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }
}

/// H.264 through FFmpeg.
pub struct FfmpegEncoder {
    inner: Encoder,
}

impl FfmpegEncoder {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let inner = Encoder::new(
            EncoderSettings {
                width: settings.frame_width,
                height: settings.frame_height,
                fps: settings.output_fps(),
                keyframe_interval: settings.keyframe_interval(),
                bitrate_kbps: settings.bitrate_kbps,
                prefer_hardware: settings.prefer_hardware,
                ..Default::default()
            },
            None,
        )?;
        log::info!("[StreamEncoder] using {}", inner.codec_name());
        Ok(Self { inner })
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&mut self, view: &MainView) -> anyhow::Result<Vec<EncodedPacket>> {
        self.inner
            .encode_bgr(view.image.width(), view.image.height(), view.image.as_raw())
    }

    fn finish(&mut self) -> anyhow::Result<Vec<EncodedPacket>> {
        self.inner.finish()
    }
}

/// Pulls main views off the frame queue at the output cadence and publishes
/// the encoded stream. Never speeds up to catch up with a backlog.
pub struct StreamEncoder<E> {
    encoder: E,
    frames: Arc<DropQueue<MainView>>,
    hub: Arc<StreamHub>,
    stats: Arc<PipelineStats>,
    pacer: Pacer,
    idle: IdlePolicy,
    last: Option<MainView>,
}

impl<E: VideoEncoder> StreamEncoder<E> {
    pub fn new(
        encoder: E,
        frames: Arc<DropQueue<MainView>>,
        hub: Arc<StreamHub>,
        stats: Arc<PipelineStats>,
        fps: u32,
        idle: IdlePolicy,
    ) -> Self {
        Self {
            encoder,
            frames,
            hub,
            stats,
            pacer: Pacer::from_fps(fps),
            idle,
            last: None,
        }
    }

    /// Runs until the frame queue is closed and drained, or `stop` fires.
    pub fn run(mut self, stop: CancellationToken) -> Result<(), PipelineError> {
        log::info!(
            "[StreamEncoder] starting at {:.2} fps, idle policy {:?}",
            1.0 / self.pacer.interval().as_secs_f64(),
            self.idle
        );
        let started = Instant::now();
        let mut meter = RateMeter::new(FPS_LOG_EVERY);

        let mut drained = false;
        while !stop.is_cancelled() {
            self.pacer.wait();
            match self.frames.try_pop() {
                Some(item) => self.last = Some(item.into_inner()),
                // an item pushed just before the close is still in the queue
                None if self.frames.is_closed() && self.frames.is_empty() => {
                    drained = true;
                    break;
                }
                None if self.idle == IdlePolicy::Pause => continue,
                None => {}
            }
            let Some(view) = self.last.as_ref() else {
                continue;
            };

            let packets = self
                .encoder
                .encode(view)
                .map_err(|e| PipelineError::EncoderFault(format!("{:#}", e)))?;
            self.publish(view.sequence, packets, started.elapsed());
            self.stats.incr(Counter::FramesStreamed);

            if let Some(fps) = meter.tick() {
                log::info!("[StreamEncoder] ENCODE FPS: {:.2}", fps);
            }
        }

        if drained {
            match self.encoder.finish() {
                Ok(packets) => {
                    log::debug!("[StreamEncoder] flushed {} delayed packets", packets.len());
                    let sequence = self.last.as_ref().map_or(0, |v| v.sequence);
                    self.publish(sequence, packets, started.elapsed());
                }
                Err(e) => log::warn!("[StreamEncoder] flush failed: {:#}", e),
            }
        }
        log::info!("[StreamEncoder] stopped");
        Ok(())
    }

    fn publish(&self, sequence: u64, packets: Vec<EncodedPacket>, timestamp: Duration) {
        for packet in packets {
            self.hub.publish(EncodedFrame {
                sequence,
                data: ensure_annexb(packet.data),
                is_key: packet.is_key,
                timestamp,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::media::types::{Frame, Rect, black};
    use crate::queue::OverflowPolicy;
    use crate::test_support::CountingEncoder;

    fn view(sequence: u64) -> MainView {
        let frame = Frame::new(sequence, Utc::now(), black(8, 8));
        MainView {
            sequence,
            captured_at: frame.captured_at(),
            image: frame.crop(Rect::new(0, 0, 8, 8)),
        }
    }

    fn setup(
        encoder: CountingEncoder,
        idle: IdlePolicy,
    ) -> (StreamEncoder<CountingEncoder>, Arc<DropQueue<MainView>>, Arc<StreamHub>, Arc<PipelineStats>) {
        let frames = Arc::new(DropQueue::new("frame", 10, OverflowPolicy::DropOldest));
        let hub = StreamHub::new(16, 500);
        let stats = Arc::new(PipelineStats::new());
        let worker = StreamEncoder::new(encoder, frames.clone(), hub.clone(), stats.clone(), 500, idle);
        (worker, frames, hub, stats)
    }

    #[test]
    fn test_drains_closed_queue_and_publishes() {
        let (worker, frames, hub, stats) = setup(CountingEncoder::new(2), IdlePolicy::Pause);
        let mut rx = hub.subscribe();
        for n in 0..3 {
            frames.push(view(n));
        }
        frames.close();

        worker.run(CancellationToken::new()).unwrap();

        assert_eq!(stats.get(Counter::FramesStreamed), 3);
        let keys: Vec<bool> = (0..3).map(|_| rx.try_recv().unwrap().is_key).collect();
        assert_eq!(keys, vec![true, false, true]);
        assert!(hub.parameter_sets().is_complete());
    }

    #[test]
    fn test_drain_flushes_delayed_packets() {
        let encoder = CountingEncoder::new(2).with_delayed_packet();
        let flushes = encoder.flushes.clone();
        let (worker, frames, hub, stats) = setup(encoder, IdlePolicy::Pause);
        let mut rx = hub.subscribe();
        for n in 0..2 {
            frames.push(view(n));
        }
        frames.close();

        worker.run(CancellationToken::new()).unwrap();

        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        let published: Vec<EncodedFrame> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(published.len(), 3);
        assert_eq!(published[2].sequence, 1);
        assert!(!published[2].is_key);
        // the flush is not a streamed frame of its own
        assert_eq!(stats.get(Counter::FramesStreamed), 2);
    }

    #[test]
    fn test_stop_skips_flush() {
        let encoder = CountingEncoder::new(2).with_delayed_packet();
        let flushes = encoder.flushes.clone();
        let (worker, frames, _hub, _stats) = setup(encoder, IdlePolicy::Pause);
        frames.push(view(0));
        let stop = CancellationToken::new();
        stop.cancel();

        worker.run(stop).unwrap();
        assert_eq!(flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_repeat_last_holds_cadence() {
        let (worker, frames, _hub, stats) = setup(CountingEncoder::new(2), IdlePolicy::RepeatLast);
        frames.push(view(0));
        let stop = CancellationToken::new();
        let stopper = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            stopper.cancel();
        });

        worker.run(stop).unwrap();

        // one input frame, re-emitted on every later tick
        assert!(stats.get(Counter::FramesStreamed) > 5);
    }

    #[test]
    fn test_pause_emits_nothing_while_idle() {
        let (worker, _frames, _hub, stats) = setup(CountingEncoder::new(2), IdlePolicy::Pause);
        let stop = CancellationToken::new();
        let stopper = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stopper.cancel();
        });

        worker.run(stop).unwrap();
        assert_eq!(stats.get(Counter::FramesStreamed), 0);
    }

    #[test]
    fn test_codec_failure_is_encoder_fault() {
        let encoder = CountingEncoder::new(2).failing_at(1);
        let encoded = encoder.encoded.clone();
        let (worker, frames, _hub, stats) = setup(encoder, IdlePolicy::Pause);
        for n in 0..3 {
            frames.push(view(n));
        }
        frames.close();

        let err = worker.run(CancellationToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::EncoderFault(_)));
        assert_eq!(encoded.load(Ordering::SeqCst), 1);
        assert_eq!(stats.get(Counter::FramesStreamed), 1);
    }
}
