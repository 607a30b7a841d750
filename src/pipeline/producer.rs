use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    error::{PipelineError, SourceError},
    media::{
        qr::{CodeDecoder, DecodeOutcome},
        source::{FrameReader, FrameSource},
        splitter::Geometry,
        types::{DecodedPayload, Frame, MainView},
    },
    queue::{DropQueue, PushOutcome},
    stats::{Counter, PipelineStats, RateMeter},
};

const FPS_LOG_EVERY: u64 = 300;

/// Reads and throws away `frames` frames. Only `frames_read` moves.
pub fn warmup<S: FrameSource>(
    reader: &mut FrameReader<S>,
    frames: u64,
    stats: &PipelineStats,
    stop: &CancellationToken,
) -> Result<u64, SourceError> {
    let mut discarded = 0;
    while discarded < frames && !stop.is_cancelled() {
        reader.next_frame()?;
        stats.incr(Counter::FramesRead);
        discarded += 1;
    }
    Ok(discarded)
}

/// Reader, splitter and decoder in one blocking loop feeding both queues.
pub struct Producer<S, D> {
    reader: FrameReader<S>,
    decoder: D,
    geometry: Geometry,
    codes: Arc<DropQueue<DecodedPayload>>,
    frames: Arc<DropQueue<MainView>>,
    stats: Arc<PipelineStats>,
    frame_limit: Option<u64>,
}

impl<S: FrameSource, D: CodeDecoder> Producer<S, D> {
    pub fn new(
        reader: FrameReader<S>,
        decoder: D,
        geometry: Geometry,
        codes: Arc<DropQueue<DecodedPayload>>,
        frames: Arc<DropQueue<MainView>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            reader,
            decoder,
            geometry,
            codes,
            frames,
            stats,
            frame_limit: None,
        }
    }

    /// Stop on our own after `limit` frames.
    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    /// Produces until `stop` fires, the frame limit is reached or a fatal
    /// error occurs. Both queues are closed on the way out so the consumers
    /// can drain what is left.
    pub fn run(mut self, stop: CancellationToken) -> Result<(), PipelineError> {
        let result = self.produce(&stop);
        self.codes.close();
        self.frames.close();
        match &result {
            Ok(()) => log::info!("[VideoReader] stopped at sequence {}", self.reader.next_sequence()),
            Err(e) => log::error!("[VideoReader] {}", e),
        }
        result
    }

    fn produce(&mut self, stop: &CancellationToken) -> Result<(), PipelineError> {
        log::info!(
            "[VideoReader] producing from sequence {}",
            self.reader.next_sequence()
        );
        let mut meter = RateMeter::new(FPS_LOG_EVERY);
        let mut produced = 0u64;

        while !stop.is_cancelled() {
            if self.frame_limit.is_some_and(|limit| produced >= limit) {
                log::info!("[VideoReader] frame limit {} reached", produced);
                break;
            }
            let frame = self.reader.next_frame()?;
            self.stats.incr(Counter::FramesRead);
            produced += 1;
            self.process(frame)?;

            if let Some(fps) = meter.tick() {
                log::info!("[VideoReader] GRAB FPS: {:.2}", fps);
            }
        }
        Ok(())
    }

    /// Splits one frame and hands its parts to the two queues.
    pub fn process(&mut self, frame: Frame) -> Result<(), PipelineError> {
        let (view, region) = self.geometry.split(&frame)?;

        match self.decoder.decode(&region) {
            DecodeOutcome::Decoded(data) => {
                self.stats.incr(Counter::QrDecoded);
                let payload = DecodedPayload {
                    data,
                    captured_at: frame.captured_at(),
                    sequence: frame.sequence(),
                };
                let outcome = self.codes.push(payload);
                self.count_push(self.codes.name(), frame.sequence(), outcome);
            }
            DecodeOutcome::NoCode => self.stats.incr(Counter::NoCode),
            DecodeOutcome::Failed(reason) => {
                self.stats.incr(Counter::Errors);
                log::debug!("[QRProcessor] frame {}: {}", frame.sequence(), reason);
            }
        }

        let outcome = self.frames.push(view);
        self.count_push(self.frames.name(), frame.sequence(), outcome);
        Ok(())
    }

    fn count_push(&self, queue: &str, sequence: u64, outcome: PushOutcome) {
        if outcome.dropped() {
            self.stats.incr(Counter::Errors);
            log::debug!("[VideoReader] {} queue full at frame {}: {:?}", queue, sequence, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::Settings;
    use crate::media::types::{CodeRegion, Rect, black, fill_rect};
    use crate::queue::OverflowPolicy;
    use crate::test_support::{MarkerDecoder, SyntheticSource};

    const CODE: Rect = Rect {
        x: 48,
        y: 64,
        width: 16,
        height: 16,
    };

    fn geometry() -> Geometry {
        Geometry::from_settings(&Settings {
            original_width: 64,
            original_height: 80,
            frame_width: 64,
            frame_height: 48,
            qrcode_size: 16,
            ..Default::default()
        })
    }

    fn producer<D: CodeDecoder>(
        source: SyntheticSource,
        decoder: D,
        capacity: usize,
    ) -> (
        Producer<SyntheticSource, D>,
        Arc<DropQueue<DecodedPayload>>,
        Arc<DropQueue<MainView>>,
        Arc<PipelineStats>,
    ) {
        let codes = Arc::new(DropQueue::new("code", capacity, OverflowPolicy::DropOldest));
        let frames = Arc::new(DropQueue::new("frame", capacity, OverflowPolicy::DropOldest));
        let stats = Arc::new(PipelineStats::new());
        let reader = FrameReader::new(source, 10_000, None);
        let producer = Producer::new(
            reader,
            decoder,
            geometry(),
            codes.clone(),
            frames.clone(),
            stats.clone(),
        );
        (producer, codes, frames, stats)
    }

    struct BrokenDecoder;

    impl CodeDecoder for BrokenDecoder {
        fn decode(&mut self, _region: &CodeRegion<'_>) -> DecodeOutcome {
            DecodeOutcome::Failed("bad buffer".to_string())
        }
    }

    #[test]
    fn test_warmup_twice_discards_each_time() {
        let stats = PipelineStats::new();
        let stop = CancellationToken::new();
        let mut reader = FrameReader::new(SyntheticSource::new(64, 80, 50), 10_000, None);

        assert_eq!(warmup(&mut reader, 90, &stats, &stop).unwrap(), 90);
        assert_eq!(warmup(&mut reader, 90, &stats, &stop).unwrap(), 90);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_read, 180);
        assert_eq!(snapshot.qr_decoded + snapshot.errors + snapshot.no_code, 0);
        assert_eq!(reader.next_sequence(), 180);
    }

    #[test]
    fn test_warmup_stops_on_signal() {
        let stats = PipelineStats::new();
        let stop = CancellationToken::new();
        stop.cancel();
        let mut reader = FrameReader::new(SyntheticSource::new(64, 80, 50), 10_000, None);
        assert_eq!(warmup(&mut reader, 90, &stats, &stop).unwrap(), 0);
    }

    #[test]
    fn test_frame_limit_and_fan_out() {
        let source = SyntheticSource::new(64, 80, 40).with_codes(10, CODE);
        let (producer, codes, frames, stats) = producer(source, MarkerDecoder::new("{\"id\":1}"), 128);

        producer.with_frame_limit(Some(100)).run(CancellationToken::new()).unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_read, 100);
        assert_eq!(snapshot.qr_decoded, 9);
        assert_eq!(snapshot.no_code, 91);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(codes.len(), 9);
        assert_eq!(frames.len(), 100);
        assert!(codes.is_closed() && frames.is_closed());

        let first = codes.try_pop().unwrap().into_inner();
        assert_eq!(first.sequence, 10);
        assert!(first.data.is_structured());
    }

    #[test]
    fn test_full_queue_drops_count_as_errors() {
        let source = SyntheticSource::new(64, 80, 100);
        let (producer, _codes, frames, stats) = producer(source, MarkerDecoder::new("x"), 5);

        producer.with_frame_limit(Some(20)).run(CancellationToken::new()).unwrap();

        assert_eq!(frames.len(), 5);
        assert_eq!(stats.get(Counter::Errors), 15);
        // the survivors are the newest five
        assert_eq!(frames.try_pop().unwrap().value().sequence, 15);
    }

    #[test]
    fn test_decoder_failure_counts_error_but_frame_still_flows() {
        let source = SyntheticSource::new(64, 80, 100);
        let (producer, codes, frames, stats) = producer(source, BrokenDecoder, 30);

        producer.with_frame_limit(Some(3)).run(CancellationToken::new()).unwrap();

        assert_eq!(stats.get(Counter::Errors), 3);
        assert_eq!(stats.get(Counter::NoCode), 0);
        assert!(codes.is_empty());
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn test_geometry_error_is_fatal_and_closes_queues() {
        let source = SyntheticSource::new(32, 32, 100);
        let (producer, codes, frames, _stats) = producer(source, MarkerDecoder::new("x"), 30);

        let err = producer.run(CancellationToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Geometry(_)));
        assert!(codes.is_closed() && frames.is_closed());
    }

    #[test]
    fn test_process_single_frame() {
        let (mut producer, codes, frames, stats) =
            producer(SyntheticSource::new(64, 80, 1), MarkerDecoder::new("plain"), 30);
        let mut picture = black(64, 80);
        fill_rect(&mut picture, CODE, [255, 255, 255]);
        producer
            .process(Frame::new(42, Utc::now(), picture))
            .unwrap();

        assert_eq!(stats.get(Counter::QrDecoded), 1);
        let payload = codes.try_pop().unwrap().into_inner();
        assert_eq!(payload.sequence, 42);
        assert_eq!(payload.data.as_text(), Some("plain"));
        assert_eq!(frames.try_pop().unwrap().value().sequence, 42);
    }
}
