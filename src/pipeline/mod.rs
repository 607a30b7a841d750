//! Worker lifecycle for one simulated camera.
//!
//! ```text
//!   Producer (blocking) ──► code queue ──► ApiSender (task)
//!        │
//!        └────────────────► frame queue ─► StreamEncoder (blocking) ──► StreamHub ──► RtspServer (task)
//! ```
//!
//! The producer observes `stop`; the consumers observe a second, harder
//! token that only fires once the drain window is over.

pub mod encoder;
pub mod producer;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    api::ApiSender,
    config::Settings,
    error::{PipelineError, SourceError},
    media::{
        qr::CodeDecoder,
        source::{FrameReader, FrameSource},
        splitter::Geometry,
        types::{DecodedPayload, MainView},
    },
    queue::DropQueue,
    rtsp::{RtspServer, StreamHub},
    stats::{PipelineStats, StatsSnapshot},
};
use encoder::{StreamEncoder, VideoEncoder};
use producer::Producer;

/// Access units buffered per RTSP client before it counts as lagging.
const HUB_CAPACITY: usize = 64;

const PRODUCER: &str = "producer";
const API_SENDER: &str = "api_sender";
const STREAM_ENCODER: &str = "stream_encoder";
const RTSP_SERVER: &str = "rtsp_server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Warmup,
    Running,
    Draining,
    Stopped,
}

type WorkerExit = (&'static str, Result<(), PipelineError>);

/// Shared handles the running phase reports on.
struct Wiring {
    codes: Arc<DropQueue<DecodedPayload>>,
    frames: Arc<DropQueue<MainView>>,
    hub: Arc<StreamHub>,
}

pub struct Supervisor {
    settings: Settings,
    stats: Arc<PipelineStats>,
    state: watch::Sender<PipelineState>,
    stop: CancellationToken,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        let (state, _) = watch::channel(PipelineState::Starting);
        Self {
            settings,
            stats: Arc::new(PipelineStats::new()),
            state,
            stop: CancellationToken::new(),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Cancelling this token starts a graceful shutdown.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    fn enter(&self, state: PipelineState) {
        log::info!("[Supervisor] {:?}", state);
        self.state.send_replace(state);
    }

    /// Runs the pipeline to completion. Returns the final counters, or the
    /// first fatal error once every worker has been shut down.
    pub async fn run<S, D, E, F>(
        self,
        open_source: F,
        decoder: D,
        encoder: E,
    ) -> Result<StatsSnapshot, PipelineError>
    where
        S: FrameSource + 'static,
        D: CodeDecoder + 'static,
        E: VideoEncoder + 'static,
        F: FnOnce() -> Result<S, SourceError> + Send + 'static,
    {
        self.enter(PipelineState::Starting);
        let result = self.supervise(open_source, decoder, encoder).await;
        self.enter(PipelineState::Stopped);

        let snapshot = self.stats.snapshot();
        match &result {
            Ok(()) => log::info!("[Supervisor] final stats: {}", snapshot),
            Err(e) => log::error!("[Supervisor] fatal: {}; final stats: {}", e, snapshot),
        }
        result.map(|()| snapshot)
    }

    async fn supervise<S, D, E, F>(&self, open_source: F, decoder: D, encoder: E) -> Result<(), PipelineError>
    where
        S: FrameSource + 'static,
        D: CodeDecoder + 'static,
        E: VideoEncoder + 'static,
        F: FnOnce() -> Result<S, SourceError> + Send + 'static,
    {
        let settings = &self.settings;

        // Starting
        let geometry = Geometry::from_settings(settings);
        geometry.validate()?;
        let source = tokio::task::spawn_blocking(open_source)
            .await
            .map_err(|_| PipelineError::WorkerPanicked("source open"))??;
        if let Some((width, height)) = source.dimensions() {
            geometry.check_frame(width, height)?;
        }
        let overlay = settings.overlay_timestamp.then(|| settings.tz());
        let mut reader = FrameReader::new(source, settings.fps, overlay);

        let wiring = Wiring {
            codes: Arc::new(DropQueue::new("code", settings.queue_size, settings.overflow_policy)),
            frames: Arc::new(DropQueue::new("frame", settings.queue_size, settings.overflow_policy)),
            hub: StreamHub::new(HUB_CAPACITY, settings.output_fps()),
        };
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.rtsp_port));
        let server = RtspServer::bind(addr, &settings.rtsp_path, wiring.hub.clone())
            .await
            .map_err(|e| PipelineError::EncoderFault(format!("{:#}", e)))?;
        let api = ApiSender::new(settings, self.stats.clone())
            .map_err(|e| PipelineError::Startup(format!("{:#}", e)))?;

        // Warmup
        self.enter(PipelineState::Warmup);
        let warmup_frames = settings.warmup_frames;
        let stats = self.stats.clone();
        let stop = self.stop.clone();
        let (reader, warmed) = tokio::task::spawn_blocking(move || {
            let warmed = producer::warmup(&mut reader, warmup_frames, &stats, &stop);
            (reader, warmed)
        })
        .await
        .map_err(|_| PipelineError::WorkerPanicked("warmup"))?;
        log::info!("[Supervisor] warmup discarded {} frames", warmed?);

        // Running
        self.enter(PipelineState::Running);
        let hard = CancellationToken::new();
        let (exit_tx, mut exits) = mpsc::unbounded_channel::<WorkerExit>();

        let producer = Producer::new(
            reader,
            decoder,
            geometry,
            wiring.codes.clone(),
            wiring.frames.clone(),
            self.stats.clone(),
        )
        .with_frame_limit(settings.frame_limit);
        let stream_encoder = StreamEncoder::new(
            encoder,
            wiring.frames.clone(),
            wiring.hub.clone(),
            self.stats.clone(),
            settings.output_fps(),
            settings.idle_policy,
        );

        let stop = self.stop.clone();
        watch_worker(&exit_tx, PRODUCER, tokio::task::spawn_blocking(move || producer.run(stop)));
        let cancel = hard.clone();
        watch_worker(
            &exit_tx,
            STREAM_ENCODER,
            tokio::task::spawn_blocking(move || stream_encoder.run(cancel)),
        );
        let (codes, cancel) = (wiring.codes.clone(), hard.clone());
        watch_worker(
            &exit_tx,
            API_SENDER,
            tokio::spawn(async move {
                api.run(codes, cancel).await;
                Ok(())
            }),
        );
        let cancel = hard.clone();
        watch_worker(
            &exit_tx,
            RTSP_SERVER,
            tokio::spawn(async move {
                server.run(cancel).await;
                Ok(())
            }),
        );
        drop(exit_tx);

        let mut alive = vec![PRODUCER, STREAM_ENCODER, API_SENDER, RTSP_SERVER];
        let mut fatal: Option<PipelineError> = None;
        let period = settings.stats_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    log::info!("[Supervisor] stop requested");
                    break;
                }
                exit = exits.recv() => {
                    let Some((name, result)) = exit else { break };
                    alive.retain(|n| *n != name);
                    match result {
                        Ok(()) => log::info!("[Supervisor] {} finished", name),
                        Err(e) => {
                            fatal = Some(e);
                            break;
                        }
                    }
                    if name == PRODUCER {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    log::info!("[Supervisor] stats: {}", self.snapshot(&wiring));
                }
            }
        }

        // Draining
        self.enter(PipelineState::Draining);
        self.stop.cancel();
        let drain = self.settings.drain_timeout();
        let drained = tokio::time::timeout(
            drain,
            collect_exits(&mut exits, &mut alive, &[PRODUCER, API_SENDER, STREAM_ENCODER], &mut fatal),
        )
        .await;
        if drained.is_err() {
            log::warn!(
                "[Supervisor] drain window of {:?} elapsed with {} still queued",
                drain,
                wiring.codes.len() + wiring.frames.len()
            );
        }

        hard.cancel();
        let join = self.settings.join_timeout();
        let all = [PRODUCER, API_SENDER, STREAM_ENCODER, RTSP_SERVER];
        if tokio::time::timeout(join, collect_exits(&mut exits, &mut alive, &all, &mut fatal))
            .await
            .is_err()
        {
            log::warn!(
                "[Supervisor] workers did not exit within {:?}: {}",
                join,
                alive.join(", ")
            );
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn snapshot(&self, wiring: &Wiring) -> StatsSnapshot {
        StatsSnapshot {
            code_queue: wiring.codes.len(),
            frame_queue: wiring.frames.len(),
            clients: wiring.hub.client_count(),
            ..self.stats.snapshot()
        }
    }
}

/// Reports the worker's exit (or panic) on `exits`.
fn watch_worker(
    exits: &mpsc::UnboundedSender<WorkerExit>,
    name: &'static str,
    task: JoinHandle<Result<(), PipelineError>>,
) {
    let exits = exits.clone();
    tokio::spawn(async move {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("[Supervisor] {} aborted: {}", name, e);
                Err(PipelineError::WorkerPanicked(name))
            }
        };
        let _ = exits.send((name, result));
    });
}

/// Waits until none of `names` is alive. The first fatal error is kept.
async fn collect_exits(
    exits: &mut mpsc::UnboundedReceiver<WorkerExit>,
    alive: &mut Vec<&'static str>,
    names: &[&str],
    fatal: &mut Option<PipelineError>,
) {
    while alive.iter().any(|n| names.contains(n)) {
        let Some((name, result)) = exits.recv().await else {
            break;
        };
        alive.retain(|n| *n != name);
        match result {
            Ok(()) => log::debug!("[Supervisor] {} exited", name),
            Err(e) if fatal.is_none() => *fatal = Some(e),
            Err(e) => log::error!("[Supervisor] {} also failed: {}", name, e),
        }
    }
}
