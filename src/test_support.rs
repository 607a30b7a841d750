//! Stand-ins for FFmpeg and the backend used across the unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Router, body::Bytes, extract::State, http::StatusCode, http::Uri};
use ffmpeg_media::packet::EncodedPacket;
use tokio_util::sync::CancellationToken;

use crate::{
    error::SourceError,
    media::{
        qr::{CodeDecoder, DecodeOutcome},
        source::{FrameSource, SourceEvent},
        types::{CodeRegion, MainView, QrData, Rect, black, fill_rect},
    },
    pipeline::encoder::VideoEncoder,
};

/// Generates black pictures, looping every `loop_len` frames. Every
/// `code_every`-th picture (counted over the source lifetime, first one
/// excluded) gets a white block in `code_rect`.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    loop_len: u64,
    position: u64,
    emitted: u64,
    code_every: Option<u64>,
    code_rect: Rect,
    failure_at: Option<u64>,
    failures_left: usize,
    pub reopens: Arc<AtomicUsize>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, loop_len: u64) -> Self {
        Self {
            width,
            height,
            loop_len,
            position: 0,
            emitted: 0,
            code_every: None,
            code_rect: Rect::new(0, 0, 1, 1),
            failure_at: None,
            failures_left: 0,
            reopens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_codes(mut self, every: u64, rect: Rect) -> Self {
        self.code_every = Some(every);
        self.code_rect = rect;
        self
    }

    /// Fails `count` consecutive reads once `at` pictures have been emitted.
    pub fn with_failures(mut self, at: u64, count: usize) -> Self {
        self.failure_at = Some(at);
        self.failures_left = count;
        self
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<SourceEvent, SourceError> {
        if self.failure_at == Some(self.emitted) && self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SourceError::Read("injected".to_string()));
        }
        if self.position >= self.loop_len {
            return Ok(SourceEvent::EndOfLoop);
        }
        let mut picture = black(self.width, self.height);
        if let Some(every) = self.code_every {
            if self.emitted > 0 && self.emitted % every == 0 {
                fill_rect(&mut picture, self.code_rect, [255, 255, 255]);
            }
        }
        self.position += 1;
        self.emitted += 1;
        Ok(SourceEvent::Frame(picture))
    }

    fn reopen(&mut self) -> Result<(), SourceError> {
        self.position = 0;
        self.reopens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }
}

/// Treats a bright top-left region pixel as a code carrying `payload`.
pub struct MarkerDecoder {
    pub payload: String,
}

impl MarkerDecoder {
    pub fn new(payload: &str) -> Self {
        Self {
            payload: payload.to_string(),
        }
    }
}

impl CodeDecoder for MarkerDecoder {
    fn decode(&mut self, region: &CodeRegion<'_>) -> DecodeOutcome {
        if region.pixel(0, 0).is_some_and(|p| p.iter().all(|c| *c > 128)) {
            DecodeOutcome::Decoded(QrData::parse(&self.payload))
        } else {
            DecodeOutcome::NoCode
        }
    }
}

/// Accepts every view and emits one fake access unit, keyframe every
/// `gop` frames.
pub struct CountingEncoder {
    pub encoded: Arc<AtomicUsize>,
    pub flushes: Arc<AtomicUsize>,
    gop: usize,
    fail_at: Option<usize>,
    delayed: bool,
}

impl CountingEncoder {
    pub fn new(gop: usize) -> Self {
        Self {
            encoded: Arc::new(AtomicUsize::new(0)),
            flushes: Arc::new(AtomicUsize::new(0)),
            gop: gop.max(1),
            fail_at: None,
            delayed: false,
        }
    }

    /// Holds one non-key access unit back until `finish`.
    pub fn with_delayed_packet(mut self) -> Self {
        self.delayed = true;
        self
    }

    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }
}

impl VideoEncoder for CountingEncoder {
    fn encode(&mut self, _view: &MainView) -> anyhow::Result<Vec<EncodedPacket>> {
        let n = self.encoded.load(Ordering::SeqCst);
        if self.fail_at == Some(n) {
            anyhow::bail!("codec exploded");
        }
        self.encoded.fetch_add(1, Ordering::SeqCst);
        let is_key = n % self.gop == 0;
        let data = if is_key {
            annexb_keyframe()
        } else {
            bytes::Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9a, 0x02, 0x03])
        };
        Ok(vec![EncodedPacket {
            data,
            pts: Some(n as i64),
            is_key,
        }])
    }

    fn finish(&mut self) -> anyhow::Result<Vec<EncodedPacket>> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if !self.delayed {
            return Ok(Vec::new());
        }
        Ok(vec![EncodedPacket {
            data: bytes::Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9a, 0x0f]),
            pts: Some(self.encoded.load(Ordering::SeqCst) as i64),
            is_key: false,
        }])
    }
}

/// SPS + PPS + IDR in Annex B.
pub fn annexb_keyframe() -> bytes::Bytes {
    bytes::Bytes::from_static(&[
        0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1e, 0xd9, //
        0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80, //
        0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x21,
    ])
}

#[derive(Clone)]
struct BackendState {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    delay: Duration,
    status: StatusCode,
}

/// HTTP backend on loopback that records every request.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub calls: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    cancel: CancellationToken,
}

impl MockBackend {
    pub async fn start(delay: Duration) -> anyhow::Result<Self> {
        Self::start_with_status(delay, StatusCode::OK).await
    }

    pub async fn start_with_status(delay: Duration, status: StatusCode) -> anyhow::Result<Self> {
        let state = BackendState {
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay,
            status,
        };
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        });

        Ok(Self {
            addr,
            calls: state.calls,
            requests: state.requests,
            cancel,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, serde_json::Value)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn record(State(state): State<BackendState>, uri: Uri, body: Bytes) -> StatusCode {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    state.requests.lock().unwrap().push((uri.path().to_string(), json));
    tokio::time::sleep(state.delay).await;
    state.status
}
