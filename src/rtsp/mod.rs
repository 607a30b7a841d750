//! RTSP/RTP H.264 server for the re-encoded main view.
//!
//! The stream encoder publishes access units into a [`StreamHub`]; every
//! playing client holds its own broadcast subscription and packetizer, so a
//! slow client only ever lags itself.

pub mod message;
pub mod rtp;
pub mod sdp;
pub mod server;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::media::types::EncodedFrame;
use sdp::ParameterSets;

pub use server::RtspServer;

/// Fan-out point between the encoder and the RTSP clients.
pub struct StreamHub {
    frames: broadcast::Sender<EncodedFrame>,
    params: Mutex<ParameterSets>,
    clients: AtomicUsize,
    fps: u32,
}

impl StreamHub {
    pub fn new(capacity: usize, fps: u32) -> Arc<Self> {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            frames,
            params: Mutex::new(ParameterSets::default()),
            clients: AtomicUsize::new(0),
            fps,
        })
    }

    /// Returns how many subscribers received the frame; zero is fine.
    pub fn publish(&self, frame: EncodedFrame) -> usize {
        if frame.is_key {
            self.params
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .update_from(&frame.data);
        }
        self.frames.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EncodedFrame> {
        self.frames.subscribe()
    }

    pub fn parameter_sets(&self) -> ParameterSets {
        self.params.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Clients currently playing.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    pub(crate) fn client_guard(self: &Arc<Self>) -> ClientGuard {
        self.clients.fetch_add(1, Ordering::Relaxed);
        ClientGuard(self.clone())
    }
}

/// Counts a playing client for as long as it is alive.
pub(crate) struct ClientGuard(Arc<StreamHub>);

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.clients.fetch_sub(1, Ordering::Relaxed);
    }
}
