use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("read failed: {0}")]
    Read(String),
}

/// A crop rectangle does not fit the frame it is cut from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{region} region {width}x{height} at ({x},{y}) does not fit a {frame_width}x{frame_height} frame"
)]
pub struct GeometryError {
    pub region: &'static str,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Errors that end the pipeline instance.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("startup failed: {0}")]
    Startup(String),
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),
    #[error("encoder fault: {0}")]
    EncoderFault(String),
    #[error("worker {0} panicked")]
    WorkerPanicked(&'static str),
}

/// Per-item API failures. Counted and discarded, never retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend answered {0}")]
    Status(u16),
    #[error("unknown event action {0:?}")]
    UnknownEvent(String),
    #[error("payload is {0:?} old, dropped")]
    Stale(Duration),
}
