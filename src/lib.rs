pub mod api;
pub mod assets;
pub mod config;
pub mod error;
pub mod media;
pub mod pacing;
pub mod pipeline;
pub mod queue;
pub mod rtsp;
pub mod stats;

#[cfg(test)]
mod test_support;
