//! Frame acquisition and per-frame processing.
//!
//! ```text
//! FrameSource ──► FrameReader (pace, loop, sequence, overlay) ──► Frame
//!                                                                   │
//!                                          Geometry::split ◄────────┘
//!                                            │            │
//!                                        MainView    CodeRegion ──► CodeDecoder
//! ```

pub mod overlay;
pub mod qr;
pub mod source;
pub mod splitter;
pub mod types;
