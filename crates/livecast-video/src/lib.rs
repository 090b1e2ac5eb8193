//! LiveCast Video - Canvas output and pixel format adaptation
//!
//! A [`VideoOutput`] owns the buffer pool, distribution cache, consumer
//! registry and dispatch thread of one canvas.

pub mod convert;
pub mod output;
pub mod signal;

pub use convert::CpuConverter;
pub use output::{RawFrame, VideoOutput, VideoOutputStats};
pub use signal::FrameSignal;
