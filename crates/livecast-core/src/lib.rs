//! LiveCast Core - Foundation types for the capture and encode pipeline
//!
//! This crate provides the fundamental types used throughout LiveCast:
//! - Time representation (RationalTime, FrameRate)
//! - Media formats (VideoFormat, AudioFormat, MediaFormat)
//! - Plane storage for frames and audio blocks
//! - Configuration and the error taxonomy

pub mod config;
pub mod error;
pub mod format;
pub mod frame;
pub mod time;

pub use config::{AudioOutputConfig, CacheConfig, OverloadPolicy, PoolConfig, PopMode, VideoOutputConfig};
pub use error::{LiveCastError, Result};
pub use format::{AudioFormat, MediaFormat, PixelFormat, PlaneGeometry, SpeakerLayout, VideoFormat};
pub use frame::{FramePlane, MediaData};
pub use time::{FrameRate, RationalTime};

/// Sizing constants shared by the outputs.
pub mod limits {
    /// Distribution cache slots per output.
    pub const CACHE_CAPACITY: usize = 16;

    /// Extra pool buffers for units still held by encoders.
    pub const IN_FLIGHT_HEADROOM: usize = 4;

    /// Pool cap for 2160p outputs (NV12 4K = 12 MB per frame).
    pub const MAX_UHD_OUTSTANDING: usize = 12;

    /// Independent audio mix buses.
    pub const MAX_MIX_BUSES: usize = 6;

    /// Frames per audio processing block.
    pub const AUDIO_FRAMES_PER_TICK: usize = 1024;

    /// Hand-off queue depth in front of each encoder thread.
    pub const ENCODER_QUEUE_DEPTH: usize = 4;
}
