//! Pipeline configuration.
//!
//! Plain serde structs with presets. Loading them from disk is the
//! embedding application's job.

use crate::error::{LiveCastError, Result};
use crate::format::{AudioFormat, PixelFormat, SpeakerLayout, VideoFormat};
use crate::limits;
use crate::time::FrameRate;
use serde::{Deserialize, Serialize};

/// What a push into a full distribution cache throws away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverloadPolicy {
    /// Evict the oldest unconsumed slot and keep the new unit.
    #[default]
    DropOldest,
    /// Keep the cache as is and release the incoming unit.
    DropNewest,
}

/// Which unseen publication a dispatch pass takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PopMode {
    /// The newest one; older unseen units are released as skipped.
    #[default]
    Latest,
    /// The oldest one, in publication order.
    Fifo,
}

/// Distribution cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub overload: OverloadPolicy,
    pub pop: PopMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: limits::CACHE_CAPACITY,
            overload: OverloadPolicy::default(),
            pop: PopMode::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(LiveCastError::InvalidParameter(
                "cache capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Buffer pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Buffers allocated up front for the output's native format.
    pub preallocate: usize,
    /// Hard cap on buffers checked out or published at once.
    pub max_outstanding: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            preallocate: limits::CACHE_CAPACITY,
            max_outstanding: limits::CACHE_CAPACITY + limits::IN_FLIGHT_HEADROOM,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_outstanding == 0 {
            return Err(LiveCastError::InvalidParameter(
                "pool max_outstanding must be at least 1".into(),
            ));
        }
        if self.preallocate > self.max_outstanding {
            return Err(LiveCastError::InvalidParameter(format!(
                "pool preallocate ({}) exceeds max_outstanding ({})",
                self.preallocate, self.max_outstanding
            )));
        }
        Ok(())
    }
}

/// Video output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoOutputConfig {
    /// Canvas format every produced frame uses.
    pub format: VideoFormat,
    /// Canvas production rate.
    pub frame_rate: FrameRate,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    /// Hand due consumers their units from a rayon pool instead of serially.
    pub parallel_dispatch: bool,
}

impl VideoOutputConfig {
    /// 1080p NV12 at 60 fps.
    pub fn hd_60() -> Self {
        Self {
            format: VideoFormat::new(PixelFormat::Nv12, 1920, 1080),
            frame_rate: FrameRate::FPS_60,
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
            parallel_dispatch: true,
        }
    }

    /// 1080p NV12 at 30 fps.
    pub fn hd_30() -> Self {
        Self {
            frame_rate: FrameRate::FPS_30,
            ..Self::hd_60()
        }
    }

    /// 2160p NV12 at 30 fps with a smaller pool.
    pub fn uhd_30() -> Self {
        Self {
            format: VideoFormat::new(PixelFormat::Nv12, 3840, 2160),
            frame_rate: FrameRate::FPS_30,
            pool: PoolConfig {
                preallocate: 8,
                max_outstanding: limits::MAX_UHD_OUTSTANDING,
            },
            ..Self::hd_60()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.format.is_valid() {
            return Err(LiveCastError::InvalidParameter(format!(
                "invalid canvas format {}",
                self.format
            )));
        }
        if !self.frame_rate.is_valid() {
            return Err(LiveCastError::InvalidParameter(format!(
                "invalid frame rate {}/{}",
                self.frame_rate.numerator, self.frame_rate.denominator
            )));
        }
        self.cache.validate()?;
        self.pool.validate()
    }
}

impl Default for VideoOutputConfig {
    fn default() -> Self {
        Self::hd_60()
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioOutputConfig {
    /// Layout of every block the mixer publishes.
    pub format: AudioFormat,
    /// Independently consumed mix buses.
    pub bus_count: usize,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    /// Blocks a source may queue ahead of the mixer.
    pub source_queue_depth: usize,
}

impl AudioOutputConfig {
    /// 48 kHz stereo, 1024-frame blocks.
    pub fn stereo_48k() -> Self {
        Self {
            format: AudioFormat::new(48_000, SpeakerLayout::Stereo, limits::AUDIO_FRAMES_PER_TICK),
            bus_count: limits::MAX_MIX_BUSES,
            cache: CacheConfig::default(),
            pool: PoolConfig {
                preallocate: limits::MAX_MIX_BUSES,
                max_outstanding: limits::MAX_MIX_BUSES
                    * (limits::CACHE_CAPACITY + limits::IN_FLIGHT_HEADROOM),
            },
            source_queue_depth: 8,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.format.is_valid() {
            return Err(LiveCastError::InvalidParameter(format!(
                "invalid audio format {}",
                self.format
            )));
        }
        if self.bus_count == 0 || self.bus_count > limits::MAX_MIX_BUSES {
            return Err(LiveCastError::InvalidParameter(format!(
                "bus_count must be in 1..={}, got {}",
                limits::MAX_MIX_BUSES,
                self.bus_count
            )));
        }
        if self.source_queue_depth == 0 {
            return Err(LiveCastError::InvalidParameter(
                "source_queue_depth must be at least 1".into(),
            ));
        }
        self.cache.validate()?;
        self.pool.validate()
    }
}

impl Default for AudioOutputConfig {
    fn default() -> Self {
        Self::stereo_48k()
    }
}
