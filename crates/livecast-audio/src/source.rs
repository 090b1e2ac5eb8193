//! Mix sources: time-aligned sample blocks waiting for their window.

use livecast_core::{AudioFormat, LiveCastError, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::debug;

/// One block of already resampled, planar samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Sample index of the first frame, on the mixer's clock.
    pub timestamp: u64,
    pub channels: SmallVec<[Vec<f32>; 8]>,
}

impl AudioBlock {
    pub fn new(timestamp: u64, channels: impl IntoIterator<Item = Vec<f32>>) -> Self {
        Self {
            timestamp,
            channels: channels.into_iter().collect(),
        }
    }

    /// Silent block laid out for `format`.
    pub fn silence(timestamp: u64, format: &AudioFormat) -> Self {
        Self::new(timestamp, (0..format.channels()).map(|_| vec![0.0; format.frames]))
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Identity of a source within one mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

/// Per-source counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Blocks summed into the mix. Blocks taken while muted are not counted.
    pub contributed: u64,
    /// Blocks discarded because their window had already passed.
    pub late_blocks: u64,
    /// Blocks discarded because the queue was full.
    pub overflow_blocks: u64,
    pub queued: usize,
}

/// An audio input feeding one or more mix buses.
pub struct MixSource {
    id: SourceId,
    name: String,
    format: AudioFormat,
    queue: Mutex<VecDeque<AudioBlock>>,
    depth: usize,
    /// Bit `n` set: contribute to bus `n`.
    bus_mask: AtomicU32,
    /// Linear gain stored as `f32` bits.
    volume: AtomicU32,
    muted: AtomicBool,
    contributed: AtomicU64,
    late_blocks: AtomicU64,
    overflow_blocks: AtomicU64,
}

impl MixSource {
    pub(crate) fn new(id: SourceId, name: &str, format: AudioFormat, depth: usize, bus_mask: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            format,
            queue: Mutex::new(VecDeque::with_capacity(depth)),
            depth,
            bus_mask: AtomicU32::new(bus_mask),
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            contributed: AtomicU64::new(0),
            late_blocks: AtomicU64::new(0),
            overflow_blocks: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a block for the window starting at its timestamp.
    ///
    /// Never blocks: a full queue drops its oldest block.
    pub fn push(&self, block: AudioBlock) -> Result<()> {
        if block.channels.len() != self.format.channels() || block.frames() != self.format.frames {
            return Err(LiveCastError::InvalidParameter(format!(
                "block of {} channels x {} frames does not match {}",
                block.channels.len(),
                block.frames(),
                self.format
            )));
        }
        if block.channels.iter().any(|c| c.len() != self.format.frames) {
            return Err(LiveCastError::InvalidParameter(
                "channels of one block differ in length".into(),
            ));
        }

        let mut queue = self.queue.lock();
        if queue.len() >= self.depth {
            queue.pop_front();
            let dropped = self.overflow_blocks.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(source = %self.id, dropped, "Source queue full, dropping oldest block");
        }
        queue.push_back(block);
        Ok(())
    }

    pub fn bus_mask(&self) -> u32 {
        self.bus_mask.load(Ordering::Relaxed)
    }

    pub fn set_bus_mask(&self, mask: u32) {
        self.bus_mask.store(mask, Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume.max(0.0) } else { 0.0 };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Take the block scheduled for the window starting at `window_start`.
    ///
    /// Blocks for earlier windows are dropped as late. A block for a later
    /// window stays queued and the source sits this window out.
    pub(crate) fn take_for_window(&self, window_start: u64) -> Option<AudioBlock> {
        let mut queue = self.queue.lock();
        let mut late = 0;
        while queue.front().is_some_and(|b| b.timestamp < window_start) {
            queue.pop_front();
            late += 1;
        }
        if late > 0 {
            self.late_blocks.fetch_add(late, Ordering::Relaxed);
            debug!(source = %self.id, late, window_start, "Dropped late blocks");
        }
        if queue.front().is_some_and(|b| b.timestamp == window_start) {
            return queue.pop_front();
        }
        None
    }

    pub(crate) fn record_contribution(&self) {
        self.contributed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            contributed: self.contributed.load(Ordering::Relaxed),
            late_blocks: self.late_blocks.load(Ordering::Relaxed),
            overflow_blocks: self.overflow_blocks.load(Ordering::Relaxed),
            queued: self.queue.lock().len(),
        }
    }
}

impl fmt::Debug for MixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bus_mask", &self.bus_mask())
            .finish()
    }
}
