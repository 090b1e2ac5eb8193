//! Pooled media buffers.
//!
//! A [`BufferMut`] is exclusively owned by the producer that acquired it and
//! is the only way to write into pool storage. [`BufferMut::publish`]
//! consumes it and returns a [`BufferHandle`], which is immutable and
//! shared across threads by atomic reference counting. Dropping the last
//! handle returns the storage to the pool.

use crate::pool::PoolShared;
use livecast_core::{FramePlane, MediaData, MediaFormat};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Storage checked out of a pool; returns itself on drop.
struct Storage {
    format: MediaFormat,
    data: MediaData,
    pool: Arc<PoolShared>,
}

impl Drop for Storage {
    fn drop(&mut self) {
        let data = std::mem::replace(&mut self.data, MediaData::Audio(SmallVec::new()));
        self.pool.recycle(self.format, data);
    }
}

/// A writable buffer that has not been published yet.
pub struct BufferMut {
    storage: Storage,
    timestamp: u64,
}

impl BufferMut {
    pub(crate) fn new(format: MediaFormat, data: MediaData, pool: Arc<PoolShared>) -> Self {
        Self {
            storage: Storage { format, data, pool },
            timestamp: 0,
        }
    }

    pub fn format(&self) -> &MediaFormat {
        &self.storage.format
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    pub fn data(&self) -> &MediaData {
        &self.storage.data
    }

    pub fn data_mut(&mut self) -> &mut MediaData {
        &mut self.storage.data
    }

    /// Pixel planes, or `None` for an audio buffer.
    pub fn video_planes_mut(&mut self) -> Option<&mut [FramePlane]> {
        self.storage.data.video_planes_mut()
    }

    /// Audio channels, or `None` for a video buffer.
    pub fn audio_channels_mut(&mut self) -> Option<&mut [Vec<f32>]> {
        self.storage.data.audio_channels_mut()
    }

    /// Freeze the buffer and make it shareable.
    ///
    /// The returned handle is the single reference the caller owns
    /// (reference count 1).
    pub fn publish(self) -> BufferHandle {
        BufferHandle {
            inner: Arc::new(Published {
                storage: self.storage,
                timestamp: self.timestamp,
            }),
        }
    }
}

impl fmt::Debug for BufferMut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferMut")
            .field("format", &self.storage.format)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

struct Published {
    storage: Storage,
    timestamp: u64,
}

/// Shared, immutable reference to a published buffer.
///
/// `Clone` is a retain and `Drop` is a release. Handing a handle to a
/// consumer by value transfers one retain to it.
#[derive(Clone)]
pub struct BufferHandle {
    inner: Arc<Published>,
}

impl BufferHandle {
    /// Presentation timestamp in the output's integer clock.
    pub fn timestamp(&self) -> u64 {
        self.inner.timestamp
    }

    pub fn format(&self) -> &MediaFormat {
        &self.inner.storage.format
    }

    pub fn data(&self) -> &MediaData {
        &self.inner.storage.data
    }

    pub fn video_planes(&self) -> Option<&[FramePlane]> {
        self.inner.storage.data.video_planes()
    }

    pub fn audio_channels(&self) -> Option<&[Vec<f32>]> {
        self.inner.storage.data.audio_channels()
    }

    /// Take an additional reference.
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Give up this reference. The last release returns storage to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Current number of live references.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles refer to the same storage.
    pub fn same_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("format", self.format())
            .field("timestamp", &self.inner.timestamp)
            .field("refs", &self.ref_count())
            .finish()
    }
}
