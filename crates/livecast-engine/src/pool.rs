//! Bounded buffer pool with free lists keyed by media format.
//!
//! The pool owns all storage. A buffer is either on a free list or checked
//! out; the last release of a published buffer hands its storage back here.

use crate::buffer::BufferMut;
use livecast_core::{LiveCastError, MediaData, MediaFormat, PoolConfig, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pool of reusable media buffers.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    /// Free (recycled) storage, keyed by format.
    free: Mutex<FreeLists>,
    /// Buffers currently checked out or published.
    outstanding: AtomicUsize,
    high_water: AtomicUsize,
    max_outstanding: usize,
    exhausted: AtomicU64,
    allocations: AtomicU64,
    closed: AtomicBool,
}

#[derive(Default)]
struct FreeLists {
    lists: HashMap<MediaFormat, Vec<MediaData>>,
    count: usize,
}

impl BufferPool {
    /// Create an empty pool. Storage is allocated lazily up to the cap.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(FreeLists::default()),
                outstanding: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                max_outstanding: config.max_outstanding,
                exhausted: AtomicU64::new(0),
                allocations: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Create a pool and allocate `config.preallocate` buffers of `format`.
    pub fn with_preallocated(config: PoolConfig, format: MediaFormat) -> Result<Self> {
        if !format.is_valid() {
            return Err(LiveCastError::InvalidParameter(format!(
                "cannot preallocate invalid format {format}"
            )));
        }
        let pool = Self::new(config)?;
        {
            let mut free = pool.shared.free.lock();
            let list = free.lists.entry(format).or_default();
            for _ in 0..config.preallocate {
                list.push(MediaData::allocate(&format));
            }
            free.count += config.preallocate;
        }
        pool.shared
            .allocations
            .fetch_add(config.preallocate as u64, Ordering::Relaxed);
        info!(
            "Buffer pool ready: {} x {}, max {} outstanding",
            config.preallocate, format, config.max_outstanding
        );
        Ok(pool)
    }

    /// Check out a writable buffer of `format`.
    ///
    /// Prior contents are unspecified. Fails fast with `ResourceExhausted`
    /// when `max_outstanding` buffers are already out; the producer treats
    /// that as backpressure and drops the unit.
    pub fn acquire(&self, format: &MediaFormat) -> Result<BufferMut> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(LiveCastError::ShutDown);
        }
        let max = self.shared.max_outstanding;
        let reserved = self
            .shared
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            });
        let outstanding = match reserved {
            Ok(previous) => previous + 1,
            Err(_) => {
                self.shared.exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(LiveCastError::pool_exhausted(max));
            }
        };
        self.shared.high_water.fetch_max(outstanding, Ordering::Relaxed);

        let recycled = {
            let mut free = self.shared.free.lock();
            let data = free.lists.get_mut(format).and_then(Vec::pop);
            if data.is_some() {
                free.count -= 1;
            }
            data
        };
        let data = recycled.unwrap_or_else(|| {
            self.shared.allocations.fetch_add(1, Ordering::Relaxed);
            debug!("Allocating new {} buffer", format);
            MediaData::allocate(format)
        });

        Ok(BufferMut::new(*format, data, Arc::clone(&self.shared)))
    }

    /// Stop handing out buffers and free all recycled storage.
    ///
    /// Buffers still in flight are freed as their last holder releases them.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut free = self.shared.free.lock();
        free.lists.clear();
        free.count = 0;
        info!(
            "Buffer pool closed with {} buffers still in flight",
            self.outstanding()
        );
    }

    /// Buffers currently checked out or published.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn max_outstanding(&self) -> usize {
        self.shared.max_outstanding
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let in_use = self.outstanding();
        PoolStats {
            capacity: self.shared.max_outstanding,
            in_use,
            available: self.shared.max_outstanding.saturating_sub(in_use),
            free_buffers: self.shared.free.lock().count,
            high_water: self.shared.high_water.load(Ordering::Relaxed),
            exhausted: self.shared.exhausted.load(Ordering::Relaxed),
            allocations: self.shared.allocations.load(Ordering::Relaxed),
        }
    }
}

impl PoolShared {
    /// Return storage from a released buffer.
    pub(crate) fn recycle(&self, format: MediaFormat, data: MediaData) {
        if !self.closed.load(Ordering::Acquire) {
            let mut free = self.free.lock();
            // Free lists never hold more storage than the outstanding cap.
            if free.count < self.max_outstanding {
                free.lists.entry(format).or_default().push(data);
                free.count += 1;
            }
        }
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            warn!("Buffer pool outstanding count underflow");
            self.outstanding.store(0, Ordering::Release);
        }
    }
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub available: usize,
    /// Recycled buffers waiting on free lists.
    pub free_buffers: usize,
    /// Highest `in_use` ever observed.
    pub high_water: usize,
    /// Acquire calls refused because the pool was at its cap.
    pub exhausted: u64,
    /// Storage allocations performed (preallocation included).
    pub allocations: u64,
}
