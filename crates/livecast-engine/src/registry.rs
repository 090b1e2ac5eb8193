//! Consumer registry.
//!
//! Readers take a lock-free snapshot of the attached consumers once per
//! tick; attach and detach publish a new snapshot. Each consumer has a
//! delivery gate so that `detach` can wait out a delivery that is already
//! running on another thread.

use crate::adapter::FormatAdapter;
use crate::buffer::BufferHandle;
use arc_swap::ArcSwap;
use livecast_core::{LiveCastError, MediaFormat, Result};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Destination of published units.
pub trait Consumer: Send + Sync {
    /// Hand one unit to the consumer.
    ///
    /// The handle is an owned reference. A consumer that needs the data after
    /// returning keeps the handle (or a clone); dropping it is the release.
    /// Implementations must hand off and return, not process in place.
    fn on_delivery(&self, buffer: BufferHandle) -> Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "consumer"
    }
}

/// Identity of an attached consumer. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-consumer delivery settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Deliver every Nth tick.
    pub divisor: u32,
    /// Format the consumer wants, or `None` for the output's native format.
    pub target: Option<MediaFormat>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            divisor: 1,
            target: None,
        }
    }
}

impl ConsumerOptions {
    pub fn every(divisor: u32) -> Self {
        Self {
            divisor,
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: MediaFormat) -> Self {
        self.target = Some(target);
        self
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No unit for this tick (evicted, or conversion unavailable).
    Skipped,
    /// The consumer was detached before its delivery started.
    Unavailable,
    /// The consumer returned an error.
    Failed,
}

#[derive(Debug, Default)]
struct ConsumerCounters {
    delivered: AtomicU64,
    skipped: AtomicU64,
    unavailable: AtomicU64,
    failed: AtomicU64,
}

/// Per-consumer statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub delivered: u64,
    pub skipped: u64,
    pub unavailable: u64,
    pub failed: u64,
}

/// One attached consumer as seen by the dispatcher.
pub struct ConsumerSlot {
    id: ConsumerId,
    name: String,
    divisor: u32,
    target: Option<MediaFormat>,
    consumer: Arc<dyn Consumer>,
    /// `true` while attached. Held for the whole of a delivery.
    gate: ReentrantMutex<Cell<bool>>,
    /// Ticks since the last due tick, modulo `divisor`.
    counter: AtomicU32,
    counters: ConsumerCounters,
}

impl ConsumerSlot {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    pub fn target(&self) -> Option<MediaFormat> {
        self.target
    }

    pub fn is_attached(&self) -> bool {
        self.gate.lock().get()
    }

    /// Advance the cadence counter by one tick. Returns whether this tick is
    /// due for the consumer.
    ///
    /// Only the dispatch thread calls this.
    pub fn advance(&self) -> bool {
        let current = self.counter.load(Ordering::Relaxed);
        self.counter
            .store((current + 1) % self.divisor, Ordering::Relaxed);
        current == 0
    }

    /// Run the consumer's callback while holding the delivery gate.
    pub fn deliver(&self, buffer: BufferHandle) -> Delivery {
        let gate = self.gate.lock();
        if !gate.get() {
            self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
            debug!(consumer = %self.id, "{}", LiveCastError::ConsumerUnavailable(self.id.0));
            return Delivery::Unavailable;
        }

        let timestamp = buffer.timestamp();
        match self.consumer.on_delivery(buffer) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Delivery::Delivered
            }
            Err(e) => {
                let failed = self.counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    consumer = %self.id,
                    name = %self.name,
                    timestamp,
                    failed,
                    "Delivery failed: {e}"
                );
                Delivery::Failed
            }
        }
    }

    /// Count a due tick for which the consumer got no unit.
    pub fn record_skip(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            unavailable: self.counters.unavailable.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Flip the slot to detached, waiting for a delivery in progress on
    /// another thread.
    fn close(&self) {
        let gate = self.gate.lock();
        gate.set(false);
    }
}

impl fmt::Debug for ConsumerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSlot")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("divisor", &self.divisor)
            .field("target", &self.target)
            .finish()
    }
}

/// Consumers currently attached to one output.
pub struct ConsumerRegistry {
    native: MediaFormat,
    adapter: Option<Arc<dyn FormatAdapter>>,
    snapshot: ArcSwap<Vec<Arc<ConsumerSlot>>>,
    /// Serializes writers; readers never take it.
    writer: Mutex<()>,
    next_id: AtomicU64,
}

impl ConsumerRegistry {
    /// Registry for an output producing `native` units, optionally able to
    /// convert them through `adapter`.
    pub fn new(native: MediaFormat, adapter: Option<Arc<dyn FormatAdapter>>) -> Self {
        Self {
            native,
            adapter,
            snapshot: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn native_format(&self) -> &MediaFormat {
        &self.native
    }

    pub fn adapter(&self) -> Option<&Arc<dyn FormatAdapter>> {
        self.adapter.as_ref()
    }

    /// Attach a consumer. It is considered from the next tick on.
    ///
    /// Fails with `FormatMismatch` if the requested target format cannot be
    /// produced from the native format.
    pub fn attach(&self, consumer: Arc<dyn Consumer>, options: ConsumerOptions) -> Result<ConsumerId> {
        if options.divisor == 0 {
            return Err(LiveCastError::InvalidParameter(
                "cadence divisor must be at least 1".into(),
            ));
        }
        let target = options.target.filter(|t| *t != self.native);
        if let Some(target) = target {
            let supported = self
                .adapter
                .as_ref()
                .is_some_and(|a| a.supports(&self.native, &target));
            if !supported {
                return Err(LiveCastError::FormatMismatch {
                    from: self.native.to_string(),
                    to: target.to_string(),
                });
            }
        }

        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(ConsumerSlot {
            id,
            name: consumer.name().to_string(),
            divisor: options.divisor,
            target,
            consumer,
            gate: ReentrantMutex::new(Cell::new(true)),
            counter: AtomicU32::new(0),
            counters: ConsumerCounters::default(),
        });

        let _writer = self.writer.lock();
        let mut next = Vec::clone(&self.snapshot.load());
        next.push(Arc::clone(&slot));
        self.snapshot.store(Arc::new(next));

        info!(
            consumer = %id,
            name = %slot.name,
            divisor = options.divisor,
            "Consumer attached"
        );
        Ok(id)
    }

    /// Detach a consumer.
    ///
    /// When this returns no delivery to `id` is running or will start. A
    /// delivery already running on another thread is waited for; calling
    /// this from inside the consumer's own callback does not deadlock.
    /// Returns the final statistics, or `None` if `id` was not attached.
    pub fn detach(&self, id: ConsumerId) -> Option<ConsumerStats> {
        let slot = {
            let _writer = self.writer.lock();
            let current = self.snapshot.load();
            let index = current.iter().position(|s| s.id == id)?;
            let mut next = Vec::clone(&current);
            let slot = next.remove(index);
            self.snapshot.store(Arc::new(next));
            slot
        };

        slot.close();
        let stats = slot.stats();
        info!(
            consumer = %id,
            name = %slot.name,
            delivered = stats.delivered,
            skipped = stats.skipped,
            "Consumer detached"
        );
        Some(stats)
    }

    /// Detach every consumer. Used at shutdown.
    pub fn detach_all(&self) -> Vec<(ConsumerId, ConsumerStats)> {
        let slots = {
            let _writer = self.writer.lock();
            self.snapshot.swap(Arc::new(Vec::new()))
        };
        slots
            .iter()
            .map(|slot| {
                slot.close();
                (slot.id, slot.stats())
            })
            .collect()
    }

    /// Consumers attached at this instant, in attach order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<ConsumerSlot>>> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ConsumerId) -> bool {
        self.snapshot.load().iter().any(|s| s.id == id)
    }

    pub fn consumer_stats(&self, id: ConsumerId) -> Option<ConsumerStats> {
        self.snapshot
            .load()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.stats())
    }
}
