//! Per-tick fan-out of published units to due consumers.

use crate::adapter::adapt;
use crate::buffer::BufferHandle;
use crate::cache::{CachedUnit, DistributionCache};
use crate::pool::BufferPool;
use crate::registry::{ConsumerRegistry, ConsumerSlot, Delivery};
use livecast_core::MediaFormat;
use parking_lot::Mutex;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// What happened on one dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Timestamp of the unit dispatched, or `None` on an empty tick.
    pub timestamp: Option<u64>,
    pub due: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub unavailable: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: Delivery) {
        match outcome {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Unavailable => self.unavailable += 1,
            Delivery::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Default)]
struct DispatchCounters {
    ticks: AtomicU64,
    empty_ticks: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    unavailable: AtomicU64,
    failed: AtomicU64,
    conversions: AtomicU64,
    conversion_failures: AtomicU64,
}

/// Dispatch statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub ticks: u64,
    /// Ticks on which the cache had nothing new.
    pub empty_ticks: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub unavailable: u64,
    pub failed: u64,
    pub conversions: u64,
    pub conversion_failures: u64,
}

/// Converted copies of the current unit, one per distinct target format.
type Conversions = SmallVec<[(MediaFormat, Option<BufferHandle>); 4]>;

/// Moves units from a distribution cache to the consumers of a registry.
pub struct DispatchEngine {
    cache: Arc<DistributionCache>,
    registry: Arc<ConsumerRegistry>,
    pool: BufferPool,
    parallel: bool,
    /// Ticks run one at a time.
    tick_lock: Mutex<()>,
    counters: DispatchCounters,
}

impl DispatchEngine {
    pub fn new(
        cache: Arc<DistributionCache>,
        registry: Arc<ConsumerRegistry>,
        pool: BufferPool,
        parallel: bool,
    ) -> Self {
        Self {
            cache,
            registry,
            pool,
            parallel,
            tick_lock: Mutex::new(()),
            counters: DispatchCounters::default(),
        }
    }

    pub fn cache(&self) -> &Arc<DistributionCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    /// Run one dispatch tick.
    ///
    /// Pops the next unit and hands it to every due consumer. With no new
    /// unit the cadence counters still advance. Never waits on consumer
    /// processing beyond the `on_delivery` hand-off.
    pub fn tick(&self) -> TickReport {
        let _tick = self.tick_lock.lock();
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        let consumers = self.registry.snapshot();

        let Some(unit) = self.cache.pop_for_dispatch() else {
            for slot in consumers.iter() {
                slot.advance();
            }
            self.counters.empty_ticks.fetch_add(1, Ordering::Relaxed);
            trace!("Dispatch tick with no new unit");
            return TickReport::default();
        };

        let due: SmallVec<[&Arc<ConsumerSlot>; 8]> =
            consumers.iter().filter(|slot| slot.advance()).collect();
        unit.ticket.set_pending(due.len());

        let conversions = self.convert_for(&unit, &due);
        let deliver = |slot: &&Arc<ConsumerSlot>| self.deliver_one(&unit, &conversions, slot);
        let outcomes: SmallVec<[Delivery; 8]> = if self.parallel && due.len() > 1 {
            due.par_iter().map(deliver).collect::<Vec<_>>().into_iter().collect()
        } else {
            due.iter().map(deliver).collect()
        };

        let mut report = TickReport {
            timestamp: Some(unit.handle.timestamp()),
            due: due.len(),
            ..TickReport::default()
        };
        for outcome in outcomes {
            report.record(outcome);
        }
        self.counters.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters.skipped.fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.counters.unavailable.fetch_add(report.unavailable as u64, Ordering::Relaxed);
        self.counters.failed.fetch_add(report.failed as u64, Ordering::Relaxed);

        trace!(
            timestamp = unit.handle.timestamp(),
            due = report.due,
            delivered = report.delivered,
            "Dispatch tick"
        );
        // Dropping the unit and the converted copies releases the
        // dispatcher's references.
        drop(conversions);
        drop(unit);
        report
    }

    /// Convert the unit once for every distinct target the due consumers need.
    fn convert_for(&self, unit: &CachedUnit, due: &[&Arc<ConsumerSlot>]) -> Conversions {
        let mut conversions = Conversions::new();
        let native = unit.handle.format();
        let Some(adapter) = self.registry.adapter() else {
            return conversions;
        };

        for slot in due {
            let Some(target) = slot.target() else { continue };
            if &target == native || conversions.iter().any(|(f, _)| *f == target) {
                continue;
            }
            let converted = match adapt(adapter.as_ref(), &self.pool, &unit.handle, &target) {
                Ok(handle) => {
                    self.counters.conversions.fetch_add(1, Ordering::Relaxed);
                    Some(handle)
                }
                Err(e) => {
                    self.counters.conversion_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(format = %target, "Conversion unavailable this tick: {e}");
                    None
                }
            };
            conversions.push((target, converted));
        }
        conversions
    }

    fn deliver_one(&self, unit: &CachedUnit, conversions: &Conversions, slot: &ConsumerSlot) -> Delivery {
        if !unit.ticket.start_delivery() {
            // Evicted while this tick was being dispatched.
            slot.record_skip();
            return Delivery::Skipped;
        }

        let handle = match slot.target() {
            Some(target) if &target != unit.handle.format() => conversions
                .iter()
                .find(|(f, _)| *f == target)
                .and_then(|(_, h)| h.clone()),
            _ => Some(unit.handle.retain()),
        };
        match handle {
            Some(handle) => slot.deliver(handle),
            None => {
                slot.record_skip();
                Delivery::Skipped
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            ticks: c.ticks.load(Ordering::Relaxed),
            empty_ticks: c.empty_ticks.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            unavailable: c.unavailable.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            conversions: c.conversions.load(Ordering::Relaxed),
            conversion_failures: c.conversion_failures.load(Ordering::Relaxed),
        }
    }
}
