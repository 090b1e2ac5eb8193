//! Bounded distribution cache between one producer and one dispatcher.
//!
//! Slots hold either a published unit the dispatcher has not seen yet, or a
//! ticket for a unit that is currently being handed to consumers. A push
//! into a full cache never blocks: the overload policy decides which unit
//! is dropped and the drop is counted.

use crate::buffer::BufferHandle;
use livecast_core::{CacheConfig, OverloadPolicy, PopMode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Log every Nth drop of an overload streak.
const DROP_LOG_INTERVAL: u64 = 300;

/// Per-slot dispatch state shared between the cache and the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchTicket {
    /// Due consumers that have not started their delivery yet.
    pending: AtomicUsize,
    /// Set when overload evicted the slot mid-dispatch.
    cancelled: AtomicBool,
    /// Set when the dispatcher is done with the slot.
    done: AtomicBool,
}

impl DispatchTicket {
    pub fn set_pending(&self, count: usize) {
        self.pending.store(count, Ordering::Release);
    }

    /// Claim one pending delivery. Returns `false` if the slot was evicted.
    pub fn start_delivery(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A unit taken out of the cache for one dispatch pass.
///
/// Owns the dispatcher's reference; dropping it releases that reference and
/// frees the slot.
pub struct CachedUnit {
    pub handle: BufferHandle,
    pub ticket: Arc<DispatchTicket>,
    /// Publication sequence number.
    pub sequence: u64,
}

impl Drop for CachedUnit {
    fn drop(&mut self) {
        self.ticket.done.store(true, Ordering::Release);
    }
}

enum SlotState {
    Unseen(BufferHandle),
    Dispatching(Arc<DispatchTicket>),
}

struct Slot {
    sequence: u64,
    state: SlotState,
}

impl Slot {
    fn is_finished(&self) -> bool {
        matches!(&self.state, SlotState::Dispatching(t) if t.done.load(Ordering::Acquire))
    }
}

struct Ring {
    slots: VecDeque<Slot>,
    next_sequence: u64,
}

/// Single-producer, single-dispatcher ring of published units.
pub struct DistributionCache {
    config: CacheConfig,
    ring: Mutex<Ring>,
    published: AtomicU64,
    skipped: AtomicU64,
    dispatched: AtomicU64,
    cancelled: AtomicU64,
    drop_streak: AtomicU64,
}

impl DistributionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ring: Mutex::new(Ring {
                slots: VecDeque::with_capacity(config.capacity),
                next_sequence: 0,
            }),
            published: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            drop_streak: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Publish a unit. Never blocks and never fails.
    ///
    /// Returns `false` if the overload policy dropped a unit to make room
    /// (or dropped the incoming one).
    pub fn push(&self, handle: BufferHandle) -> bool {
        let mut ring = self.ring.lock();
        ring.slots.retain(|slot| !slot.is_finished());

        let mut dropped = None;
        if ring.slots.len() >= self.config.capacity {
            match self.config.overload {
                OverloadPolicy::DropNewest => {
                    drop(ring);
                    self.record_drop(handle.timestamp(), "newest");
                    // Incoming reference released here.
                    return false;
                }
                OverloadPolicy::DropOldest => {
                    if let Some(evicted) = ring.slots.pop_front() {
                        dropped = Some(evicted);
                    }
                }
            }
        }

        let sequence = ring.next_sequence;
        ring.next_sequence += 1;
        ring.slots.push_back(Slot {
            sequence,
            state: SlotState::Unseen(handle),
        });
        drop(ring);
        self.published.fetch_add(1, Ordering::Relaxed);

        match dropped {
            None => {
                self.drop_streak.store(0, Ordering::Relaxed);
                true
            }
            Some(slot) => {
                match slot.state {
                    SlotState::Unseen(old) => self.record_drop(old.timestamp(), "oldest"),
                    SlotState::Dispatching(ticket) => {
                        ticket.cancelled.store(true, Ordering::Release);
                        self.cancelled.fetch_add(1, Ordering::Relaxed);
                        self.record_drop(slot.sequence, "in-dispatch");
                    }
                }
                false
            }
        }
    }

    /// Take the next unit for a dispatch pass, or `None` if nothing new was
    /// published since the last pop.
    pub fn pop_for_dispatch(&self) -> Option<CachedUnit> {
        let mut ring = self.ring.lock();
        ring.slots.retain(|slot| !slot.is_finished());

        let mut unseen = ring
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.state, SlotState::Unseen(_)))
            .map(|(index, _)| index);
        let index = match self.config.pop {
            PopMode::Fifo => unseen.next(),
            PopMode::Latest => unseen.last(),
        }?;

        let mut superseded = Vec::new();
        if self.config.pop == PopMode::Latest {
            // Everything unseen before the newest unit is stale.
            let mut i = 0;
            let mut target = index;
            while i < target {
                if matches!(ring.slots[i].state, SlotState::Unseen(_)) {
                    if let Some(slot) = ring.slots.remove(i) {
                        superseded.push(slot);
                    }
                    target -= 1;
                } else {
                    i += 1;
                }
            }
            return self.take_slot(&mut ring, target, superseded);
        }
        self.take_slot(&mut ring, index, superseded)
    }

    fn take_slot(&self, ring: &mut Ring, index: usize, superseded: Vec<Slot>) -> Option<CachedUnit> {
        let ticket = Arc::new(DispatchTicket::default());
        let slot = ring.slots.get_mut(index)?;
        let state = std::mem::replace(&mut slot.state, SlotState::Dispatching(Arc::clone(&ticket)));
        let sequence = slot.sequence;
        let SlotState::Unseen(handle) = state else {
            return None;
        };

        for stale in superseded {
            if let SlotState::Unseen(old) = stale.state {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(timestamp = old.timestamp(), "Superseded unit released");
            }
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        Some(CachedUnit {
            handle,
            ticket,
            sequence,
        })
    }

    /// Release every unit still held. Used at shutdown.
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        for slot in ring.slots.drain(..) {
            if let SlotState::Dispatching(ticket) = slot.state {
                ticket.cancelled.store(true, Ordering::Release);
            }
        }
    }

    /// Published units the dispatcher has not seen yet.
    pub fn queued(&self) -> usize {
        self.ring
            .lock()
            .slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Unseen(_)))
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            published: self.published.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            cancelled_mid_dispatch: self.cancelled.load(Ordering::Relaxed),
            queued: self.queued(),
        }
    }

    fn record_drop(&self, what: u64, which: &str) {
        let total = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
        let streak = self.drop_streak.fetch_add(1, Ordering::Relaxed);
        if streak % DROP_LOG_INTERVAL == 0 {
            warn!(
                dropped = which,
                unit = what,
                total_skipped = total,
                "Distribution cache full, dropping unit"
            );
        }
    }
}

/// Distribution cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Units accepted into the cache.
    pub published: u64,
    /// Units dropped by overload or superseded before dispatch.
    pub skipped: u64,
    /// Units handed to a dispatch pass.
    pub dispatched: u64,
    /// Dispatch passes cut short by eviction.
    pub cancelled_mid_dispatch: u64,
    /// Units waiting for dispatch.
    pub queued: usize,
}
