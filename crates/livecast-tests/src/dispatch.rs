//! Integration tests for distribution: cadence, detach and overload.

use crate::support::{init_tracing, Harness, Recorder};
use crossbeam_channel::{bounded, Receiver, Sender};
use livecast_core::{CacheConfig, OverloadPolicy, PoolConfig, PopMode, Result};
use livecast_engine::{BufferHandle, Consumer, ConsumerOptions};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn divisor_two_receives_even_timestamps() {
    init_tracing();
    let h = Harness::small();
    let recorder = Recorder::new();
    h.registry
        .attach(recorder.clone(), ConsumerOptions::every(2))
        .unwrap();

    for ts in 0..6 {
        h.publish(ts).unwrap();
        h.engine.tick();
    }
    assert_eq!(recorder.stamps(), vec![0, 2, 4]);
    assert_eq!(h.pool.outstanding(), 0);
}

/// Blocks inside its first delivery until the test lets it go.
struct Gated {
    entered: Sender<()>,
    release: Receiver<()>,
    deliveries: Mutex<Vec<u64>>,
}

impl Consumer for Gated {
    fn on_delivery(&self, buffer: BufferHandle) -> Result<()> {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        self.deliveries.lock().push(buffer.timestamp());
        Ok(())
    }
}

#[test]
fn detach_during_delivery_completes_it_and_stops_further_ones() {
    init_tracing();
    let h = Arc::new(Harness::small());
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let gated = Arc::new(Gated {
        entered: entered_tx,
        release: release_rx,
        deliveries: Mutex::new(Vec::new()),
    });
    let id = h
        .registry
        .attach(gated.clone(), ConsumerOptions::default())
        .unwrap();

    h.publish(0).unwrap();
    let dispatcher = {
        let h = Arc::clone(&h);
        thread::spawn(move || h.engine.tick())
    };
    entered_rx.recv().unwrap();

    let detacher = {
        let h = Arc::clone(&h);
        thread::spawn(move || h.registry.detach(id))
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!detacher.is_finished(), "detach must wait for the delivery in flight");

    release_tx.send(()).unwrap();
    let report = dispatcher.join().unwrap();
    let stats = detacher.join().unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(stats.delivered, 1);

    for ts in 1..4 {
        h.publish(ts).unwrap();
        h.engine.tick();
    }
    assert_eq!(*gated.deliveries.lock(), vec![0]);
    assert!(h.registry.detach(id).is_none());
}

#[test]
fn detach_twice_is_noop() {
    let h = Harness::small();
    let id = h
        .registry
        .attach(Recorder::new(), ConsumerOptions::default())
        .unwrap();
    assert!(h.registry.detach(id).is_some());
    assert!(h.registry.detach(id).is_none());
    assert!(h.registry.is_empty());
    h.publish(0).unwrap();
    assert_eq!(h.engine.tick().delivered, 0);
}

/// Counts deliveries, and separately any that arrive after it was marked
/// detached.
#[derive(Default)]
struct Flagged {
    detached: AtomicBool,
    deliveries: AtomicU64,
    after_detach: AtomicU64,
}

impl Consumer for Flagged {
    fn on_delivery(&self, _buffer: BufferHandle) -> Result<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        if self.detached.load(Ordering::SeqCst) {
            self.after_detach.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn concurrent_attach_detach_during_parallel_dispatch() {
    init_tracing();
    const ROUNDS: usize = 200;
    const BATCH: usize = 8;
    let h = Arc::new(Harness::parallel());
    let stop = Arc::new(AtomicBool::new(false));

    let dispatcher = {
        let h = Arc::clone(&h);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut ts = 0;
            while !stop.load(Ordering::Acquire) {
                let _ = h.publish(ts);
                ts += 1;
                h.engine.tick();
            }
        })
    };

    let churner = {
        let h = Arc::clone(&h);
        thread::spawn(move || {
            let mut seen = Vec::with_capacity(ROUNDS * BATCH);
            for _ in 0..ROUNDS {
                let batch: Vec<_> = (0..BATCH)
                    .map(|_| {
                        let consumer = Arc::new(Flagged::default());
                        let id = h
                            .registry
                            .attach(consumer.clone(), ConsumerOptions::default())
                            .unwrap();
                        (id, consumer)
                    })
                    .collect();
                thread::sleep(Duration::from_micros(200));
                for (id, consumer) in batch {
                    assert!(h.registry.detach(id).is_some());
                    consumer.detached.store(true, Ordering::SeqCst);
                    assert!(h.registry.detach(id).is_none());
                    seen.push(consumer);
                }
            }
            seen
        })
    };

    let consumers = churner.join().unwrap();
    stop.store(true, Ordering::Release);
    dispatcher.join().unwrap();

    let delivered: u64 = consumers
        .iter()
        .map(|c| c.deliveries.load(Ordering::SeqCst))
        .sum();
    assert!(delivered > 0);
    assert!(consumers
        .iter()
        .all(|c| c.after_detach.load(Ordering::SeqCst) == 0));
    assert!(h.registry.is_empty());
    assert_eq!(h.pool.outstanding(), 0);
}

/// Keeps the last `keep` units it was handed, like an encoder with frames
/// in flight.
struct Holding {
    keep: usize,
    held: Mutex<VecDeque<BufferHandle>>,
    stamps: Mutex<Vec<u64>>,
}

impl Consumer for Holding {
    fn on_delivery(&self, buffer: BufferHandle) -> Result<()> {
        self.stamps.lock().push(buffer.timestamp());
        let mut held = self.held.lock();
        held.push_back(buffer);
        while held.len() > self.keep {
            held.pop_front();
        }
        Ok(())
    }
}

#[test]
fn overload_skips_monotonically_with_bounded_buffers() {
    init_tracing();
    const CAPACITY: usize = 16;
    const HELD: usize = 2;
    let h = Harness::new(
        CacheConfig {
            capacity: CAPACITY,
            overload: OverloadPolicy::DropOldest,
            pop: PopMode::Fifo,
        },
        PoolConfig {
            preallocate: 0,
            max_outstanding: CAPACITY + 4,
        },
    );
    let slow = Arc::new(Holding {
        keep: HELD,
        held: Mutex::new(VecDeque::new()),
        stamps: Mutex::new(Vec::new()),
    });
    h.registry
        .attach(slow.clone(), ConsumerOptions::default())
        .unwrap();

    // Three units published per dispatch pass.
    let mut last_skipped = 0;
    let mut ts = 0;
    for _ in 0..100 {
        for _ in 0..3 {
            h.publish(ts).unwrap();
            ts += 1;
        }
        h.engine.tick();

        let skipped = h.cache.stats().skipped;
        assert!(skipped >= last_skipped);
        last_skipped = skipped;
        assert!(h.pool.outstanding() <= CAPACITY + HELD);
    }

    assert!(last_skipped > 0);
    assert!(h.pool.stats().high_water <= CAPACITY + 4);
    let stamps = slow.stamps.lock();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn drop_newest_keeps_queued_units() {
    let h = Harness::new(
        CacheConfig {
            capacity: 2,
            overload: OverloadPolicy::DropNewest,
            pop: PopMode::Fifo,
        },
        PoolConfig {
            preallocate: 0,
            max_outstanding: 4,
        },
    );
    let recorder = Recorder::new();
    h.registry
        .attach(recorder.clone(), ConsumerOptions::default())
        .unwrap();

    assert!(h.publish(0).unwrap());
    assert!(h.publish(1).unwrap());
    assert!(!h.publish(2).unwrap());
    h.engine.tick();
    h.engine.tick();
    assert_eq!(recorder.stamps(), vec![0, 1]);
    assert_eq!(h.cache.stats().skipped, 1);
}
