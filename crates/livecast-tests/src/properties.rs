//! Property tests for cadence, buffer lifetime and detach.

use crate::support::{mono, Harness, Recorder};
use livecast_core::{CacheConfig, LiveCastError, PoolConfig, PopMode, Result};
use livecast_engine::{BufferHandle, BufferPool, Consumer, ConsumerId, ConsumerOptions};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn fifo_harness() -> Harness {
    Harness::new(
        CacheConfig {
            pop: PopMode::Fifo,
            ..CacheConfig::default()
        },
        PoolConfig {
            preallocate: 0,
            max_outstanding: 32,
        },
    )
}

/// Holds `extra` additional references to every unit until told to let go.
struct Retaining {
    extra: usize,
    held: Mutex<Vec<BufferHandle>>,
}

impl Consumer for Retaining {
    fn on_delivery(&self, buffer: BufferHandle) -> Result<()> {
        let mut held = self.held.lock();
        for _ in 0..self.extra {
            held.push(buffer.retain());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Publish,
    Tick,
    Attach,
    Detach(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Publish),
        3 => Just(Op::Tick),
        1 => Just(Op::Attach),
        1 => (0usize..8).prop_map(Op::Detach),
    ]
}

proptest! {
    #[test]
    fn cadence_delivers_every_dth_unit(units in 1u64..60, divisor in 1u32..8) {
        let h = Harness::small();
        let recorder = Recorder::new();
        h.registry.attach(recorder.clone(), ConsumerOptions::every(divisor)).unwrap();
        for ts in 0..units {
            h.publish(ts).unwrap();
            h.engine.tick();
        }

        let expected: Vec<u64> = (0..units).step_by(divisor as usize).collect();
        prop_assert_eq!(recorder.stamps(), expected);
        if units % divisor as u64 == 0 {
            prop_assert_eq!(recorder.count() as u64, units / divisor as u64);
        }
    }

    #[test]
    fn cadence_counts_ticks_not_units(published in prop::collection::vec(any::<bool>(), 1..60), divisor in 1u32..6) {
        let h = Harness::small();
        let recorder = Recorder::new();
        h.registry.attach(recorder.clone(), ConsumerOptions::every(divisor)).unwrap();
        for (tick, publish) in published.iter().enumerate() {
            if *publish {
                h.publish(tick as u64).unwrap();
            }
            h.engine.tick();
        }

        let expected: Vec<u64> = published
            .iter()
            .enumerate()
            .filter(|(tick, publish)| **publish && tick % divisor as usize == 0)
            .map(|(tick, _)| tick as u64)
            .collect();
        prop_assert_eq!(recorder.stamps(), expected);
    }

    #[test]
    fn every_retain_is_released_once(extras in prop::collection::vec(0usize..4, 1..5), units in 1u64..10) {
        let h = fifo_harness();
        let consumers: Vec<Arc<Retaining>> = extras
            .iter()
            .map(|&extra| Arc::new(Retaining { extra, held: Mutex::new(Vec::new()) }))
            .collect();
        for c in &consumers {
            h.registry.attach(c.clone(), ConsumerOptions::default()).unwrap();
        }

        for ts in 0..units {
            h.publish(ts).unwrap();
            h.engine.tick();
        }
        let held: usize = consumers.iter().map(|c| c.held.lock().len()).sum();
        prop_assert_eq!(held, extras.iter().sum::<usize>() * units as usize);
        if held > 0 {
            prop_assert!(h.pool.outstanding() > 0);
        }

        for c in &consumers {
            c.held.lock().clear();
        }
        prop_assert_eq!(h.pool.outstanding(), 0);
        prop_assert!(h.pool.stats().high_water <= units as usize);
    }

    #[test]
    fn pool_never_exceeds_its_cap(max in 1usize..8, steps in prop::collection::vec(any::<bool>(), 1..64)) {
        let pool = BufferPool::new(PoolConfig { preallocate: 0, max_outstanding: max }).unwrap();
        let format = mono(4);
        let mut live = Vec::new();
        for acquire in steps {
            if acquire {
                match pool.acquire(&format) {
                    Ok(buffer) => live.push(buffer.publish()),
                    Err(LiveCastError::ResourceExhausted(_)) => prop_assert_eq!(live.len(), max),
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                }
            } else if let Some(buffer) = live.pop() {
                buffer.release();
            }
            prop_assert!(pool.outstanding() <= max);
            prop_assert_eq!(pool.outstanding(), live.len());
        }
        drop(live);
        prop_assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn detached_consumers_receive_nothing_more(ops in prop::collection::vec(op(), 1..80)) {
        let h = fifo_harness();
        let mut attached: Vec<(ConsumerId, Arc<Recorder>)> = Vec::new();
        let mut detached: Vec<(Arc<Recorder>, usize)> = Vec::new();
        let mut ts = 0;

        for op in ops {
            match op {
                Op::Publish => {
                    let _ = h.publish(ts);
                    ts += 1;
                }
                Op::Tick => {
                    h.engine.tick();
                }
                Op::Attach => {
                    let recorder = Recorder::new();
                    let id = h.registry.attach(recorder.clone(), ConsumerOptions::default()).unwrap();
                    attached.push((id, recorder));
                }
                Op::Detach(index) if index < attached.len() => {
                    let (id, recorder) = attached.remove(index);
                    prop_assert!(h.registry.detach(id).is_some());
                    prop_assert!(h.registry.detach(id).is_none());
                    let count = recorder.count();
                    detached.push((recorder, count));
                }
                Op::Detach(_) => {}
            }
            for (recorder, count) in &detached {
                prop_assert_eq!(recorder.count(), *count);
            }
        }
        for (_, recorder) in &attached {
            let stamps = recorder.stamps();
            prop_assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
