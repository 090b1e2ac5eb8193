//! Mix buses and the multi-bus mixer.
//!
//! Every window each bus zeroes its unclamped accumulator, sums the blocks
//! of the sources routed to it, copies the sum into a pooled buffer, then
//! sanitizes and clamps that copy per channel. Only the clamped copy is
//! published; consumers never see the accumulator. Buses share no mutable
//! state and are mixed in parallel.

use crate::clamp::clamp_channels;
use crate::source::{AudioBlock, MixSource, SourceId, SourceStats};
use livecast_core::{
    limits, AudioFormat, AudioOutputConfig, LiveCastError, MediaFormat, Result,
};
use livecast_engine::{
    BufferPool, CacheStats, Consumer, ConsumerId, ConsumerOptions, ConsumerRegistry,
    ConsumerStats, DispatchEngine, DispatchStats, DistributionCache, PoolStats, TickReport,
};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, trace, warn};

/// One independently consumed mix output.
pub struct MixBus {
    index: usize,
    format: AudioFormat,
    /// Sum of this window's contributions, one vector per channel.
    unclamped: Mutex<Vec<Vec<f32>>>,
    cache: Arc<DistributionCache>,
    registry: Arc<ConsumerRegistry>,
    engine: DispatchEngine,
    pool_drops: AtomicU64,
}

/// Per-bus statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct BusStats {
    pub index: usize,
    pub consumers: usize,
    pub pool_drops: u64,
    pub cache: CacheStats,
    pub dispatch: DispatchStats,
}

/// A source's block for the current window with its routing.
struct Contribution {
    bus_mask: u32,
    gain: f32,
    block: AudioBlock,
}

impl MixBus {
    fn new(index: usize, config: &AudioOutputConfig, pool: &BufferPool) -> Self {
        let format = config.format;
        let cache = Arc::new(DistributionCache::new(config.cache));
        let registry = Arc::new(ConsumerRegistry::new(MediaFormat::Audio(format), None));
        let engine = DispatchEngine::new(Arc::clone(&cache), Arc::clone(&registry), pool.clone(), false);
        Self {
            index,
            format,
            unclamped: Mutex::new(vec![vec![0.0; format.frames]; format.channels()]),
            cache,
            registry,
            engine,
            pool_drops: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    /// Sum, clamp, publish and dispatch one window. Returns `None` if the bus
    /// has no consumers or the window was dropped.
    fn process(&self, contributions: &[Contribution], window_start: u64, pool: &BufferPool) -> Option<TickReport> {
        if self.registry.is_empty() {
            return None;
        }
        let bit = 1u32 << self.index;

        let mut unclamped = self.unclamped.lock();
        for channel in unclamped.iter_mut() {
            channel.fill(0.0);
        }
        for contribution in contributions.iter().filter(|c| c.bus_mask & bit != 0) {
            for (sum, input) in unclamped.iter_mut().zip(&contribution.block.channels) {
                for (s, x) in sum.iter_mut().zip(input) {
                    *s += x * contribution.gain;
                }
            }
        }

        let media = MediaFormat::Audio(self.format);
        let mut buffer = match pool.acquire(&media) {
            Ok(buffer) => buffer,
            Err(e) => {
                let drops = self.pool_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if drops == 1 || drops % 300 == 0 {
                    warn!(bus = self.index, drops, "Dropping mix window: {e}");
                }
                return None;
            }
        };
        let clamped = buffer.audio_channels_mut()?;
        for (out, sum) in clamped.iter_mut().zip(unclamped.iter()) {
            out.copy_from_slice(sum);
        }
        drop(unclamped);
        clamp_channels(clamped);

        buffer.set_timestamp(window_start);
        self.cache.push(buffer.publish());
        Some(self.engine.tick())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            index: self.index,
            consumers: self.registry.len(),
            pool_drops: self.pool_drops.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            dispatch: self.engine.stats(),
        }
    }
}

/// Result of one mix window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixReport {
    pub window_start: u64,
    /// Sources that had a block for this window.
    pub contributing_sources: usize,
    /// Buses that published a block.
    pub published_buses: usize,
    pub delivered: usize,
}

/// Mixer statistics snapshot.
#[derive(Debug, Clone)]
pub struct MixerStats {
    pub windows_processed: u64,
    /// Buses with at least one consumer.
    pub active_buses: usize,
    pub total_sources: usize,
    pub late_blocks: u64,
    pub pool: PoolStats,
    pub buses: Vec<BusStats>,
}

/// Mixes registered sources into up to six buses.
pub struct Mixer {
    config: AudioOutputConfig,
    pool: BufferPool,
    buses: Vec<MixBus>,
    sources: RwLock<Vec<Arc<MixSource>>>,
    next_source: AtomicU64,
    /// Start of the next window that may be mixed.
    next_window: Mutex<u64>,
    windows_processed: AtomicU64,
    /// Late blocks of sources that were removed.
    retired_late_blocks: AtomicU64,
}

impl Mixer {
    pub fn new(config: AudioOutputConfig) -> Result<Self> {
        config.validate()?;
        let pool = BufferPool::with_preallocated(config.pool, MediaFormat::Audio(config.format))?;
        let buses = (0..config.bus_count)
            .map(|index| MixBus::new(index, &config, &pool))
            .collect();
        info!(
            format = %config.format,
            buses = config.bus_count,
            "Audio mixer ready"
        );
        Ok(Self {
            config,
            pool,
            buses,
            sources: RwLock::new(Vec::new()),
            next_source: AtomicU64::new(1),
            next_window: Mutex::new(0),
            windows_processed: AtomicU64::new(0),
            retired_late_blocks: AtomicU64::new(0),
        })
    }

    pub fn format(&self) -> &AudioFormat {
        &self.config.format
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn bus(&self, index: usize) -> Option<&MixBus> {
        self.buses.get(index)
    }

    fn bus_or_err(&self, index: usize) -> Result<&MixBus> {
        self.buses
            .get(index)
            .ok_or_else(|| LiveCastError::NotFound(format!("mix bus {index}")))
    }

    /// Register a source contributing to the buses in `bus_mask`.
    pub fn add_source(&self, name: &str, bus_mask: u32) -> Result<Arc<MixSource>> {
        let valid = (1u32 << self.buses.len()) - 1;
        if bus_mask & !valid != 0 {
            return Err(LiveCastError::InvalidParameter(format!(
                "bus mask {bus_mask:#b} names buses beyond {}",
                self.buses.len()
            )));
        }
        let id = SourceId(self.next_source.fetch_add(1, Ordering::Relaxed));
        let source = Arc::new(MixSource::new(
            id,
            name,
            self.config.format,
            self.config.source_queue_depth,
            bus_mask,
        ));
        self.sources.write().push(Arc::clone(&source));
        info!(source = %id, name, bus_mask, "Mix source added");
        Ok(source)
    }

    /// Unregister a source. Returns its final statistics.
    pub fn remove_source(&self, id: SourceId) -> Option<SourceStats> {
        let mut sources = self.sources.write();
        let index = sources.iter().position(|s| s.id() == id)?;
        let source = sources.remove(index);
        let stats = source.stats();
        self.retired_late_blocks
            .fetch_add(stats.late_blocks, Ordering::Relaxed);
        info!(source = %id, "Mix source removed");
        Some(stats)
    }

    pub fn attach(&self, bus: usize, consumer: Arc<dyn Consumer>, options: ConsumerOptions) -> Result<ConsumerId> {
        self.bus_or_err(bus)?.registry.attach(consumer, options)
    }

    pub fn detach(&self, bus: usize, id: ConsumerId) -> Option<ConsumerStats> {
        self.buses.get(bus)?.registry.detach(id)
    }

    /// Mix the window starting at sample `window_start` on every bus.
    ///
    /// Window starts must advance; skipping windows is allowed and leaves
    /// the skipped blocks to be dropped as late.
    pub fn process_window(&self, window_start: u64) -> Result<MixReport> {
        {
            let mut next = self.next_window.lock();
            if window_start < *next {
                return Err(LiveCastError::InvalidParameter(format!(
                    "window {window_start} already mixed (next is {})",
                    *next
                )));
            }
            *next = window_start + self.config.format.frames as u64;
        }

        let contributions: Vec<Contribution> = self
            .sources
            .read()
            .iter()
            .filter_map(|source| {
                let block = source.take_for_window(window_start)?;
                if source.is_muted() {
                    return None;
                }
                source.record_contribution();
                Some(Contribution {
                    bus_mask: source.bus_mask(),
                    gain: source.volume(),
                    block,
                })
            })
            .collect();

        let reports: Vec<Option<TickReport>> = self
            .buses
            .par_iter()
            .map(|bus| bus.process(&contributions, window_start, &self.pool))
            .collect();

        self.windows_processed.fetch_add(1, Ordering::Relaxed);
        let published: Vec<TickReport> = reports.into_iter().flatten().collect();
        let report = MixReport {
            window_start,
            contributing_sources: contributions.len(),
            published_buses: published.len(),
            delivered: published.iter().map(|r| r.delivered).sum(),
        };
        trace!(
            window_start,
            sources = report.contributing_sources,
            buses = report.published_buses,
            "Mixed window"
        );
        Ok(report)
    }

    /// Detach every consumer of every bus and release cached blocks.
    pub(crate) fn drain(&self) -> usize {
        let mut detached = 0;
        for bus in &self.buses {
            detached += bus.registry.detach_all().len();
            bus.cache.clear();
        }
        detached
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stats(&self) -> MixerStats {
        let sources = self.sources.read();
        MixerStats {
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            active_buses: self.buses.iter().filter(|b| !b.registry.is_empty()).count(),
            total_sources: sources.len(),
            late_blocks: self.retired_late_blocks.load(Ordering::Relaxed)
                + sources.iter().map(|s| s.stats().late_blocks).sum::<u64>(),
            pool: self.pool.stats(),
            buses: self.buses.iter().map(MixBus::stats).collect(),
        }
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("format", &self.config.format)
            .field("buses", &self.buses.len())
            .finish()
    }
}

const _: () = assert!(limits::MAX_MIX_BUSES <= u32::BITS as usize);
