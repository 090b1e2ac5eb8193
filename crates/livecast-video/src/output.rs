//! Video output: producer submit path, dispatch thread and paced producer.
//!
//! The producer publishes canvas frames into the distribution cache and
//! posts the frame signal. The dispatch thread wakes on each post and runs
//! one dispatch tick; when nothing arrives for two frame periods it runs an
//! empty tick anyway so consumer cadences keep following wall-clock time.

use crate::convert::CpuConverter;
use crate::signal::FrameSignal;
use livecast_core::{FrameRate, LiveCastError, MediaFormat, Result, VideoFormat, VideoOutputConfig};
use livecast_engine::{
    BufferMut, BufferPool, ClockCounters, ClockStats, Consumer, ConsumerId, ConsumerOptions,
    ConsumerRegistry, ConsumerStats, DispatchEngine, DispatchStats, DistributionCache,
    FormatAdapter, PacingClock, PoolStats,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Raw frame from the renderer: one packed byte slice per plane.
#[derive(Debug, Clone)]
pub struct RawFrame<'a> {
    pub planes: SmallVec<[&'a [u8]; 3]>,
    /// Bytes between rows of each plane.
    pub strides: SmallVec<[usize; 3]>,
}

impl<'a> RawFrame<'a> {
    pub fn new(planes: &[&'a [u8]], strides: &[usize]) -> Self {
        Self {
            planes: planes.iter().copied().collect(),
            strides: strides.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct OutputCounters {
    /// Ticks that dispatched a frame.
    total_frames: AtomicU64,
    /// Submissions refused because the pool was exhausted.
    pool_drops: AtomicU64,
    /// Dispatch wake-ups that timed out without a frame.
    stalled_ticks: AtomicU64,
}

/// Video output statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct VideoOutputStats {
    pub total_frames: u64,
    /// Frames lost to overload, pool exhaustion included.
    pub skipped_frames: u64,
    pub queued_frames: usize,
    pub stalled_ticks: u64,
    pub pool: PoolStats,
    pub dispatch: DispatchStats,
    /// Set while a paced producer is running.
    pub producer_clock: Option<ClockStats>,
}

/// State shared with the dispatch and producer threads.
struct VideoShared {
    format: VideoFormat,
    media: MediaFormat,
    frame_rate: FrameRate,
    pool: BufferPool,
    cache: Arc<DistributionCache>,
    registry: Arc<ConsumerRegistry>,
    engine: DispatchEngine,
    signal: FrameSignal,
    counters: OutputCounters,
    last_timestamp: Mutex<Option<u64>>,
    /// Cleared first at shutdown.
    producing: AtomicBool,
    dispatching: AtomicBool,
}

impl VideoShared {
    fn acquire(&self) -> Result<BufferMut> {
        if !self.producing.load(Ordering::Acquire) {
            return Err(LiveCastError::ShutDown);
        }
        let result = self.pool.acquire(&self.media);
        if let Err(LiveCastError::ResourceExhausted(_)) = &result {
            let drops = self.counters.pool_drops.fetch_add(1, Ordering::Relaxed) + 1;
            if drops == 1 || drops % 300 == 0 {
                warn!(drops, "Video pool exhausted, dropping frame");
            }
        }
        result
    }

    fn publish(&self, mut frame: BufferMut, timestamp: u64) -> Result<()> {
        if frame.format() != &self.media {
            return Err(LiveCastError::FormatMismatch {
                from: frame.format().to_string(),
                to: self.media.to_string(),
            });
        }
        {
            let mut last = self.last_timestamp.lock();
            if let Some(previous) = *last {
                if timestamp <= previous {
                    return Err(LiveCastError::InvalidParameter(format!(
                        "timestamp {timestamp} not after {previous}"
                    )));
                }
            }
            *last = Some(timestamp);
        }
        frame.set_timestamp(timestamp);
        self.cache.push(frame.publish());
        self.signal.post();
        Ok(())
    }

    fn dispatch_loop(&self) {
        let stall_timeout = self.frame_rate.frame_duration().to_duration() * 2;
        while self.dispatching.load(Ordering::Acquire) {
            let woke = self.signal.wait_timeout(stall_timeout);
            if !self.dispatching.load(Ordering::Acquire) {
                break;
            }
            if !woke {
                self.counters.stalled_ticks.fetch_add(1, Ordering::Relaxed);
            }
            let report = self.engine.tick();
            if report.timestamp.is_some() {
                self.counters.total_frames.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!("Video dispatch thread exiting");
    }
}

/// A video output with its own pool, cache, consumers and dispatch thread.
pub struct VideoOutput {
    shared: Arc<VideoShared>,
    dispatch_thread: Option<JoinHandle<()>>,
    producer: Mutex<Option<(JoinHandle<()>, Arc<ClockCounters>)>>,
    shut_down: bool,
}

impl VideoOutput {
    /// Create an output converting for consumers with the CPU adapter.
    pub fn new(config: VideoOutputConfig) -> Result<Self> {
        Self::with_adapter(config, Some(Arc::new(CpuConverter::new())))
    }

    /// Create an output with a specific format adapter (or none).
    pub fn with_adapter(
        config: VideoOutputConfig,
        adapter: Option<Arc<dyn FormatAdapter>>,
    ) -> Result<Self> {
        config.validate()?;
        let media = MediaFormat::Video(config.format);
        let pool = BufferPool::with_preallocated(config.pool, media)?;
        let cache = Arc::new(DistributionCache::new(config.cache));
        let registry = Arc::new(ConsumerRegistry::new(media, adapter));
        let engine = DispatchEngine::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
            pool.clone(),
            config.parallel_dispatch,
        );

        let shared = Arc::new(VideoShared {
            format: config.format,
            media,
            frame_rate: config.frame_rate,
            pool,
            cache,
            registry,
            engine,
            signal: FrameSignal::new(),
            counters: OutputCounters::default(),
            last_timestamp: Mutex::new(None),
            producing: AtomicBool::new(true),
            dispatching: AtomicBool::new(true),
        });

        let worker = Arc::clone(&shared);
        let dispatch_thread = thread::Builder::new()
            .name("livecast-video-dispatch".to_string())
            .spawn(move || worker.dispatch_loop())
            .map_err(|e| LiveCastError::Internal(format!("spawn video dispatch thread: {e}")))?;

        info!(
            format = %config.format,
            fps = config.frame_rate.to_fps_f64(),
            "Video output started"
        );
        Ok(Self {
            shared,
            dispatch_thread: Some(dispatch_thread),
            producer: Mutex::new(None),
            shut_down: false,
        })
    }

    pub fn format(&self) -> VideoFormat {
        self.shared.format
    }

    /// Copy a raw frame into a pooled buffer and publish it.
    ///
    /// Fails with `ResourceExhausted` when the pool is at its cap; the caller
    /// drops or retries the frame. Timestamps must strictly increase.
    pub fn submit(&self, raw: &RawFrame<'_>, timestamp: u64) -> Result<()> {
        let mut frame = self.shared.acquire()?;
        let planes = frame
            .video_planes_mut()
            .ok_or_else(|| LiveCastError::Internal("video pool returned audio storage".into()))?;
        if raw.planes.len() != planes.len() || raw.strides.len() != planes.len() {
            return Err(LiveCastError::InvalidParameter(format!(
                "expected {} planes, got {}",
                planes.len(),
                raw.planes.len()
            )));
        }
        for ((plane, src), stride) in planes.iter_mut().zip(&raw.planes).zip(&raw.strides) {
            if *stride < plane.row_bytes() || src.len() < stride * (plane.height as usize - 1) + plane.row_bytes() {
                return Err(LiveCastError::InvalidParameter(format!(
                    "plane of {} bytes with stride {stride} too small for {}x{}",
                    src.len(),
                    plane.width,
                    plane.height
                )));
            }
            plane.copy_from_packed(src, *stride);
        }
        self.shared.publish(frame, timestamp)
    }

    /// Check out a canvas buffer to render into directly.
    pub fn acquire_frame(&self) -> Result<BufferMut> {
        self.shared.acquire()
    }

    /// Publish a buffer obtained from [`acquire_frame`](Self::acquire_frame).
    pub fn publish_frame(&self, frame: BufferMut, timestamp: u64) -> Result<()> {
        self.shared.publish(frame, timestamp)
    }

    /// Run `render` on a dedicated thread once per canvas tick.
    ///
    /// Frame timestamps are tick indices. Ticks the clock skipped are not
    /// rendered; a tick whose buffer cannot be acquired is dropped.
    pub fn start_producer<F>(&self, mut render: F) -> Result<()>
    where
        F: FnMut(u64, &mut BufferMut) -> Result<()> + Send + 'static,
    {
        let mut producer = self.producer.lock();
        if producer.is_some() {
            return Err(LiveCastError::InvalidParameter(
                "producer already running".into(),
            ));
        }
        let mut clock = PacingClock::video(self.shared.frame_rate);
        let counters = clock.counters();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("livecast-video-producer".to_string())
            .spawn(move || {
                while shared.producing.load(Ordering::Acquire) {
                    let (tick, outcome) = clock.wait_next();
                    if let Err(e) = outcome.into_result() {
                        debug!(tick, "Producer resumed after missed ticks: {e}");
                    }
                    let mut frame = match shared.acquire() {
                        Ok(frame) => frame,
                        Err(LiveCastError::ShutDown) => break,
                        Err(_) => continue,
                    };
                    match render(tick, &mut frame) {
                        Ok(()) => {
                            if let Err(e) = shared.publish(frame, tick) {
                                warn!(tick, "Dropping rendered frame: {e}");
                            }
                        }
                        Err(e) => warn!(tick, "Render failed: {e}"),
                    }
                }
                debug!("Video producer thread exiting");
            })
            .map_err(|e| LiveCastError::Internal(format!("spawn video producer thread: {e}")))?;
        *producer = Some((handle, counters));
        Ok(())
    }

    pub fn attach(&self, consumer: Arc<dyn Consumer>, options: ConsumerOptions) -> Result<ConsumerId> {
        if !self.shared.dispatching.load(Ordering::Acquire) {
            return Err(LiveCastError::ShutDown);
        }
        self.shared.registry.attach(consumer, options)
    }

    pub fn detach(&self, id: ConsumerId) -> Option<ConsumerStats> {
        self.shared.registry.detach(id)
    }

    pub fn consumer_stats(&self, id: ConsumerId) -> Option<ConsumerStats> {
        self.shared.registry.consumer_stats(id)
    }

    pub fn stats(&self) -> VideoOutputStats {
        let shared = &self.shared;
        VideoOutputStats {
            total_frames: shared.counters.total_frames.load(Ordering::Relaxed),
            skipped_frames: shared.cache.stats().skipped
                + shared.counters.pool_drops.load(Ordering::Relaxed),
            queued_frames: shared.cache.queued(),
            stalled_ticks: shared.counters.stalled_ticks.load(Ordering::Relaxed),
            pool: shared.pool.stats(),
            dispatch: shared.engine.stats(),
            producer_clock: self.producer.lock().as_ref().map(|(_, c)| c.snapshot()),
        }
    }

    /// Stop production, stop dispatch, detach every consumer, then release
    /// pool storage. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.shared.producing.store(false, Ordering::Release);
        if let Some((handle, _)) = self.producer.lock().take() {
            let _ = handle.join();
        }

        self.shared.dispatching.store(false, Ordering::Release);
        self.shared.signal.interrupt();
        if let Some(handle) = self.dispatch_thread.take() {
            let _ = handle.join();
        }

        let detached = self.shared.registry.detach_all();
        self.shared.cache.clear();
        self.shared.pool.close();

        let stats = self.stats();
        info!(
            consumers = detached.len(),
            total_frames = stats.total_frames,
            skipped_frames = stats.skipped_frames,
            "Video output shut down"
        );
    }
}

impl Drop for VideoOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}
