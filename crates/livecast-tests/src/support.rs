//! Shared fixtures: a recording consumer, an engine harness and a fake
//! encoder session.

use livecast_core::{
    AudioFormat, CacheConfig, LiveCastError, MediaFormat, PoolConfig, Result, SpeakerLayout,
};
use livecast_encoder::{EncodedPacket, EncoderSdk, MappedSurface, SurfaceDescriptor, SurfaceHandle};
use livecast_engine::{BufferHandle, BufferPool, Consumer, ConsumerRegistry, DispatchEngine, DistributionCache};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Route pipeline logs to the test harness. `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records the timestamp and format of every delivery.
#[derive(Default)]
pub struct Recorder {
    pub stamps: Mutex<Vec<u64>>,
    pub formats: Mutex<Vec<MediaFormat>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stamps(&self) -> Vec<u64> {
        self.stamps.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.stamps.lock().len()
    }
}

impl Consumer for Recorder {
    fn on_delivery(&self, buffer: BufferHandle) -> Result<()> {
        self.stamps.lock().push(buffer.timestamp());
        self.formats.lock().push(*buffer.format());
        Ok(())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

pub fn mono(frames: usize) -> MediaFormat {
    AudioFormat::new(48_000, SpeakerLayout::Mono, frames).into()
}

/// Cache, registry and dispatcher wired together without threads, so
/// tests decide exactly when a tick happens.
pub struct Harness {
    pub format: MediaFormat,
    pub pool: BufferPool,
    pub cache: Arc<DistributionCache>,
    pub registry: Arc<ConsumerRegistry>,
    pub engine: DispatchEngine,
}

impl Harness {
    pub fn new(cache: CacheConfig, pool: PoolConfig) -> Self {
        Self::build(cache, pool, false)
    }

    /// Like [`Harness::small`], delivering to due consumers in parallel.
    pub fn parallel() -> Self {
        Self::build(
            CacheConfig::default(),
            PoolConfig {
                preallocate: 0,
                max_outstanding: 32,
            },
            true,
        )
    }

    fn build(cache: CacheConfig, pool: PoolConfig, parallel: bool) -> Self {
        let format = mono(4);
        let pool = BufferPool::new(pool).unwrap();
        let cache = Arc::new(DistributionCache::new(cache));
        let registry = Arc::new(ConsumerRegistry::new(format, None));
        let engine = DispatchEngine::new(Arc::clone(&cache), Arc::clone(&registry), pool.clone(), parallel);
        Self {
            format,
            pool,
            cache,
            registry,
            engine,
        }
    }

    pub fn small() -> Self {
        Self::new(
            CacheConfig::default(),
            PoolConfig {
                preallocate: 0,
                max_outstanding: 32,
            },
        )
    }

    /// Publish one unit. `Ok(false)` if the cache dropped something.
    pub fn publish(&self, timestamp: u64) -> Result<bool> {
        let mut buffer = self.pool.acquire(&self.format)?;
        buffer.set_timestamp(timestamp);
        Ok(self.cache.push(buffer.publish()))
    }
}

/// What a [`FakeSdk`] saw.
#[derive(Default)]
pub struct SdkLog {
    pub registered: usize,
    pub unregistered: usize,
    pub mapped: Vec<u64>,
    pub unmapped: usize,
}

/// Encoder session that emits one packet per input, `latency` inputs late.
pub struct FakeSdk {
    pub log: Arc<Mutex<SdkLog>>,
    pub latency: usize,
    pub fail_register: bool,
    /// Every map fails.
    pub surface_busy: bool,
    pending: VecDeque<u64>,
    next: u64,
}

impl FakeSdk {
    pub fn new() -> (Self, Arc<Mutex<SdkLog>>) {
        let log = Arc::new(Mutex::new(SdkLog::default()));
        let sdk = Self {
            log: Arc::clone(&log),
            latency: 0,
            fail_register: false,
            surface_busy: false,
            pending: VecDeque::new(),
            next: 0,
        };
        (sdk, log)
    }
}

impl EncoderSdk for FakeSdk {
    fn register_surface(&mut self, _desc: &SurfaceDescriptor) -> Result<SurfaceHandle> {
        if self.fail_register {
            return Err(LiveCastError::Encoder("no encoder session available".into()));
        }
        self.log.lock().registered += 1;
        self.next += 1;
        Ok(SurfaceHandle(self.next))
    }

    fn map(&mut self, _surface: SurfaceHandle, buffer: &BufferHandle) -> Result<MappedSurface> {
        if self.surface_busy {
            return Err(LiveCastError::DeviceMappingFailed("surface busy".into()));
        }
        self.log.lock().mapped.push(buffer.timestamp());
        self.next += 1;
        Ok(MappedSurface(self.next))
    }

    fn submit(&mut self, _mapped: MappedSurface, timestamp: u64) -> Result<()> {
        self.pending.push_back(timestamp);
        Ok(())
    }

    fn lock_bitstream(&mut self) -> Result<Option<EncodedPacket>> {
        if self.pending.len() <= self.latency {
            return Ok(None);
        }
        Ok(self.pending.pop_front().map(|timestamp| EncodedPacket {
            timestamp,
            keyframe: timestamp == 0,
            data: timestamp.to_le_bytes().to_vec(),
        }))
    }

    fn unmap(&mut self, _mapped: MappedSurface) -> Result<()> {
        self.log.lock().unmapped += 1;
        Ok(())
    }

    fn unregister_surface(&mut self, _surface: SurfaceHandle) -> Result<()> {
        self.log.lock().unregistered += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}
