//! LiveCast Engine - Buffer distribution and pacing
//!
//! One producer publishes timed units into a bounded cache; a dispatch pass
//! per tick hands each unit to the consumers due on that tick, sharing the
//! buffer by reference unless a consumer asked for another format.

pub mod adapter;
pub mod buffer;
pub mod cache;
pub mod clock;
pub mod dispatch;
pub mod pool;
pub mod registry;

pub use adapter::{adapt, FormatAdapter};
pub use buffer::{BufferHandle, BufferMut};
pub use cache::{CacheStats, CachedUnit, DistributionCache};
pub use clock::{Cadence, ClockCounters, ClockStats, PacingClock, SleepOutcome};
pub use dispatch::{DispatchEngine, DispatchStats, TickReport};
pub use pool::{BufferPool, PoolStats};
pub use registry::{
    Consumer, ConsumerId, ConsumerOptions, ConsumerRegistry, ConsumerSlot, ConsumerStats, Delivery,
};
