//! LiveCast Encoder - Zero-copy hand-off to hardware encoders
//!
//! [`EncoderSdk`] is the capability a vendor session provides.
//! [`ZeroCopyBridge`] maps registered surfaces onto pooled buffers and keeps
//! them pinned while the encoder reads. [`EncoderConsumer`] attaches a
//! bridge to an output behind a bounded hand-off queue.

pub mod bridge;
pub mod consumer;
pub mod sdk;

pub use bridge::{BridgeStats, RegisteredHandle, ZeroCopyBridge};
pub use consumer::{EncoderConsumer, EncoderStats};
pub use sdk::{EncodedPacket, EncoderSdk, MappedSurface, SurfaceDescriptor, SurfaceHandle, SurfaceKind};
