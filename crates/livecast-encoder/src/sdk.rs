//! Hardware encoder capability.
//!
//! The bridge is the only caller. Implementations wrap a vendor session
//! (register, map, encode, lock bitstream, unmap) behind this trait.

use livecast_core::{MediaFormat, Result};
use livecast_engine::BufferHandle;

/// Where the encoder reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// System memory the encoder reads directly; pool storage already has
    /// the required pitch.
    Host,
    /// GPU memory mapped onto the buffer's storage.
    Device,
}

/// Describes the input surface an encoder session consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub format: MediaFormat,
    pub kind: SurfaceKind,
    /// Row pitch alignment the encoder requires, in bytes.
    pub pitch_alignment: usize,
}

impl SurfaceDescriptor {
    pub fn host(format: MediaFormat) -> Self {
        Self {
            format,
            kind: SurfaceKind::Host,
            pitch_alignment: 1,
        }
    }

    pub fn device(format: MediaFormat, pitch_alignment: usize) -> Self {
        Self {
            format,
            kind: SurfaceKind::Device,
            pitch_alignment,
        }
    }
}

/// Opaque SDK handle for a registered surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Opaque SDK handle for a surface mapped onto one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappedSurface(pub u64);

/// One unit of compressed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Timestamp of the input the packet was produced from.
    pub timestamp: u64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

/// Encoder session operations, in the order the bridge calls them.
pub trait EncoderSdk: Send {
    /// Register an input surface once per session.
    fn register_surface(&mut self, desc: &SurfaceDescriptor) -> Result<SurfaceHandle>;

    /// Map `surface` onto the storage behind `buffer` without copying.
    fn map(&mut self, surface: SurfaceHandle, buffer: &BufferHandle) -> Result<MappedSurface>;

    /// Queue a mapped surface for encoding.
    fn submit(&mut self, mapped: MappedSurface, timestamp: u64) -> Result<()>;

    /// Take the next finished packet, if any. Packets come out in submit
    /// order.
    fn lock_bitstream(&mut self) -> Result<Option<EncodedPacket>>;

    fn unmap(&mut self, mapped: MappedSurface) -> Result<()>;

    fn unregister_surface(&mut self, surface: SurfaceHandle) -> Result<()>;

    fn name(&self) -> &str {
        "encoder"
    }
}
