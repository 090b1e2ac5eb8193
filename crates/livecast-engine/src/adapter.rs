//! Format adaptation between an output's native format and a consumer's
//! target format.

use crate::buffer::{BufferHandle, BufferMut};
use crate::pool::BufferPool;
use livecast_core::{LiveCastError, MediaFormat, Result};

/// Stateless conversion between media formats.
///
/// Implementations hold no mutable state and may be called concurrently.
pub trait FormatAdapter: Send + Sync {
    /// Whether `convert` can turn `from` into `to`.
    fn supports(&self, from: &MediaFormat, to: &MediaFormat) -> bool;

    /// Write `src` converted to `dst.format()` into `dst`.
    fn convert(&self, src: &BufferHandle, dst: &mut BufferMut) -> Result<()>;

    fn name(&self) -> &str {
        "adapter"
    }
}

/// Convert `src` into a new buffer of `target` drawn from `pool`.
///
/// The result carries the source timestamp and is already published.
pub fn adapt(
    adapter: &dyn FormatAdapter,
    pool: &BufferPool,
    src: &BufferHandle,
    target: &MediaFormat,
) -> Result<BufferHandle> {
    if !adapter.supports(src.format(), target) {
        return Err(LiveCastError::FormatMismatch {
            from: src.format().to_string(),
            to: target.to_string(),
        });
    }
    let mut dst = pool.acquire(target)?;
    adapter.convert(src, &mut dst)?;
    dst.set_timestamp(src.timestamp());
    Ok(dst.publish())
}
