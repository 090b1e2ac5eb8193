//! Zero-copy hand-off from pooled buffers to an encoder session.
//!
//! A surface is registered once per session. Each delivery maps it onto the
//! buffer's storage, submits, and keeps a retain on the buffer until the
//! matching bitstream is locked and the surface unmapped. Storage therefore
//! cannot return to the pool while the encoder may still read it.

use crate::sdk::{EncodedPacket, EncoderSdk, MappedSurface, SurfaceDescriptor, SurfaceHandle, SurfaceKind};
use livecast_core::frame::STRIDE_ALIGNMENT;
use livecast_core::{LiveCastError, MediaFormat, Result};
use livecast_engine::BufferHandle;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// A surface registered with the encoder session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredHandle {
    surface: SurfaceHandle,
    desc: SurfaceDescriptor,
}

impl RegisteredHandle {
    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn format(&self) -> &MediaFormat {
        &self.desc.format
    }

    pub fn kind(&self) -> SurfaceKind {
        self.desc.kind
    }
}

/// Bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub registered: usize,
    /// Buffers mapped and submitted.
    pub submitted: u64,
    pub mapping_failures: u64,
    pub submit_failures: u64,
    pub packets: u64,
    /// Buffers still pinned by the encoder.
    pub in_flight: usize,
}

struct InFlight {
    mapped: MappedSurface,
    timestamp: u64,
    _buffer: BufferHandle,
}

/// Owns an encoder session and the buffers it is reading.
pub struct ZeroCopyBridge<S: EncoderSdk> {
    sdk: S,
    registered: Vec<SurfaceHandle>,
    in_flight: VecDeque<InFlight>,
    stats: BridgeStats,
}

impl<S: EncoderSdk> ZeroCopyBridge<S> {
    pub fn new(sdk: S) -> Self {
        Self {
            sdk,
            registered: Vec::new(),
            in_flight: VecDeque::new(),
            stats: BridgeStats::default(),
        }
    }

    /// Register a destination surface.
    ///
    /// Host surfaces read pool storage in place, so the encoder's pitch
    /// alignment must divide the pool's row alignment. Failures here are
    /// setup failures and go back to whoever is attaching the encoder.
    pub fn register(&mut self, desc: SurfaceDescriptor) -> Result<RegisteredHandle> {
        if !desc.format.is_valid() {
            return Err(LiveCastError::InvalidParameter(format!(
                "cannot register surface for {}",
                desc.format
            )));
        }
        if desc.pitch_alignment == 0 || !desc.pitch_alignment.is_power_of_two() {
            return Err(LiveCastError::InvalidParameter(format!(
                "pitch alignment {} is not a power of two",
                desc.pitch_alignment
            )));
        }
        if desc.kind == SurfaceKind::Host && STRIDE_ALIGNMENT % desc.pitch_alignment != 0 {
            return Err(LiveCastError::InvalidParameter(format!(
                "host surface needs {}-byte pitch, pool rows are {STRIDE_ALIGNMENT}-byte aligned",
                desc.pitch_alignment
            )));
        }

        let surface = self.sdk.register_surface(&desc).map_err(|e| {
            error!(encoder = self.sdk.name(), format = %desc.format, "Surface registration failed: {e}");
            e
        })?;
        self.registered.push(surface);
        self.stats.registered = self.registered.len();
        info!(
            encoder = self.sdk.name(),
            format = %desc.format,
            kind = ?desc.kind,
            "Registered encoder surface"
        );
        Ok(RegisteredHandle { surface, desc })
    }

    /// Map `registered` onto `buffer`, submit it, and collect any packets
    /// the encoder has finished.
    ///
    /// A mapping failure is reported as [`LiveCastError::DeviceMappingFailed`]
    /// and leaves the buffer untouched; the next tick may succeed.
    pub fn deliver(&mut self, buffer: &BufferHandle, registered: &RegisteredHandle) -> Result<Vec<EncodedPacket>> {
        if buffer.format() != registered.format() {
            return Err(LiveCastError::FormatMismatch {
                from: buffer.format().to_string(),
                to: registered.format().to_string(),
            });
        }
        if !self.registered.contains(&registered.surface) {
            return Err(LiveCastError::NotFound(format!(
                "surface {:?} is not registered",
                registered.surface
            )));
        }

        let mapped = match self.sdk.map(registered.surface, buffer) {
            Ok(mapped) => mapped,
            Err(e @ LiveCastError::DeviceMappingFailed(_)) => {
                self.stats.mapping_failures += 1;
                debug!(
                    encoder = self.sdk.name(),
                    timestamp = buffer.timestamp(),
                    failures = self.stats.mapping_failures,
                    "Surface mapping failed: {e}"
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    encoder = self.sdk.name(),
                    timestamp = buffer.timestamp(),
                    "Encoder session failed while mapping: {e}"
                );
                return Err(e);
            }
        };

        if let Err(e) = self.sdk.submit(mapped, buffer.timestamp()) {
            self.stats.submit_failures += 1;
            self.unmap_logged(mapped);
            return Err(match e {
                LiveCastError::Encoder(_) => e,
                other => LiveCastError::Encoder(other.to_string()),
            });
        }
        self.stats.submitted += 1;
        self.in_flight.push_back(InFlight {
            mapped,
            timestamp: buffer.timestamp(),
            _buffer: buffer.retain(),
        });
        self.stats.in_flight = self.in_flight.len();

        Ok(self.collect())
    }

    /// Collect finished packets, then unmap and release whatever the
    /// encoder never completed.
    pub fn flush(&mut self) -> Vec<EncodedPacket> {
        let packets = self.collect();
        if !self.in_flight.is_empty() {
            debug!(
                encoder = self.sdk.name(),
                abandoned = self.in_flight.len(),
                "Releasing surfaces without output"
            );
        }
        while let Some(done) = self.in_flight.pop_front() {
            self.unmap_logged(done.mapped);
        }
        self.stats.in_flight = 0;
        packets
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Flush and unregister every surface. Idempotent.
    pub fn close(&mut self) -> Vec<EncodedPacket> {
        let packets = self.flush();
        for surface in self.registered.drain(..) {
            if let Err(e) = self.sdk.unregister_surface(surface) {
                warn!(encoder = self.sdk.name(), error = %e, "Failed to unregister surface");
            }
        }
        self.stats.registered = 0;
        packets
    }

    fn collect(&mut self) -> Vec<EncodedPacket> {
        let mut packets = Vec::new();
        loop {
            match self.sdk.lock_bitstream() {
                Ok(Some(packet)) => {
                    self.complete_through(packet.timestamp);
                    packets.push(packet);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(encoder = self.sdk.name(), error = %e, "Failed to lock bitstream");
                    break;
                }
            }
        }
        self.stats.packets += packets.len() as u64;
        self.stats.in_flight = self.in_flight.len();
        packets
    }

    /// Unmap every input up to and including `timestamp`.
    fn complete_through(&mut self, timestamp: u64) {
        while self.in_flight.front().is_some_and(|f| f.timestamp <= timestamp) {
            if let Some(done) = self.in_flight.pop_front() {
                self.unmap_logged(done.mapped);
            }
        }
    }

    fn unmap_logged(&mut self, mapped: MappedSurface) {
        if let Err(e) = self.sdk.unmap(mapped) {
            warn!(encoder = self.sdk.name(), error = %e, "Failed to unmap input surface");
        }
    }
}

impl<S: EncoderSdk> Drop for ZeroCopyBridge<S> {
    fn drop(&mut self) {
        self.close();
    }
}
