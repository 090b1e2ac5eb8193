//! Encoder consumer: one thread per hardware encoder session.
//!
//! Dispatch hands each due unit to [`EncoderConsumer::on_delivery`], which
//! only enqueues it. The encoder thread drains the queue through a
//! [`ZeroCopyBridge`]. A full queue drops the unit on this side so a slow
//! encoder never holds up dispatch.

use crate::bridge::ZeroCopyBridge;
use crate::sdk::{EncodedPacket, EncoderSdk, SurfaceDescriptor};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use livecast_core::{limits, LiveCastError, Result};
use livecast_engine::{BufferHandle, Consumer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Encoder consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    /// Units accepted into the hand-off queue.
    pub received: u64,
    /// Units dropped because the queue was full.
    pub queue_drops: u64,
    pub packets: u64,
    /// Ticks lost to a busy surface. Retried with the next unit.
    pub mapping_failures: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    queue_drops: AtomicU64,
    packets: AtomicU64,
    mapping_failures: AtomicU64,
    failures: AtomicU64,
}

/// A [`Consumer`] that feeds an encoder session on its own thread.
pub struct EncoderConsumer {
    name: String,
    queue: Mutex<Option<Sender<BufferHandle>>>,
    counters: Arc<Counters>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EncoderConsumer {
    /// Register `desc` with `sdk` and start the encoder thread.
    ///
    /// Registration happens on the calling thread; its failure is returned
    /// here and no thread is started. Encoded packets arrive on the
    /// returned receiver in submit order.
    pub fn spawn<S>(name: &str, sdk: S, desc: SurfaceDescriptor) -> Result<(Arc<Self>, Receiver<EncodedPacket>)>
    where
        S: EncoderSdk + 'static,
    {
        Self::spawn_with_depth(name, sdk, desc, limits::ENCODER_QUEUE_DEPTH)
    }

    pub fn spawn_with_depth<S>(
        name: &str,
        sdk: S,
        desc: SurfaceDescriptor,
        depth: usize,
    ) -> Result<(Arc<Self>, Receiver<EncodedPacket>)>
    where
        S: EncoderSdk + 'static,
    {
        if depth == 0 {
            return Err(LiveCastError::InvalidParameter(
                "encoder queue depth must be at least 1".into(),
            ));
        }
        let mut bridge = ZeroCopyBridge::new(sdk);
        let registered = bridge.register(desc)?;

        let (queue_tx, queue_rx) = bounded::<BufferHandle>(depth);
        let (packet_tx, packet_rx) = unbounded();
        let counters = Arc::new(Counters::default());

        let worker_counters = Arc::clone(&counters);
        let worker_name = name.to_string();
        let thread = thread::Builder::new()
            .name(format!("livecast-encode-{name}"))
            .spawn(move || {
                for buffer in queue_rx.iter() {
                    match bridge.deliver(&buffer, &registered) {
                        Ok(packets) => forward(&packet_tx, packets, &worker_counters),
                        Err(e) if e.is_retryable() => {
                            worker_counters.mapping_failures.fetch_add(1, Ordering::Relaxed);
                            debug!(encoder = %worker_name, timestamp = buffer.timestamp(), "Skipping unit: {e}");
                        }
                        Err(e) => {
                            worker_counters.failures.fetch_add(1, Ordering::Relaxed);
                            warn!(encoder = %worker_name, timestamp = buffer.timestamp(), "Encode failed: {e}");
                        }
                    }
                }
                forward(&packet_tx, bridge.close(), &worker_counters);
                debug!(encoder = %worker_name, "Encoder thread exiting");
            })
            .map_err(|e| LiveCastError::Internal(format!("spawn encoder thread: {e}")))?;

        info!(encoder = name, depth, "Encoder consumer started");
        let consumer = Arc::new(Self {
            name: name.to_string(),
            queue: Mutex::new(Some(queue_tx)),
            counters,
            thread: Mutex::new(Some(thread)),
        });
        Ok((consumer, packet_rx))
    }

    pub fn stats(&self) -> EncoderStats {
        let c = &self.counters;
        EncoderStats {
            received: c.received.load(Ordering::Relaxed),
            queue_drops: c.queue_drops.load(Ordering::Relaxed),
            packets: c.packets.load(Ordering::Relaxed),
            mapping_failures: c.mapping_failures.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting units, encode what is queued, flush and release the
    /// session. Idempotent.
    pub fn finish(&self) {
        drop(self.queue.lock().take());
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = thread.join();
        let stats = self.stats();
        info!(
            encoder = %self.name,
            packets = stats.packets,
            queue_drops = stats.queue_drops,
            "Encoder consumer finished"
        );
    }
}

fn forward(tx: &Sender<EncodedPacket>, packets: Vec<EncodedPacket>, counters: &Counters) {
    for packet in packets {
        counters.packets.fetch_add(1, Ordering::Relaxed);
        // Nobody listening is not an error; the session still has to drain.
        let _ = tx.send(packet);
    }
}

impl Consumer for EncoderConsumer {
    fn on_delivery(&self, buffer: BufferHandle) -> Result<()> {
        let queue = self.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(LiveCastError::ShutDown);
        };
        match tx.try_send(buffer) {
            Ok(()) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(buffer)) => {
                let dropped = self.counters.queue_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 300 == 0 {
                    warn!(
                        encoder = %self.name,
                        timestamp = buffer.timestamp(),
                        dropped,
                        "Encoder queue full, dropping unit"
                    );
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(LiveCastError::ShutDown),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for EncoderConsumer {
    fn drop(&mut self) {
        self.finish();
    }
}
