//! Paced audio output thread.
//!
//! Drives [`Mixer::process_window`] from a sample-accurate clock: window `n`
//! starts at sample `n * frames`. Windows the clock skips are never mixed,
//! so blocks queued for them are dropped as late.

use crate::mixer::{Mixer, MixerStats};
use livecast_core::{AudioOutputConfig, LiveCastError, Result};
use livecast_engine::{ClockCounters, ClockStats, PacingClock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Audio output statistics.
#[derive(Debug, Clone)]
pub struct AudioOutputStats {
    pub mixer: MixerStats,
    pub clock: ClockStats,
}

/// A mixer plus the thread that paces it.
pub struct AudioOutput {
    mixer: Arc<Mixer>,
    running: Arc<AtomicBool>,
    clock: Arc<ClockCounters>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// Create the mixer and start pacing it.
    pub fn start(config: AudioOutputConfig) -> Result<Self> {
        let frames = config.format.frames;
        let sample_rate = config.format.sample_rate;
        let mixer = Arc::new(Mixer::new(config)?);
        let running = Arc::new(AtomicBool::new(true));

        let mut clock = PacingClock::audio(sample_rate, frames);
        let counters = clock.counters();
        let worker_mixer = Arc::clone(&mixer);
        let worker_running = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("livecast-audio-mix".to_string())
            .spawn(move || {
                while worker_running.load(Ordering::Acquire) {
                    let (tick, outcome) = clock.wait_next();
                    if !worker_running.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = outcome.into_result() {
                        debug!(tick, "Audio windows skipped: {e}");
                    }
                    if let Err(e) = worker_mixer.process_window(tick * frames as u64) {
                        warn!(tick, "Mix window failed: {e}");
                    }
                }
                debug!("Audio mix thread exiting");
            })
            .map_err(|e| LiveCastError::Internal(format!("spawn audio mix thread: {e}")))?;

        info!(sample_rate, frames, "Audio output started");
        Ok(Self {
            mixer,
            running,
            clock: counters,
            thread: Some(thread),
        })
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn stats(&self) -> AudioOutputStats {
        AudioOutputStats {
            mixer: self.mixer.stats(),
            clock: self.clock.snapshot(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop mixing, detach every consumer, then release pool storage.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        let _ = thread.join();

        let detached = self.mixer.drain();
        self.mixer.pool().close();
        let stats = self.mixer.stats();
        info!(
            consumers = detached,
            windows = stats.windows_processed,
            late_blocks = stats.late_blocks,
            "Audio output shut down"
        );
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}
