//! Drift-free pacing clocks.
//!
//! Deadlines are always `origin + offset(n)` where the offset is computed
//! exactly from the tick index, so a late tick never shifts the deadlines
//! after it. Video ticks come from a rational frame rate; audio ticks come
//! from a running sample count over the sample rate.

use livecast_core::{FrameRate, LiveCastError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// How tick offsets are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// One tick per frame at a rational rate.
    Frames(FrameRate),
    /// One tick per block of `frames_per_tick` samples.
    Samples {
        sample_rate: u32,
        frames_per_tick: u64,
    },
}

impl Cadence {
    /// Exact offset of tick `n` from the clock origin.
    pub fn offset_of_tick(&self, n: u64) -> Duration {
        match *self {
            Self::Frames(rate) => rate.offset_of_tick(n),
            Self::Samples {
                sample_rate,
                frames_per_tick,
            } => {
                let samples = n as u128 * frames_per_tick as u128;
                Duration::from_nanos((samples * NANOS_PER_SEC / sample_rate as u128) as u64)
            }
        }
    }

    /// Nominal duration of one tick (for lateness checks only).
    pub fn period(&self) -> Duration {
        self.offset_of_tick(1)
    }

    /// Index of the tick whose slot contains `elapsed` since the origin.
    fn tick_at(&self, elapsed: Duration) -> u64 {
        let nanos = elapsed.as_nanos();
        match *self {
            Self::Frames(rate) => {
                (nanos * rate.numerator as u128 / (rate.denominator as u128 * NANOS_PER_SEC)) as u64
            }
            Self::Samples {
                sample_rate,
                frames_per_tick,
            } => {
                (nanos * sample_rate as u128 / (frames_per_tick as u128 * NANOS_PER_SEC)) as u64
            }
        }
    }
}

/// Counters shared with whoever reports pipeline statistics.
#[derive(Debug, Default)]
pub struct ClockCounters {
    ticks: AtomicU64,
    missed: AtomicU64,
}

impl ClockCounters {
    pub fn snapshot(&self) -> ClockStats {
        ClockStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockStats {
    /// Ticks fired.
    pub ticks: u64,
    /// Ticks skipped because the clock woke up too late.
    pub missed: u64,
}

/// Result of waiting for a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// Slept (or was already within one period of the deadline).
    OnTime,
    /// More than a whole period late; `skipped` ticks were dropped and the
    /// clock advanced past them.
    Late { skipped: u64 },
}

impl SleepOutcome {
    /// `DeadlineMissed` for a late tick. Callers record it and carry on.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::OnTime => Ok(()),
            Self::Late { skipped } => Err(LiveCastError::DeadlineMissed {
                late_ticks: skipped,
            }),
        }
    }
}

/// Wall-clock pacing for production and dispatch threads.
#[derive(Debug)]
pub struct PacingClock {
    cadence: Cadence,
    origin: Instant,
    /// Index of the tick `next_deadline` will return.
    next_tick: u64,
    counters: Arc<ClockCounters>,
}

impl PacingClock {
    /// Video clock starting now.
    pub fn video(rate: FrameRate) -> Self {
        Self::with_origin(Cadence::Frames(rate), Instant::now())
    }

    /// Sample-accurate audio clock starting now.
    pub fn audio(sample_rate: u32, frames_per_tick: usize) -> Self {
        Self::with_origin(
            Cadence::Samples {
                sample_rate,
                frames_per_tick: frames_per_tick as u64,
            },
            Instant::now(),
        )
    }

    pub fn with_origin(cadence: Cadence, origin: Instant) -> Self {
        Self {
            cadence,
            origin,
            next_tick: 0,
            counters: Arc::new(ClockCounters::default()),
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn counters(&self) -> Arc<ClockCounters> {
        Arc::clone(&self.counters)
    }

    /// Index of the tick the next call to `next_deadline` will schedule.
    pub fn tick_index(&self) -> u64 {
        self.next_tick
    }

    /// Deadline of tick `n` on the ideal schedule.
    pub fn deadline_of(&self, n: u64) -> Instant {
        self.origin + self.cadence.offset_of_tick(n)
    }

    /// Return the next deadline and advance the schedule by one tick.
    pub fn next_deadline(&mut self) -> Instant {
        let deadline = self.deadline_of(self.next_tick);
        self.next_tick += 1;
        deadline
    }

    /// Block until `deadline`.
    ///
    /// When the deadline already passed by more than one period, the ticks
    /// that were missed are recorded and skipped instead of being fired
    /// back to back, and the call returns immediately.
    pub fn sleep_until(&mut self, deadline: Instant) -> SleepOutcome {
        let now = Instant::now();
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        if now <= deadline {
            std::thread::sleep(deadline - now);
            return SleepOutcome::OnTime;
        }

        let late = now - deadline;
        if late <= self.cadence.period() {
            trace!(late_us = late.as_micros() as u64, "Tick slightly late");
            return SleepOutcome::OnTime;
        }

        // Resume at the first tick whose deadline is still ahead.
        let resume_at = self.cadence.tick_at(now.saturating_duration_since(self.origin)) + 1;
        let skipped = resume_at.saturating_sub(self.next_tick);
        self.next_tick = self.next_tick.max(resume_at);
        let missed = self.counters.missed.fetch_add(skipped, Ordering::Relaxed) + skipped;
        warn!(
            skipped,
            total_missed = missed,
            late_ms = late.as_millis() as u64,
            "Pacing deadline missed, skipping ticks"
        );
        SleepOutcome::Late { skipped }
    }

    /// `next_deadline` followed by `sleep_until`; returns the tick index fired.
    pub fn wait_next(&mut self) -> (u64, SleepOutcome) {
        let tick = self.next_tick;
        let deadline = self.next_deadline();
        (tick, self.sleep_until(deadline))
    }
}
